//! Source classification of signature-list paths
//!
//! A `src` entry either names a file shipped inside the package (embedded),
//! a remote resource outside the verification boundary (online), a resource
//! served from the package's own virtual host (localhost), or something we
//! refuse to reason about (not supported).

/// Classified signature-list path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileSource {
    /// Blank path
    Empty,
    /// File inside the package, as a normalized relative path
    Embedded { path: String },
    /// Remote resource, trusted to its origin
    Online { url: String },
    /// Resource on a `*.localhost` host, remapped to a package-relative path
    Localhost { host: String, path: String },
    /// Anything else; fails closed
    NotSupported,
}

impl FileSource {
    pub fn kind(&self) -> &'static str {
        match self {
            FileSource::Empty => "empty",
            FileSource::Embedded { .. } => "embedded",
            FileSource::Online { .. } => "online",
            FileSource::Localhost { .. } => "localhost",
            FileSource::NotSupported => "not-supported",
        }
    }

    /// Package-relative path for sources that resolve to a local file
    pub fn local_path(&self) -> Option<&str> {
        match self {
            FileSource::Embedded { path } | FileSource::Localhost { path, .. } => Some(path),
            _ => None,
        }
    }
}

/// Classify a signature-list path
pub fn classify(src: &str) -> FileSource {
    let trimmed = src.trim();
    if trimmed.is_empty() {
        return FileSource::Empty;
    }

    if let Some(rest) = trimmed.strip_prefix("//") {
        return classify_remote(trimmed, rest);
    }

    if trimmed.contains("://") {
        return match url::Url::parse(trimmed) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {
                let host = url.host_str().unwrap_or_default();
                let rest = format!("{}{}", host, url.path());
                classify_remote(trimmed, &rest)
            }
            _ => FileSource::NotSupported,
        };
    }

    let path = normalize_embedded(trimmed);
    if path.is_empty() || path == "." {
        return FileSource::Empty;
    }
    if !is_contained(&path) {
        return FileSource::NotSupported;
    }
    FileSource::Embedded { path }
}

/// `rest` is everything after the scheme separator: `host/path...`
fn classify_remote(original: &str, rest: &str) -> FileSource {
    let (host, path) = rest.split_once('/').unwrap_or((rest, ""));
    if host.is_empty() {
        return FileSource::NotSupported;
    }

    if is_localhost(host) {
        let path = normalize_embedded(path);
        if path.is_empty() || !is_contained(&path) {
            return FileSource::NotSupported;
        }
        return FileSource::Localhost {
            host: host.to_ascii_lowercase(),
            path,
        };
    }

    FileSource::Online {
        url: original.to_string(),
    }
}

/// Whether a host name is `localhost` or a `*.localhost` subdomain
pub fn is_localhost(host: &str) -> bool {
    let host = host.split(':').next().unwrap_or(host).to_ascii_lowercase();
    host == "localhost" || host.ends_with(".localhost")
}

/// Normalize a package-relative path
///
/// Strips `./`, `~/`, `.\`, `~\` and leading separators, and uses `/` as the
/// separator. Applying it twice gives the same result as applying it once.
pub fn normalize_embedded(path: &str) -> String {
    let mut current = path.trim().replace('\\', "/");
    loop {
        let next = current
            .strip_prefix("./")
            .or_else(|| current.strip_prefix("~/"))
            .map(str::to_string)
            .unwrap_or_else(|| current.trim_start_matches('/').to_string());
        if next == current {
            return current;
        }
        current = next;
    }
}

/// Relative path without `..` components or a drive prefix
fn is_contained(path: &str) -> bool {
    !path.split('/').any(|segment| segment == "..") && !path.contains(':')
}

/// Normalized package-relative path, or `None` if it is blank or escapes
/// the package directory
///
/// The result is joined onto the package directory as-is; no path-scheme
/// prefixes are interpreted.
pub fn contained_path(path: &str) -> Option<String> {
    let path = normalize_embedded(path);
    (!path.is_empty() && path != "." && is_contained(&path)).then_some(path)
}
