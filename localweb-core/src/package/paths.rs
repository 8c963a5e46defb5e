//! Path mapping between web content and the host file system
//!
//! Content never sees raw OS paths. It addresses host locations through a
//! small set of path schemes that are parsed into [`PathScheme`] first and
//! resolved against the package layout second.

use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};

static ENV_VAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"%([A-Za-z0-9_()]+)%").expect("valid regex"));

/// A content-supplied path, classified by prefix
///
/// Precedence, first match wins: `://` remote, `%VAR%` environment,
/// `.data:`, `.doc:`, `.asset:`, `..`, `~`, `./`, any other leading `.`
/// (rejected), plain relative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathScheme {
    /// Relative to the package version directory
    Local(String),
    /// Relative to the parent of the package directory
    Parent(String),
    /// Relative to the app-private data directory
    AppData(String),
    /// Relative to the user's documents folder
    Documents(String),
    /// Path containing `%VAR%` references to expand
    EnvExpanded(String),
    /// Remote URL, passed through unchanged
    Remote(String),
}

impl PathScheme {
    /// Parse a content path; `None` means the path is rejected
    pub fn parse(input: &str) -> Option<Self> {
        let path = input.trim();

        if path.contains("://") {
            return Some(PathScheme::Remote(path.to_string()));
        }
        if path.starts_with('%') {
            return Some(PathScheme::EnvExpanded(path.to_string()));
        }
        if let Some(rest) = path.strip_prefix(".data:") {
            return relative(rest).map(PathScheme::AppData);
        }
        if let Some(rest) = path.strip_prefix(".doc:") {
            return relative(rest).map(PathScheme::Documents);
        }
        if let Some(rest) = path.strip_prefix(".asset:") {
            return relative(rest).map(PathScheme::Local);
        }
        if let Some(rest) = path.strip_prefix("..") {
            return relative(rest).map(PathScheme::Parent);
        }
        if let Some(rest) = path.strip_prefix('~') {
            return relative(rest).map(PathScheme::Local);
        }
        if let Some(rest) = path.strip_prefix("./").or_else(|| path.strip_prefix(".\\")) {
            return relative(rest).map(PathScheme::Local);
        }
        if path.starts_with('.') {
            return None;
        }
        relative(path).map(PathScheme::Local)
    }
}

/// Normalize the remainder after a prefix; rejects `..` escapes and drive letters
fn relative(rest: &str) -> Option<String> {
    let normalized = rest
        .replace('\\', "/")
        .trim_start_matches('/')
        .to_string();
    let escapes = normalized
        .split('/')
        .any(|segment| segment == ".." || segment.contains(':'));
    if escapes {
        None
    } else {
        Some(normalized)
    }
}

/// Result of mapping a content path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MappedPath {
    Local(PathBuf),
    Remote(String),
}

impl MappedPath {
    pub fn as_local(&self) -> Option<&Path> {
        match self {
            MappedPath::Local(path) => Some(path),
            MappedPath::Remote(_) => None,
        }
    }

    pub fn into_local(self) -> Option<PathBuf> {
        match self {
            MappedPath::Local(path) => Some(path),
            MappedPath::Remote(_) => None,
        }
    }
}

/// Resolved directories of a loaded package
#[derive(Debug, Clone)]
pub struct PackagePaths {
    /// Active version directory (contains the manifest)
    pub package_dir: PathBuf,
    /// App-private data directory, survives updates
    pub data_dir: PathBuf,
    /// Cache directory (settings, staging)
    pub cache_dir: PathBuf,
    /// Host name content is served from
    pub virtual_host: String,
    /// Documents folder override; the OS documents folder when `None`
    pub documents_dir: Option<PathBuf>,
}

impl PackagePaths {
    /// `https://<virtual host>/<relative>`
    pub fn map_virtual_path(&self, relative: &str) -> String {
        let mut rest = relative.trim().replace('\\', "/");
        loop {
            let next = rest
                .strip_prefix("./")
                .or_else(|| rest.strip_prefix('~'))
                .or_else(|| rest.strip_prefix('/'))
                .map(str::to_string);
            match next {
                Some(next) => rest = next,
                None => break,
            }
        }
        format!("https://{}/{}", self.virtual_host, rest)
    }

    /// Map a content path to a host location
    ///
    /// With `test_only`, local targets that do not exist map to `None`.
    pub fn map_local_path(&self, relative: &str, test_only: bool) -> Option<MappedPath> {
        let mapped = match PathScheme::parse(relative)? {
            PathScheme::Remote(url) => return Some(MappedPath::Remote(url)),
            PathScheme::Local(rest) => join(&self.package_dir, &rest),
            PathScheme::Parent(rest) => join(self.package_dir.parent()?, &rest),
            PathScheme::AppData(rest) => join(&self.data_dir, &rest),
            PathScheme::Documents(rest) => join(&self.documents()?, &rest),
            PathScheme::EnvExpanded(raw) => expand_env(&raw)?,
        };

        if test_only && !mapped.exists() {
            return None;
        }
        Some(MappedPath::Local(mapped))
    }

    /// Local path or `None`; remote URLs and rejected paths both map to `None`
    pub fn local_path(&self, relative: &str, test_only: bool) -> Option<PathBuf> {
        self.map_local_path(relative, test_only)?.into_local()
    }

    fn documents(&self) -> Option<PathBuf> {
        self.documents_dir.clone().or_else(dirs::document_dir)
    }
}

fn join(base: &Path, rest: &str) -> PathBuf {
    if rest.is_empty() {
        base.to_path_buf()
    } else {
        base.join(rest)
    }
}

/// Expand `%VAR%` references; unknown variables reject the path
fn expand_env(raw: &str) -> Option<PathBuf> {
    let mut missing = false;
    let expanded = ENV_VAR.replace_all(raw, |caps: &regex::Captures| {
        std::env::var(&caps[1]).unwrap_or_else(|_| {
            missing = true;
            String::new()
        })
    });
    if missing || expanded.contains('%') {
        return None;
    }
    Some(PathBuf::from(expanded.into_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serial_test::serial;
    use tempfile::TempDir;

    fn paths(root: &Path) -> PackagePaths {
        PackagePaths {
            package_dir: root.join("v1.0.0"),
            data_dir: root.join("data"),
            cache_dir: root.join("cache"),
            virtual_host: "demo.localhost".to_string(),
            documents_dir: Some(root.join("docs")),
        }
    }

    #[test]
    fn test_scheme_parsing() {
        assert_eq!(PathScheme::parse("a/b.js"), Some(PathScheme::Local("a/b.js".into())));
        assert_eq!(PathScheme::parse("./a.js"), Some(PathScheme::Local("a.js".into())));
        assert_eq!(PathScheme::parse("~/a.js"), Some(PathScheme::Local("a.js".into())));
        assert_eq!(PathScheme::parse(".asset:img/x.png"), Some(PathScheme::Local("img/x.png".into())));
        assert_eq!(PathScheme::parse(".data:db/x"), Some(PathScheme::AppData("db/x".into())));
        assert_eq!(PathScheme::parse(".doc:notes.txt"), Some(PathScheme::Documents("notes.txt".into())));
        assert_eq!(PathScheme::parse("../shared/a.js"), Some(PathScheme::Parent("shared/a.js".into())));
        assert_eq!(
            PathScheme::parse("https://x.com/a"),
            Some(PathScheme::Remote("https://x.com/a".into()))
        );
        assert_eq!(
            PathScheme::parse("%TEMP%/a"),
            Some(PathScheme::EnvExpanded("%TEMP%/a".into()))
        );
    }

    #[test]
    fn test_scheme_rejections() {
        assert_eq!(PathScheme::parse(".hidden"), None);
        assert_eq!(PathScheme::parse(".unknown:x"), None);
        assert_eq!(PathScheme::parse("a/../../etc/passwd"), None);
        assert_eq!(PathScheme::parse(".data:../escape"), None);
        assert_eq!(PathScheme::parse("C:\\Windows"), None);
    }

    #[test]
    fn test_map_virtual_path() {
        let temp_dir = TempDir::new().unwrap();
        let paths = paths(temp_dir.path());
        assert_eq!(paths.map_virtual_path("./index.html"), "https://demo.localhost/index.html");
        assert_eq!(paths.map_virtual_path("~/js/a.js"), "https://demo.localhost/js/a.js");
        assert_eq!(paths.map_virtual_path("/css/a.css"), "https://demo.localhost/css/a.css");
    }

    #[test]
    fn test_map_local_path_prefixes() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let paths = paths(root);

        assert_eq!(paths.local_path("index.html", false), Some(root.join("v1.0.0/index.html")));
        assert_eq!(paths.local_path("~index.html", false), Some(root.join("v1.0.0/index.html")));
        assert_eq!(paths.local_path(".data:state.json", false), Some(root.join("data/state.json")));
        assert_eq!(paths.local_path(".doc:report.txt", false), Some(root.join("docs/report.txt")));
        assert_eq!(paths.local_path("../app/x.js", false), Some(root.join("app/x.js")));
        assert_eq!(paths.local_path(".secret", false), None);
        assert_eq!(
            paths.map_local_path("https://cdn.example.com/a.js", false),
            Some(MappedPath::Remote("https://cdn.example.com/a.js".into()))
        );
    }

    #[test]
    fn test_map_local_path_test_only() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let paths = paths(root);
        std::fs::create_dir_all(root.join("v1.0.0")).unwrap();
        std::fs::write(root.join("v1.0.0/exists.js"), "x").unwrap();

        assert!(paths.local_path("exists.js", true).is_some());
        assert!(paths.local_path("missing.js", true).is_none());
    }

    #[test]
    #[serial]
    fn test_env_expansion() {
        let temp_dir = TempDir::new().unwrap();
        let paths = paths(temp_dir.path());
        std::env::set_var("LOCALWEB_TEST_DIR", "/opt/localweb");

        assert_eq!(
            paths.local_path("%LOCALWEB_TEST_DIR%/cache", false),
            Some(PathBuf::from("/opt/localweb/cache"))
        );
        assert_eq!(paths.local_path("%LOCALWEB_UNSET_VARIABLE%/x", false), None);

        std::env::remove_var("LOCALWEB_TEST_DIR");
    }
}
