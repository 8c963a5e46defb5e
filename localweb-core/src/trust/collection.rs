//! Signature list (`localwebapp.files.json`) and the signing pass that produces it

use crate::trust::error::SignatureError;
use crate::trust::signer::{decode_signature, encode_signature, SignatureProvider};
use crate::trust::source::{classify, normalize_embedded, FileSource};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Extensions of files that must be covered by the signature list
///
/// JSON is intentionally absent: data payloads are bound through the manifest.
pub const SOURCE_EXTENSIONS: &[&str] = &["html", "htm", "js", "ts", "css"];

/// One signed file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileSignatureEntry {
    /// Normalized source path
    pub src: String,

    /// Base64url signature; absent for intentionally empty files
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sign: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl FileSignatureEntry {
    pub fn new(src: impl Into<String>, sign: Option<String>) -> Self {
        Self {
            src: src.into(),
            sign,
            description: None,
        }
    }

    /// Classification of `src`
    pub fn source(&self) -> FileSource {
        classify(&self.src)
    }

    /// Whether the entry declares a signature at all
    pub fn has_signature(&self) -> bool {
        self.sign.as_deref().is_some_and(|s| !s.trim().is_empty())
    }

    /// Decoded signature bytes, `None` when absent or not Base64url
    pub fn signature_bytes(&self) -> Option<Vec<u8>> {
        self.sign
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .and_then(decode_signature)
    }
}

/// Ordered list of signed files
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileCollection {
    #[serde(default)]
    pub files: Vec<FileSignatureEntry>,
}

impl FileCollection {
    /// Load the list, returning `None` when the file does not exist
    pub fn load(path: &Path) -> Result<Option<Self>, SignatureError> {
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read(path).map_err(|e| SignatureError::ListReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        serde_json::from_slice(&content)
            .map(Some)
            .map_err(|e| SignatureError::ListParseError { source: e })
    }

    /// Write the list as pretty JSON
    pub fn save(&self, path: &Path) -> Result<(), SignatureError> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| SignatureError::ListParseError { source: e })?;

        std::fs::write(path, content).map_err(|e| SignatureError::ListWriteError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Find the entry for a package-relative path
    pub fn find(&self, path: &str) -> Option<&FileSignatureEntry> {
        let wanted = normalize_embedded(path);
        self.files
            .iter()
            .find(|entry| entry.source().local_path() == Some(wanted.as_str()))
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Whether a path has one of the signed source extensions
pub fn is_source_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| SOURCE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Every source file under `dir`, as sorted normalized relative paths
///
/// Symlinks are listed whatever they point at, so a link to a file or folder
/// outside the signed tree can never be accounted for.
pub fn enumerate_source_files(dir: &Path) -> Vec<String> {
    let mut files = Vec::new();

    for entry in WalkDir::new(dir).min_depth(1).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable entry while scanning {:?}: {}", dir, e);
                continue;
            }
        };

        let listed = entry.path_is_symlink()
            || (entry.file_type().is_file() && is_source_file(entry.path()));
        if !listed {
            continue;
        }

        if let Ok(relative) = entry.path().strip_prefix(dir) {
            files.push(relative_to_src(relative));
        }
    }

    files.sort();
    files
}

/// Render a relative path in signature-list form
pub fn relative_to_src(relative: &Path) -> String {
    let joined = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
    normalize_embedded(&joined)
}

/// Sign every source file in `dir` and write the signature list
///
/// The manifest is always the first entry. Files that cannot be read are
/// left out of the list (and will therefore fail verification later). Empty
/// files get an entry without a signature.
pub fn sign_directory(
    dir: &Path,
    provider: &dyn SignatureProvider,
    manifest_file: &str,
    output_file: &str,
) -> Result<FileCollection, SignatureError> {
    info!("Signing package directory: {}", dir.display());

    let manifest_src = normalize_embedded(manifest_file);
    let mut targets = vec![manifest_src.clone()];
    targets.extend(
        enumerate_source_files(dir)
            .into_iter()
            .filter(|src| *src != manifest_src),
    );

    let mut collection = FileCollection::default();
    for src in targets {
        let path = dir.join(&src);
        if path.symlink_metadata().is_ok_and(|m| m.file_type().is_symlink()) {
            warn!("Omitting symlink '{}' from signature list", src);
            continue;
        }
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Omitting '{}' from signature list: {}", src, e);
                continue;
            }
        };

        let sign = if bytes.is_empty() {
            debug!("'{}' is empty, recording without signature", src);
            None
        } else {
            Some(encode_signature(&provider.sign(&bytes)?))
        };

        collection.files.push(FileSignatureEntry::new(src, sign));
    }

    collection.save(&dir.join(output_file))?;

    info!(
        "Wrote {} signature(s) to {}",
        collection.len(),
        dir.join(output_file).display()
    );
    Ok(collection)
}
