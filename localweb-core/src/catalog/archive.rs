//! Package archives (`.tar.gz`)
//!
//! A package archive holds one version directory: the manifest and signature
//! list either at the archive root or inside a single top-level directory.

use crate::catalog::error::UpdateError;
use crate::trust::{sign_directory, FileCollection, SignatureError, SignatureProvider};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

/// Extract gzip tarball bytes into `dest`
///
/// Entries that would land outside `dest` are skipped by `tar`.
pub fn extract_archive(bytes: &[u8], dest: &Path) -> Result<(), UpdateError> {
    std::fs::create_dir_all(dest).map_err(|e| UpdateError::io(dest, e))?;

    let gz_decoder = GzDecoder::new(Cursor::new(bytes));
    let mut archive = tar::Archive::new(gz_decoder);
    archive.set_preserve_permissions(false);
    archive.unpack(dest).map_err(|e| UpdateError::Archive {
        reason: e.to_string(),
    })?;

    debug!("Extracted archive into {:?}", dest);
    Ok(())
}

/// Directory containing `manifest_file`: `dir` itself or its only subdirectory
pub fn find_manifest_root(dir: &Path, manifest_file: &str) -> Result<PathBuf, UpdateError> {
    if dir.join(manifest_file).is_file() {
        return Ok(dir.to_path_buf());
    }

    let subdirs: Vec<PathBuf> = std::fs::read_dir(dir)
        .map_err(|e| UpdateError::io(dir, e))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();

    match subdirs.as_slice() {
        [single] if single.join(manifest_file).is_file() => Ok(single.clone()),
        _ => Err(UpdateError::ManifestRootNotFound {
            manifest: manifest_file.to_string(),
        }),
    }
}

/// Write `dir` as a gzip tarball with the directory contents at the root
pub fn pack_directory(dir: &Path, out: &Path) -> Result<u64, UpdateError> {
    if out.starts_with(dir) {
        return Err(UpdateError::Archive {
            reason: format!("output {} must be outside {}", out.display(), dir.display()),
        });
    }
    if let Some(parent) = out.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| UpdateError::io(parent, e))?;
    }

    let file = std::fs::File::create(out).map_err(|e| UpdateError::io(out, e))?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(false);
    builder
        .append_dir_all(".", dir)
        .map_err(|e| UpdateError::io(dir, e))?;

    let encoder = builder.into_inner().map_err(|e| UpdateError::io(out, e))?;
    encoder.finish().map_err(|e| UpdateError::io(out, e))?;

    let size = std::fs::metadata(out).map_err(|e| UpdateError::io(out, e))?.len();
    info!("Packed {} into {} ({} bytes)", dir.display(), out.display(), size);
    Ok(size)
}

/// Sign `dir` and pack it into `out`
pub fn package_directory(
    dir: &Path,
    provider: &dyn SignatureProvider,
    manifest_file: &str,
    files_file: &str,
    out: &Path,
) -> Result<FileCollection, UpdateError> {
    let collection = sign_directory(dir, provider, manifest_file, files_file)
        .map_err(|e: SignatureError| UpdateError::Archive {
            reason: e.to_string(),
        })?;
    pack_directory(dir, out)?;
    Ok(collection)
}

/// `sha256:<hex>` digest of archive bytes
pub fn archive_digest(bytes: &[u8]) -> String {
    format!("sha256:{:x}", Sha256::digest(bytes))
}

/// Check archive bytes against an expected `sha256:<hex>` digest
pub fn verify_digest(bytes: &[u8], expected: &str) -> Result<(), UpdateError> {
    let actual = archive_digest(bytes);
    if !actual.eq_ignore_ascii_case(expected.trim()) {
        return Err(UpdateError::DigestMismatch {
            expected: expected.to_string(),
            actual,
        });
    }
    Ok(())
}

/// Recursively copy `src` into `dest` (created if missing)
pub fn copy_dir(src: &Path, dest: &Path) -> Result<u64, UpdateError> {
    let mut copied = 0;
    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry.map_err(|e| UpdateError::Archive {
            reason: e.to_string(),
        })?;
        let Ok(relative) = entry.path().strip_prefix(src) else {
            continue;
        };
        let target = dest.join(relative);

        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target).map_err(|e| UpdateError::io(&target, e))?;
        } else if entry.file_type().is_file() {
            std::fs::copy(entry.path(), &target).map_err(|e| UpdateError::io(&target, e))?;
            copied += 1;
        }
    }
    Ok(copied)
}
