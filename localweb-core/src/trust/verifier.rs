//! File and package verification
//!
//! [`FileVerifier`] checks one signature-list entry. [`VerificationEngine`]
//! checks a whole version directory: every listed file must verify, and
//! every source file on disk must be listed.

use crate::package::paths::PackagePaths;
use crate::trust::collection::{enumerate_source_files, FileCollection, FileSignatureEntry};
use crate::trust::error::SignatureError;
use crate::trust::signer::SignatureProvider;
use crate::trust::source::FileSource;
use futures::stream::{self, StreamExt};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// How integrity failures are reported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VerifyMode {
    /// Integrity failures are errors
    #[default]
    Strict,
    /// Integrity failures only clear the verified flag
    SkipErrors,
}

/// Verifies single signature-list entries
#[derive(Clone)]
pub struct FileVerifier {
    provider: Arc<dyn SignatureProvider>,
}

impl FileVerifier {
    pub fn new(provider: Arc<dyn SignatureProvider>) -> Self {
        Self { provider }
    }

    /// Check one entry against the files of a package
    ///
    /// Online entries are trusted to their origin. Embedded and localhost
    /// entries must exist on disk and match their signature; an entry without
    /// a signature is only valid for an empty file.
    pub async fn verify(&self, entry: &FileSignatureEntry, paths: &PackagePaths) -> bool {
        let relative = match entry.source() {
            FileSource::Online { url } => {
                trace!("Skipping online entry {}", url);
                return true;
            }
            FileSource::Embedded { path } | FileSource::Localhost { path, .. } => path,
            other => {
                warn!("Unsupported signature-list entry '{}' ({})", entry.src, other.kind());
                return false;
            }
        };

        // Same join as the signing pass; content path schemes do not apply here
        let path = paths.package_dir.join(&relative);
        match tokio::fs::symlink_metadata(&path).await {
            Ok(metadata) if metadata.file_type().is_symlink() => {
                warn!(target: "security", "Refusing symlinked entry '{}'", entry.src);
                return false;
            }
            _ => {}
        }

        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!("Cannot read {:?} for verification: {}", path, e);
                return false;
            }
        };

        if !entry.has_signature() {
            return bytes.is_empty();
        }

        match entry.signature_bytes() {
            Some(signature) => self.provider.verify(&bytes, &signature),
            None => false,
        }
    }
}

/// Verifies every file of a version directory
#[derive(Clone)]
pub struct VerificationEngine {
    verifier: FileVerifier,
    concurrency: usize,
}

impl VerificationEngine {
    pub fn new(provider: Arc<dyn SignatureProvider>, concurrency: usize) -> Self {
        Self {
            verifier: FileVerifier::new(provider),
            concurrency: concurrency.max(1),
        }
    }

    /// Verify the package in `paths.package_dir`
    ///
    /// Returns `Ok(true)` when the package is fully verified. In
    /// [`VerifyMode::SkipErrors`] integrity failures return `Ok(false)`.
    /// Cancellation is always an error.
    pub async fn verify_all(
        &self,
        paths: &PackagePaths,
        manifest_file: &str,
        files_file: &str,
        mode: VerifyMode,
        cancel: &CancellationToken,
    ) -> Result<bool, SignatureError> {
        match self.check(paths, manifest_file, files_file, cancel).await {
            Ok(()) => {
                info!("Verified package at {:?}", paths.package_dir);
                Ok(true)
            }
            Err(SignatureError::Cancelled) => Err(SignatureError::Cancelled),
            Err(e) => {
                e.log_if_security_critical();
                match mode {
                    VerifyMode::SkipErrors => {
                        warn!("Package at {:?} is not verified: {}", paths.package_dir, e);
                        Ok(false)
                    }
                    VerifyMode::Strict => Err(e),
                }
            }
        }
    }

    async fn check(
        &self,
        paths: &PackagePaths,
        manifest_file: &str,
        files_file: &str,
        cancel: &CancellationToken,
    ) -> Result<(), SignatureError> {
        let list_path = paths.package_dir.join(files_file);
        let collection = FileCollection::load(&list_path)?
            .ok_or_else(|| SignatureError::ListMissing { path: list_path })?;

        if collection.find(manifest_file).is_none() {
            return Err(SignatureError::ManifestSignatureMissing {
                manifest: manifest_file.to_string(),
            });
        }

        let mut unaccounted: BTreeSet<String> =
            enumerate_source_files(&paths.package_dir).into_iter().collect();

        let checks = stream::iter(collection.files.iter().enumerate())
            .map(|(index, entry)| async move {
                (index, self.verifier.verify(entry, paths).await)
            })
            .buffer_unordered(self.concurrency)
            .take_until(cancel.cancelled())
            .collect::<Vec<_>>();
        let mut results = checks.await;

        if cancel.is_cancelled() {
            return Err(SignatureError::Cancelled);
        }

        results.sort_by_key(|(index, _)| *index);
        for (index, passed) in results {
            let entry = &collection.files[index];
            if !passed {
                return Err(SignatureError::Incorrect {
                    src: entry.src.clone(),
                });
            }
            if let Some(path) = entry.source().local_path() {
                unaccounted.remove(path);
            }
        }

        if !unaccounted.is_empty() {
            return Err(SignatureError::Partial {
                unaccounted: unaccounted.into_iter().collect(),
            });
        }

        debug!(
            "All {} signature-list entries verified for {:?}",
            collection.len(),
            paths.package_dir
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trust::collection::sign_directory;
    use crate::trust::signer::Ed25519Provider;
    use crate::trust::SignatureErrorKind;
    use std::path::Path;
    use tempfile::TempDir;

    const MANIFEST: &str = "localwebapp.json";
    const FILES: &str = "localwebapp.files.json";

    fn paths(dir: &Path) -> PackagePaths {
        PackagePaths {
            package_dir: dir.to_path_buf(),
            data_dir: dir.join("data"),
            cache_dir: dir.join("cache"),
            virtual_host: "demo.localhost".to_string(),
            documents_dir: None,
        }
    }

    fn signed_package() -> (TempDir, Arc<dyn SignatureProvider>) {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        std::fs::write(dir.join(MANIFEST), r#"{"id":"demo","version":"1.0"}"#).unwrap();
        std::fs::write(dir.join("index.html"), "<html></html>").unwrap();
        std::fs::create_dir_all(dir.join("js")).unwrap();
        std::fs::write(dir.join("js/app.js"), "console.log(1)").unwrap();
        std::fs::write(dir.join("empty.css"), "").unwrap();

        let (provider, _) = Ed25519Provider::generate();
        sign_directory(dir, &provider, MANIFEST, FILES).unwrap();
        (temp_dir, Arc::new(provider))
    }

    async fn run(
        dir: &Path,
        provider: Arc<dyn SignatureProvider>,
        mode: VerifyMode,
    ) -> Result<bool, SignatureError> {
        VerificationEngine::new(provider, 2)
            .verify_all(&paths(dir), MANIFEST, FILES, mode, &CancellationToken::new())
            .await
    }

    #[tokio::test]
    async fn test_signed_package_verifies() {
        let (temp_dir, provider) = signed_package();
        assert!(run(temp_dir.path(), provider, VerifyMode::Strict).await.unwrap());
    }

    #[tokio::test]
    async fn test_mutated_byte_is_incorrect() {
        let (temp_dir, provider) = signed_package();
        std::fs::write(temp_dir.path().join("js/app.js"), "console.log(2)").unwrap();

        let err = run(temp_dir.path(), provider.clone(), VerifyMode::Strict)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), Some(SignatureErrorKind::Incorrect));
        assert!(!run(temp_dir.path(), provider, VerifyMode::SkipErrors).await.unwrap());
    }

    #[tokio::test]
    async fn test_unlisted_source_file_is_partial() {
        let (temp_dir, provider) = signed_package();
        std::fs::write(temp_dir.path().join("injected.js"), "evil()").unwrap();
        // JSON files are not covered
        std::fs::write(temp_dir.path().join("extra.json"), "{}").unwrap();

        let err = run(temp_dir.path(), provider, VerifyMode::Strict).await.unwrap_err();
        match err {
            SignatureError::Partial { unaccounted } => assert_eq!(unaccounted, vec!["injected.js"]),
            other => panic!("expected Partial, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_empty_file_gaining_content_fails() {
        let (temp_dir, provider) = signed_package();
        std::fs::write(temp_dir.path().join("empty.css"), "body{}").unwrap();

        let err = run(temp_dir.path(), provider, VerifyMode::Strict).await.unwrap_err();
        assert!(matches!(err, SignatureError::Incorrect { ref src } if src == "empty.css"));
    }

    #[tokio::test]
    async fn test_declared_file_missing_is_incorrect() {
        let (temp_dir, provider) = signed_package();
        std::fs::remove_file(temp_dir.path().join("index.html")).unwrap();

        let err = run(temp_dir.path(), provider, VerifyMode::Strict).await.unwrap_err();
        assert_eq!(err.kind(), Some(SignatureErrorKind::Incorrect));
    }

    #[tokio::test]
    async fn test_missing_list_and_manifest_entry() {
        let (temp_dir, provider) = signed_package();
        let list_path = temp_dir.path().join(FILES);

        let mut collection = FileCollection::load(&list_path).unwrap().unwrap();
        collection.files.retain(|f| f.src != MANIFEST);
        collection.save(&list_path).unwrap();
        let err = run(temp_dir.path(), provider.clone(), VerifyMode::Strict)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), Some(SignatureErrorKind::ManifestMissing));

        std::fs::remove_file(&list_path).unwrap();
        let err = run(temp_dir.path(), provider.clone(), VerifyMode::Strict)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), Some(SignatureErrorKind::ListMissing));
        assert!(!run(temp_dir.path(), provider, VerifyMode::SkipErrors).await.unwrap());
    }

    #[tokio::test]
    async fn test_wrong_key_fails() {
        let (temp_dir, _) = signed_package();
        let (other, _) = Ed25519Provider::generate();
        assert!(!run(temp_dir.path(), Arc::new(other), VerifyMode::SkipErrors)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_online_and_unsupported_entries() {
        let temp_dir = TempDir::new().unwrap();
        let (provider, _) = Ed25519Provider::generate();
        let verifier = FileVerifier::new(Arc::new(provider));
        let paths = paths(temp_dir.path());

        let online = FileSignatureEntry::new("//cdn.example.com/lib.js", None);
        assert!(verifier.verify(&online, &paths).await);

        let escape = FileSignatureEntry::new("../outside.js", Some("AAAA".into()));
        assert!(!verifier.verify(&escape, &paths).await);

        let empty = FileSignatureEntry::new("", None);
        assert!(!verifier.verify(&empty, &paths).await);
    }

    #[tokio::test]
    async fn test_localhost_entry_maps_to_package_file() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("page.html"), "hello").unwrap();

        let (provider, _) = Ed25519Provider::generate();
        let sign = crate::trust::encode_signature(&provider.sign(b"hello").unwrap());
        let verifier = FileVerifier::new(Arc::new(provider));

        let entry = FileSignatureEntry::new("//demo.localhost/page.html", Some(sign));
        assert!(verifier.verify(&entry, &paths(temp_dir.path())).await);
    }

    #[tokio::test]
    async fn test_cancelled_verification() {
        let (temp_dir, provider) = signed_package();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = VerificationEngine::new(provider, 1)
            .verify_all(
                &paths(temp_dir.path()),
                MANIFEST,
                FILES,
                VerifyMode::SkipErrors,
                &cancel,
            )
            .await;
        assert!(matches!(result, Err(SignatureError::Cancelled)));
    }
}
