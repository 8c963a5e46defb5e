//! Version directory resolution
//!
//! A package root holds one or more `v<version>` directories, an optional
//! `app` fallback, plus `data/` and `cache/`. Resolution order:
//!
//! 1. the version recorded in `cache/settings.json`, if its directory exists
//! 2. the most recently created `v*` directory
//! 3. `app`

use crate::package::error::PackageError;
use crate::package::settings::PackageSettings;
use crate::package::version::PackageVersion;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info, warn};

/// Fallback directory name for unversioned packages
pub const FALLBACK_DIR: &str = "app";
pub const DATA_DIR: &str = "data";
pub const CACHE_DIR: &str = "cache";

/// How the active directory was chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedFrom {
    /// Recorded in settings.json
    Recorded,
    /// Newest `v*` directory by creation time
    Newest,
    /// The `app` directory
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedVersion {
    pub dir: PathBuf,
    /// Version taken from the directory name; `None` for `app`
    pub version: Option<String>,
    pub source: ResolvedFrom,
}

/// Resolves the active version directory of one package root
#[derive(Debug, Clone)]
pub struct PackageResolver {
    root: PathBuf,
}

impl PackageResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn data_dir(&self) -> PathBuf {
        self.root.join(DATA_DIR)
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.root.join(CACHE_DIR)
    }

    /// Directory that holds `version`
    pub fn version_dir(&self, version: &str) -> Option<PathBuf> {
        PackageVersion::parse(version).map(|v| self.root.join(v.dir_name()))
    }

    pub fn settings(&self) -> PackageSettings {
        PackageSettings::load(&self.cache_dir())
    }

    /// Pick the directory to activate
    pub fn resolve(&self) -> Result<ResolvedVersion, PackageError> {
        if !self.root.is_dir() {
            return Err(PackageError::DirectoryNotFound {
                root: self.root.clone(),
            });
        }

        let settings = self.settings();
        if let Some(version) = settings.version.as_deref() {
            match self.version_dir(version) {
                Some(dir) if dir.is_dir() => {
                    debug!("Resolved recorded version {} at {:?}", version, dir);
                    return Ok(ResolvedVersion {
                        dir,
                        version: Some(version.to_string()),
                        source: ResolvedFrom::Recorded,
                    });
                }
                _ => warn!(
                    "Recorded version {} has no directory under {:?}, falling back",
                    version, self.root
                ),
            }
        }

        if let Some((dir, version)) = self.newest_version_dir()? {
            debug!("Resolved newest version directory {:?}", dir);
            return Ok(ResolvedVersion {
                dir,
                version: Some(version),
                source: ResolvedFrom::Newest,
            });
        }

        let fallback = self.root.join(FALLBACK_DIR);
        if fallback.is_dir() {
            return Ok(ResolvedVersion {
                dir: fallback,
                version: None,
                source: ResolvedFrom::Fallback,
            });
        }

        Err(PackageError::DirectoryNotFound {
            root: self.root.clone(),
        })
    }

    /// Every `v*` directory with its version string
    pub fn version_dirs(&self) -> Result<Vec<(PathBuf, String)>, PackageError> {
        let entries = std::fs::read_dir(&self.root).map_err(|e| PackageError::io(&self.root, e))?;

        let mut dirs = Vec::new();
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if let Some(version) = name.strip_prefix('v').filter(|v| !v.is_empty()) {
                dirs.push((path, version.to_string()));
            }
        }
        Ok(dirs)
    }

    fn newest_version_dir(&self) -> Result<Option<(PathBuf, String)>, PackageError> {
        let newest = self
            .version_dirs()?
            .into_iter()
            .map(|(dir, version)| (created_at(&dir), dir, version))
            .max_by(|a, b| {
                a.0.cmp(&b.0).then_with(|| {
                    PackageVersion::parse(&a.2).cmp(&PackageVersion::parse(&b.2))
                })
            })
            .map(|(_, dir, version)| (dir, version));
        Ok(newest)
    }

    /// Remove the directory of a superseded install, if it is not active
    ///
    /// Best effort: failures are logged and ignored.
    pub fn cleanup_stale(&self, active_dir: &Path) {
        let settings = self.settings();
        let Some(old) = settings.install.old.as_deref() else {
            return;
        };
        let Some(old_dir) = self.version_dir(old) else {
            return;
        };
        if old_dir == active_dir || !old_dir.exists() {
            return;
        }

        match std::fs::remove_dir_all(&old_dir) {
            Ok(()) => info!("Removed superseded version directory {:?}", old_dir),
            Err(e) => warn!("Failed to remove stale directory {:?}: {}", old_dir, e),
        }
    }
}

/// Creation time, falling back to modification time where unsupported
fn created_at(path: &Path) -> Option<SystemTime> {
    let metadata = std::fs::metadata(path).ok()?;
    metadata.created().or_else(|_| metadata.modified()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_fallback_and_missing() {
        let temp_dir = TempDir::new().unwrap();
        let resolver = PackageResolver::new(temp_dir.path());
        assert!(matches!(
            resolver.resolve(),
            Err(PackageError::DirectoryNotFound { .. })
        ));

        std::fs::create_dir(temp_dir.path().join("app")).unwrap();
        let resolved = resolver.resolve().unwrap();
        assert_eq!(resolved.source, ResolvedFrom::Fallback);
        assert_eq!(resolved.version, None);
    }

    #[test]
    fn test_version_dir_beats_fallback() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir(temp_dir.path().join("app")).unwrap();
        std::fs::create_dir(temp_dir.path().join("v1.0.0")).unwrap();

        let resolved = PackageResolver::new(temp_dir.path()).resolve().unwrap();
        assert_eq!(resolved.source, ResolvedFrom::Newest);
        assert_eq!(resolved.version.as_deref(), Some("1.0.0"));
    }

    #[test]
    fn test_recorded_version_wins() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        std::fs::create_dir(root.join("v1.0.0")).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        std::fs::create_dir(root.join("v2.0.0")).unwrap();

        let resolver = PackageResolver::new(root);
        PackageSettings::committed("1.0.0", None)
            .save(&resolver.cache_dir())
            .unwrap();

        let resolved = resolver.resolve().unwrap();
        assert_eq!(resolved.source, ResolvedFrom::Recorded);
        assert_eq!(resolved.dir, root.join("v1.0.0"));
    }

    #[test]
    fn test_recorded_version_without_directory_falls_back() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        std::fs::create_dir(root.join("v1.0.0")).unwrap();

        let resolver = PackageResolver::new(root);
        PackageSettings::committed("3.0.0", None)
            .save(&resolver.cache_dir())
            .unwrap();

        let resolved = resolver.resolve().unwrap();
        assert_eq!(resolved.source, ResolvedFrom::Newest);
        assert_eq!(resolved.dir, root.join("v1.0.0"));
    }

    #[test]
    fn test_cleanup_stale() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        std::fs::create_dir(root.join("v1.0.0")).unwrap();
        std::fs::create_dir(root.join("v1.1.0")).unwrap();

        let resolver = PackageResolver::new(root);
        PackageSettings::committed("1.1.0", Some("1.0.0"))
            .save(&resolver.cache_dir())
            .unwrap();

        let resolved = resolver.resolve().unwrap();
        resolver.cleanup_stale(&resolved.dir);

        assert!(!root.join("v1.0.0").exists());
        assert!(root.join("v1.1.0").exists());
    }
}
