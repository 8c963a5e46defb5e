//! Per-package settings (`cache/settings.json`)
//!
//! Records which version is active and which version it replaced. Writing
//! this file is the commit point of an update: resolution follows it, and
//! the superseded directory is only removed after it is on disk.

use crate::package::error::PackageError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;
use tracing::{debug, warn};

/// File name of the settings inside the cache directory
pub const SETTINGS_FILE: &str = "settings.json";

/// Bookkeeping for the last install
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstallRecord {
    /// Version that was active before the last install
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old: Option<String>,

    /// When the last install committed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub done: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PackageSettings {
    /// Active version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default)]
    pub install: InstallRecord,
}

impl PackageSettings {
    /// Load settings; a missing or unreadable file yields the defaults
    pub fn load(cache_dir: &Path) -> Self {
        let path = cache_dir.join(SETTINGS_FILE);
        let content = match std::fs::read(&path) {
            Ok(content) => content,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Failed to read {:?}: {}", path, e);
                }
                return Self::default();
            }
        };

        serde_json::from_slice(&content).unwrap_or_else(|e| {
            warn!("Ignoring malformed package settings {:?}: {}", path, e);
            Self::default()
        })
    }

    /// Atomically replace the settings file
    pub fn save(&self, cache_dir: &Path) -> Result<(), PackageError> {
        let path = cache_dir.join(SETTINGS_FILE);
        let write_err = |source| PackageError::SettingsWrite {
            path: path.clone(),
            source,
        };

        std::fs::create_dir_all(cache_dir).map_err(write_err)?;
        let content = serde_json::to_vec_pretty(self).map_err(|e| write_err(e.into()))?;

        let mut temp = tempfile::NamedTempFile::new_in(cache_dir).map_err(write_err)?;
        temp.write_all(&content).map_err(write_err)?;
        temp.as_file().sync_all().map_err(write_err)?;
        temp.persist(&path).map_err(|e| write_err(e.error))?;

        debug!("Wrote package settings to {:?}", path);
        Ok(())
    }

    /// Record a committed install of `version` replacing `old`
    pub fn committed(version: &str, old: Option<&str>) -> Self {
        Self {
            version: Some(version.to_string()),
            install: InstallRecord {
                old: old.map(str::to_string),
                done: Some(Utc::now()),
            },
        }
    }
}
