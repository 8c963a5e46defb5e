//! Package manifest (`localwebapp.json`)
//!
//! The manifest identifies the package, names its entry page, binds data and
//! string resources, and declares which hosts it may run on.

use crate::config::HostConfig;
use crate::package::error::PackageError;
use crate::package::version::in_range;
use crate::trust::contained_path;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Default manifest file name
pub const DEFAULT_MANIFEST_NAME: &str = "localwebapp.json";

/// A host-compatibility constraint
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostBinding {
    /// Host identifier
    pub id: String,

    /// Host kind, informational
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    /// Minimum host version (inclusive)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<String>,

    /// Maximum host version (inclusive)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<String>,
}

impl HostBinding {
    /// Whether this binding admits the given host
    pub fn admits(&self, host_id: &str, host_version: &str) -> bool {
        self.id.eq_ignore_ascii_case(host_id)
            && in_range(host_version, self.min.as_deref(), self.max.as_deref())
    }
}

/// The package manifest
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    /// Unique package id
    #[serde(default)]
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,

    /// Package version
    #[serde(default)]
    pub version: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub copyright: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,

    /// Relative path of the home page
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry: Option<String>,

    /// Binary resources: name -> relative path
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data_res: BTreeMap<String, String>,

    /// String resources: name -> relative path
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub str_res: BTreeMap<String, String>,

    /// Host-compatibility constraints; empty admits every host
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub host: Vec<HostBinding>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    /// Free-form metadata
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub meta: serde_json::Value,
}

/// Resources bound by the manifest, read at load time
#[derive(Debug, Clone, Default)]
pub struct BoundResources {
    pub data: HashMap<String, Vec<u8>>,
    pub strings: HashMap<String, String>,
}

impl Manifest {
    /// Parse manifest JSON
    pub fn from_json(content: &[u8], path: &Path) -> Result<Self, PackageError> {
        serde_json::from_slice(content).map_err(|e| PackageError::ManifestFormat {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Load and validate the manifest in a version directory
    pub async fn load(
        version_dir: &Path,
        manifest_file: &str,
        expected_id: &str,
    ) -> Result<Self, PackageError> {
        let path = version_dir.join(manifest_file);
        let content = match tokio::fs::read(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(PackageError::ManifestNotFound { path });
            }
            Err(e) => return Err(PackageError::io(&path, e)),
        };

        let manifest = Self::from_json(&content, &path)?;
        manifest.validate(&path, expected_id)?;

        debug!("Loaded manifest {} v{} from {:?}", manifest.id, manifest.version, path);
        Ok(manifest)
    }

    /// Validate id presence and match
    pub fn validate(&self, path: &Path, expected_id: &str) -> Result<(), PackageError> {
        if self.id.trim().is_empty() {
            return Err(PackageError::ManifestFormat {
                path: path.to_path_buf(),
                reason: "id is blank".to_string(),
            });
        }
        if !self.id.trim().eq_ignore_ascii_case(expected_id.trim()) {
            return Err(PackageError::IdMismatch {
                expected: expected_id.to_string(),
                actual: self.id.clone(),
            });
        }
        Ok(())
    }

    /// Check the host bindings against the running host
    pub fn check_host(&self, config: &HostConfig) -> Result<(), PackageError> {
        if self.host.is_empty()
            || self
                .host
                .iter()
                .any(|binding| binding.admits(&config.host_id, &config.host_version))
        {
            return Ok(());
        }

        let err = PackageError::IncompatibleHost {
            package: self.id.clone(),
            host_id: config.host_id.clone(),
            host_version: config.host_version.clone(),
        };
        tracing::warn!(target: "security", "{}", err);
        Err(err)
    }

    /// Read `dataRes`/`strRes` bindings
    ///
    /// Missing or unreadable files are skipped, as are paths that leave the
    /// version directory.
    pub async fn bind_resources(&self, version_dir: &Path) -> BoundResources {
        let mut resources = BoundResources::default();

        for (name, rel) in &self.data_res {
            let Some(path) = resource_path(version_dir, name, rel) else {
                continue;
            };
            match tokio::fs::read(path).await {
                Ok(bytes) => {
                    resources.data.insert(name.clone(), bytes);
                }
                Err(e) => debug!("Skipping data resource '{}' ({}): {}", name, rel, e),
            }
        }

        for (name, rel) in &self.str_res {
            let Some(path) = resource_path(version_dir, name, rel) else {
                continue;
            };
            match tokio::fs::read_to_string(path).await {
                Ok(text) => {
                    resources.strings.insert(name.clone(), text);
                }
                Err(e) => debug!("Skipping string resource '{}' ({}): {}", name, rel, e),
            }
        }

        resources
    }
}

fn resource_path(version_dir: &Path, name: &str, rel: &str) -> Option<PathBuf> {
    let Some(rel) = contained_path(rel) else {
        warn!(target: "security", "Ignoring resource '{}' outside the package: {}", name, rel);
        return None;
    };
    Some(version_dir.join(rel))
}
