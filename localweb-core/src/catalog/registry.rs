//! Per-user package registry (`registry.json`)
//!
//! Remembers which packages are installed, where they live, how to check
//! them for updates and which key verifies them. Dev packages are kept in a
//! separate, capped list.

use crate::catalog::descriptor::UpdateSource;
use crate::config::config_dir;
use crate::package::Manifest;
use crate::trust::{SignatureAlgorithm, SignatureError, SignatureProvider};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Registry file name inside the config directory
pub const REGISTRY_FILE: &str = "registry.json";

/// A registered package
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageRegistryEntry {
    pub id: String,

    #[serde(default)]
    pub disabled: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,

    /// Package root on disk
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update: Option<UpdateSource>,

    pub algorithm: SignatureAlgorithm,

    /// Base64url verification key
    pub public_key: String,

    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
}

impl PackageRegistryEntry {
    pub fn new(id: impl Into<String>, algorithm: SignatureAlgorithm, public_key: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            disabled: false,
            version: None,
            description: None,
            publisher: None,
            icon: None,
            root: None,
            update: None,
            algorithm,
            public_key: public_key.into(),
            created: now,
            modified: now,
        }
    }

    /// Copy display metadata from a manifest
    pub fn mirror_manifest(&mut self, manifest: &Manifest) {
        self.version = Some(manifest.version.clone()).filter(|v| !v.is_empty());
        self.description = manifest.description.clone();
        self.publisher = manifest.publisher.clone();
        self.icon = manifest.icon.clone();
    }

    /// Verifying provider for this package
    pub fn provider(&self) -> Result<Arc<dyn SignatureProvider>, SignatureError> {
        self.algorithm.provider(&self.public_key)
    }
}

/// The registry file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PackageRegistry {
    #[serde(default)]
    pub apps: Vec<PackageRegistryEntry>,

    #[serde(default)]
    pub devapps: Vec<PackageRegistryEntry>,

    #[serde(skip)]
    path: PathBuf,
}

impl PackageRegistry {
    /// Load the registry from the per-user config directory
    pub fn load() -> Result<Self> {
        Self::load_from_path(Self::default_path()?)
    }

    /// Load the registry, or start an empty one if the file does not exist
    pub fn load_from_path(path: PathBuf) -> Result<Self> {
        let mut registry: PackageRegistry = if path.exists() {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read registry: {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse registry: {}", path.display()))?
        } else {
            debug!("No registry at {:?}, starting empty", path);
            PackageRegistry::default()
        };
        registry.path = path;
        Ok(registry)
    }

    pub fn default_path() -> Result<PathBuf> {
        config_dir()
            .map(|dir| dir.join(REGISTRY_FILE))
            .context("Could not determine config directory")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let content = serde_json::to_string_pretty(self).context("Failed to serialize registry")?;
        std::fs::write(&self.path, content)
            .with_context(|| format!("Failed to write registry: {}", self.path.display()))?;

        debug!("Saved registry to {:?}", self.path);
        Ok(())
    }

    /// Find an installed or dev package by id (case-insensitive)
    pub fn find(&self, id: &str) -> Option<&PackageRegistryEntry> {
        self.apps
            .iter()
            .chain(self.devapps.iter())
            .find(|e| e.id.eq_ignore_ascii_case(id))
    }

    fn find_mut(&mut self, id: &str) -> Option<&mut PackageRegistryEntry> {
        self.apps
            .iter_mut()
            .chain(self.devapps.iter_mut())
            .find(|e| e.id.eq_ignore_ascii_case(id))
    }

    /// Insert or replace an installed package, keeping its original `created`
    pub fn upsert(&mut self, mut entry: PackageRegistryEntry) {
        entry.modified = Utc::now();
        match self.apps.iter_mut().find(|e| e.id.eq_ignore_ascii_case(&entry.id)) {
            Some(existing) => {
                entry.created = existing.created;
                *existing = entry;
            }
            None => self.apps.push(entry),
        }
    }

    /// Add a dev package, evicting the oldest ones beyond `limit`
    pub fn add_dev(&mut self, mut entry: PackageRegistryEntry, limit: usize) {
        entry.modified = Utc::now();
        if let Some(pos) = self.devapps.iter().position(|e| e.id.eq_ignore_ascii_case(&entry.id)) {
            entry.created = self.devapps.remove(pos).created;
        }
        self.devapps.push(entry);

        let limit = limit.max(1);
        if self.devapps.len() > limit {
            self.devapps.sort_by_key(|e| e.created);
            let evicted: Vec<String> = self
                .devapps
                .drain(..self.devapps.len() - limit)
                .map(|e| e.id)
                .collect();
            info!("Evicted dev package(s) over the limit of {}: {}", limit, evicted.join(", "));
        }
    }

    /// Remove a package from both lists
    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.apps.len() + self.devapps.len();
        self.apps.retain(|e| !e.id.eq_ignore_ascii_case(id));
        self.devapps.retain(|e| !e.id.eq_ignore_ascii_case(id));
        before != self.apps.len() + self.devapps.len()
    }

    pub fn set_disabled(&mut self, id: &str, disabled: bool) -> bool {
        match self.find_mut(id) {
            Some(entry) => {
                entry.disabled = disabled;
                entry.modified = Utc::now();
                true
            }
            None => false,
        }
    }

    /// Record the version an update installed
    pub fn record_installed(&mut self, id: &str, version: &str) -> bool {
        match self.find_mut(id) {
            Some(entry) => {
                entry.version = Some(version.to_string());
                entry.modified = Utc::now();
                true
            }
            None => false,
        }
    }
}
