//! Host configuration
//!
//! Everything that identifies the running host (its id, version and kind) and
//! tunes the core lives in one explicit struct. It is passed to the
//! constructors that need it so that several packages, or several test
//! fixtures, can run in one process without sharing state.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Default host identifier reported to packages and update servers
pub const DEFAULT_HOST_ID: &str = "localweb";

/// Fixed, localizable strings surfaced to web content
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct Messages {
    /// Message returned when an untrusted origin calls a privileged command
    pub no_permission: String,
    /// Message returned for a command name outside the dispatch table
    pub not_supported: String,
    /// Message returned when a handler id has no registered handler
    pub handler_missing: String,
}

impl Default for Messages {
    fn default() -> Self {
        Self {
            no_permission: "No permission.".to_string(),
            not_supported: "The command is not supported.".to_string(),
            handler_missing: "No message handler is registered for this id.".to_string(),
        }
    }
}

/// Configuration of the hosting application
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct HostConfig {
    /// Host identifier matched against manifest host bindings
    pub host_id: String,

    /// Host version matched against manifest min/max ranges
    pub host_version: String,

    /// Host kind reported to update servers (e.g. "desktop", "cli")
    pub host_kind: String,

    /// User agent for update checks and downloads
    pub user_agent: String,

    /// Maximum number of files verified concurrently
    pub verify_concurrency: usize,

    /// Timeout for update checks and downloads
    pub http_timeout_secs: u64,

    /// Maximum number of dev packages kept in the registry
    pub dev_app_limit: usize,

    /// User-facing messages
    pub messages: Messages,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            host_id: DEFAULT_HOST_ID.to_string(),
            host_version: env!("CARGO_PKG_VERSION").to_string(),
            host_kind: "desktop".to_string(),
            user_agent: concat!("localweb/", env!("CARGO_PKG_VERSION")).to_string(),
            verify_concurrency: 4,
            http_timeout_secs: 30,
            dev_app_limit: 20,
            messages: Messages::default(),
        }
    }
}

impl HostConfig {
    /// Create a configuration for a specific host id and version
    pub fn new(host_id: impl Into<String>, host_version: impl Into<String>) -> Self {
        Self {
            host_id: host_id.into(),
            host_version: host_version.into(),
            ..Self::default()
        }
    }

    /// Load configuration from a YAML file, or return the defaults if it doesn't exist
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No host configuration at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read host config: {}", path.display()))?;

        let config: HostConfig = serde_yaml_ng::from_str(&content)
            .with_context(|| format!("Failed to parse host config: {}", path.display()))?;

        Ok(config.normalized())
    }

    /// Default configuration file location (per-user config directory)
    pub fn default_path() -> Option<PathBuf> {
        config_dir().map(|dir| dir.join("host.yaml"))
    }

    /// Clamp values that would make the core misbehave
    fn normalized(mut self) -> Self {
        if self.verify_concurrency == 0 {
            self.verify_concurrency = 1;
        }
        if self.dev_app_limit == 0 {
            self.dev_app_limit = 1;
        }
        self
    }
}

/// Per-user configuration directory for localweb
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("io", "localweb", "localweb")
        .map(|dirs| dirs.config_dir().to_path_buf())
        .or_else(|| dirs::config_dir().map(|d| d.join("localweb")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = HostConfig::default();
        assert_eq!(config.host_id, DEFAULT_HOST_ID);
        assert_eq!(config.verify_concurrency, 4);
        assert_eq!(config.messages.no_permission, "No permission.");
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config = HostConfig::load_from_path(&temp_dir.path().join("host.yaml")).unwrap();
        assert_eq!(config, HostConfig::default());
    }

    #[test]
    fn test_load_partial_yaml() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("host.yaml");
        std::fs::write(
            &path,
            "hostId: kiosk\nhostVersion: 2.1.0\nverifyConcurrency: 0\nmessages:\n  noPermission: Denied\n",
        )
        .unwrap();

        let config = HostConfig::load_from_path(&path).unwrap();
        assert_eq!(config.host_id, "kiosk");
        assert_eq!(config.host_version, "2.1.0");
        assert_eq!(config.verify_concurrency, 1);
        assert_eq!(config.messages.no_permission, "Denied");
        assert_eq!(config.messages.not_supported, Messages::default().not_supported);
    }
}
