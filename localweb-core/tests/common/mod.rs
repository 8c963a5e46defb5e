//! Shared fixtures for integration tests
//!
//! Each test file includes this module with `mod common;` and uses only part
//! of it.
#![allow(dead_code)]

use anyhow::Result;
use localweb_core::trust::{sign_directory, Ed25519Provider, DEFAULT_FILES_NAME};
use localweb_core::package::DEFAULT_MANIFEST_NAME;
use localweb_core::{HostConfig, HostOptions};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Once};

static INIT: Once = Once::new();

pub fn init_test_logging() {
    INIT.call_once(|| {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

        let _ = tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_test_writer()
                    .with_target(true)
                    .with_level(true),
            )
            .with(tracing_subscriber::filter::EnvFilter::from_default_env())
            .try_init();
    });
}

pub fn config() -> Arc<HostConfig> {
    Arc::new(HostConfig::new("localweb", "1.0.0"))
}

pub fn signer() -> Arc<Ed25519Provider> {
    Arc::new(Ed25519Provider::generate().0)
}

pub fn options(id: &str, provider: Arc<Ed25519Provider>) -> HostOptions {
    HostOptions::new(id, provider)
}

/// Write an unsigned app (manifest, page, script, stylesheet) into `dir`
pub fn write_app(dir: &Path, id: &str, version: &str) -> Result<()> {
    fs::create_dir_all(dir.join("js"))?;
    fs::create_dir_all(dir.join("css"))?;
    fs::write(
        dir.join(DEFAULT_MANIFEST_NAME),
        format!(r#"{{"id": "{id}", "version": "{version}", "entry": "index.html"}}"#),
    )?;
    fs::write(
        dir.join("index.html"),
        format!("<html><body>{id} {version}</body><script src='js/app.js'></script></html>"),
    )?;
    fs::write(dir.join("js/app.js"), format!("console.log('{version}');"))?;
    fs::write(dir.join("css/site.css"), "body { margin: 0; }")?;
    Ok(())
}

/// Write and sign `v<version>` under `root`
pub fn signed_version(
    root: &Path,
    id: &str,
    version: &str,
    provider: &Ed25519Provider,
) -> Result<PathBuf> {
    let dir = root.join(format!("v{version}"));
    write_app(&dir, id, version)?;
    sign_directory(&dir, provider, DEFAULT_MANIFEST_NAME, DEFAULT_FILES_NAME)?;
    Ok(dir)
}

/// Write and sign the unversioned `app` directory under `root`
pub fn signed_app(root: &Path, id: &str, version: &str, provider: &Ed25519Provider) -> Result<PathBuf> {
    let dir = root.join("app");
    write_app(&dir, id, version)?;
    sign_directory(&dir, provider, DEFAULT_MANIFEST_NAME, DEFAULT_FILES_NAME)?;
    Ok(dir)
}

/// Record `version` as the active one in `root/cache/settings.json`
pub fn record_version(root: &Path, version: &str) -> Result<()> {
    let cache = root.join("cache");
    fs::create_dir_all(&cache)?;
    fs::write(
        cache.join("settings.json"),
        format!(r#"{{"version": "{version}"}}"#),
    )?;
    Ok(())
}
