//! The loaded package handle
//!
//! A [`Host`] is produced by resolving, loading and verifying a package. It is
//! read-mostly: only the verified flag and the pending-update version change
//! after construction.

use crate::catalog::descriptor::UpdateSource;
use crate::config::HostConfig;
use crate::package::error::PackageError;
use crate::package::manifest::{BoundResources, Manifest, DEFAULT_MANIFEST_NAME};
use crate::package::paths::{MappedPath, PackagePaths};
use crate::package::resolver::PackageResolver;
use crate::trust::{
    SignatureError, SignatureProvider, VerificationEngine, VerifyMode, DEFAULT_FILES_NAME,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// What the embedding application supplies to load a package
#[derive(Clone)]
pub struct HostOptions {
    pub package_id: String,
    pub manifest_file: String,
    pub files_file: String,
    /// Overrides the virtual host derived from the package id
    pub virtual_host: Option<String>,
    pub provider: Arc<dyn SignatureProvider>,
    pub update: Option<UpdateSource>,
    /// Overrides the OS documents folder for `.doc:` paths
    pub documents_dir: Option<PathBuf>,
}

impl HostOptions {
    pub fn new(package_id: impl Into<String>, provider: Arc<dyn SignatureProvider>) -> Self {
        Self {
            package_id: package_id.into(),
            manifest_file: DEFAULT_MANIFEST_NAME.to_string(),
            files_file: DEFAULT_FILES_NAME.to_string(),
            virtual_host: None,
            provider,
            update: None,
            documents_dir: None,
        }
    }

    pub fn with_update(mut self, update: UpdateSource) -> Self {
        self.update = Some(update);
        self
    }

    pub fn with_virtual_host(mut self, virtual_host: impl Into<String>) -> Self {
        self.virtual_host = Some(virtual_host.into());
        self
    }

    /// Virtual host for this package
    pub fn virtual_host(&self) -> String {
        self.virtual_host
            .clone()
            .filter(|h| !h.trim().is_empty())
            .map(|h| h.trim().to_ascii_lowercase())
            .unwrap_or_else(|| derive_virtual_host(&self.package_id))
    }
}

impl std::fmt::Debug for HostOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostOptions")
            .field("package_id", &self.package_id)
            .field("manifest_file", &self.manifest_file)
            .field("files_file", &self.files_file)
            .field("virtual_host", &self.virtual_host)
            .field("algorithm", &self.provider.algorithm())
            .field("update", &self.update)
            .finish()
    }
}

/// Per-load switches
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub mode: VerifyMode,
    pub cancel: CancellationToken,
}

impl LoadOptions {
    /// Integrity failures clear the verified flag instead of failing the load
    pub fn skip_signature_errors() -> Self {
        Self {
            mode: VerifyMode::SkipErrors,
            ..Self::default()
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// A loaded package
pub struct Host {
    options: HostOptions,
    config: Arc<HostConfig>,
    manifest: Manifest,
    paths: PackagePaths,
    root: PathBuf,
    resources: BoundResources,
    verified: AtomicBool,
    new_version: RwLock<Option<String>>,
}

impl Host {
    /// Resolve the active version under `root`, then load and verify it
    pub async fn load(
        root: &Path,
        options: HostOptions,
        config: Arc<HostConfig>,
        load: LoadOptions,
    ) -> Result<Self, PackageError> {
        if options.package_id.trim().is_empty() {
            return Err(PackageError::MissingId);
        }

        let resolver = PackageResolver::new(root);
        let resolved = resolver.resolve()?;
        resolver.cleanup_stale(&resolved.dir);

        info!(
            "Loading package '{}' from {:?} ({:?})",
            options.package_id, resolved.dir, resolved.source
        );
        Self::open(root, &resolved.dir, options, config, load).await
    }

    /// Load and verify a specific version directory
    ///
    /// `root` supplies the data and cache directories. Used for staged
    /// update candidates, which live outside the version directories.
    pub async fn open(
        root: &Path,
        version_dir: &Path,
        options: HostOptions,
        config: Arc<HostConfig>,
        load: LoadOptions,
    ) -> Result<Self, PackageError> {
        if options.package_id.trim().is_empty() {
            return Err(PackageError::MissingId);
        }
        if !version_dir.is_dir() {
            return Err(PackageError::DirectoryNotFound {
                root: version_dir.to_path_buf(),
            });
        }

        let manifest = Manifest::load(version_dir, &options.manifest_file, &options.package_id).await?;

        // Host compatibility is a configuration error, checked even when
        // integrity failures are skipped
        manifest.check_host(&config)?;

        let resolver = PackageResolver::new(root);
        let paths = PackagePaths {
            package_dir: version_dir.to_path_buf(),
            data_dir: resolver.data_dir(),
            cache_dir: resolver.cache_dir(),
            virtual_host: options.virtual_host(),
            documents_dir: options.documents_dir.clone(),
        };

        let engine = VerificationEngine::new(options.provider.clone(), config.verify_concurrency);
        let verified = engine
            .verify_all(
                &paths,
                &options.manifest_file,
                &options.files_file,
                load.mode,
                &load.cancel,
            )
            .await
            .map_err(|e| match e {
                SignatureError::Cancelled => PackageError::Cancelled,
                other => PackageError::Signature(other),
            })?;

        let resources = manifest.bind_resources(version_dir).await;
        debug!(
            "Bound {} data and {} string resource(s)",
            resources.data.len(),
            resources.strings.len()
        );

        Ok(Self {
            options,
            config,
            manifest,
            paths,
            root: root.to_path_buf(),
            resources,
            verified: AtomicBool::new(verified),
            new_version: RwLock::new(None),
        })
    }

    pub fn id(&self) -> &str {
        &self.manifest.id
    }

    pub fn version(&self) -> &str {
        &self.manifest.version
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn options(&self) -> &HostOptions {
        &self.options
    }

    pub fn config(&self) -> &Arc<HostConfig> {
        &self.config
    }

    pub fn paths(&self) -> &PackagePaths {
        &self.paths
    }

    /// Package root (parent of the version directories)
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn virtual_host(&self) -> &str {
        &self.paths.virtual_host
    }

    pub fn is_verified(&self) -> bool {
        self.verified.load(Ordering::Acquire)
    }

    /// Re-run verification and refresh the verified flag
    pub async fn reverify(&self, cancel: &CancellationToken) -> Result<bool, PackageError> {
        let engine =
            VerificationEngine::new(self.options.provider.clone(), self.config.verify_concurrency);
        let verified = engine
            .verify_all(
                &self.paths,
                &self.options.manifest_file,
                &self.options.files_file,
                VerifyMode::SkipErrors,
                cancel,
            )
            .await
            .map_err(|e| match e {
                SignatureError::Cancelled => PackageError::Cancelled,
                other => PackageError::Signature(other),
            })?;
        self.verified.store(verified, Ordering::Release);
        Ok(verified)
    }

    pub async fn new_version_available(&self) -> Option<String> {
        self.new_version.read().await.clone()
    }

    pub async fn set_new_version_available(&self, version: Option<String>) {
        *self.new_version.write().await = version;
    }

    pub fn data_resource(&self, name: &str) -> Option<&[u8]> {
        self.resources.data.get(name).map(Vec::as_slice)
    }

    pub fn data_string(&self, name: &str) -> Option<&str> {
        self.resources.strings.get(name).map(String::as_str)
    }

    /// URL of the entry page on the virtual host
    pub fn entry_url(&self) -> String {
        self.paths
            .map_virtual_path(self.manifest.entry.as_deref().unwrap_or("index.html"))
    }

    pub fn map_virtual_path(&self, relative: &str) -> String {
        self.paths.map_virtual_path(relative)
    }

    pub fn map_local_path(&self, relative: &str, test_only: bool) -> Option<MappedPath> {
        self.paths.map_local_path(relative, test_only)
    }

    /// Whether `origin` is exactly this package's virtual host
    ///
    /// Look-alike hosts (`<vhost>.evil.com`, `evil.<vhost>`) do not match.
    pub fn is_trusted_origin(&self, origin: &str) -> bool {
        url::Url::parse(origin.trim())
            .ok()
            .and_then(|url| url.host_str().map(str::to_ascii_lowercase))
            .is_some_and(|host| host == self.paths.virtual_host)
    }
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host")
            .field("id", &self.manifest.id)
            .field("version", &self.manifest.version)
            .field("package_dir", &self.paths.package_dir)
            .field("virtual_host", &self.paths.virtual_host)
            .field("verified", &self.is_verified())
            .finish()
    }
}

/// Virtual host for a package id: lowercase, `[a-z0-9-]`, under `.localhost`
pub fn derive_virtual_host(package_id: &str) -> String {
    let label: String = package_id
        .trim()
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
        .collect();
    let label = label.trim_matches('-');
    if label.is_empty() {
        "app.localhost".to_string()
    } else {
        format!("{label}.localhost")
    }
}
