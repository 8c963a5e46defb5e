//! Package installation and update rollover
//!
//! An update moves through explicit states, each a distinct type:
//!
//! ```text
//! Idle --stage--> Staged --validate--> Validated --copy--> Copied
//!      --commit--> Committed --finish--> Installed
//! ```
//!
//! Nothing is visible to resolution until `commit` renames the copy into
//! `v<version>` and writes `settings.json`. Until then the copy lives in
//! `.incoming-<version>`, which resolution never considers. Dropping an
//! update in any state before commit abandons it; the staging directory is
//! removed with it and leftover incoming directories are cleared by the next
//! `begin`. Only one update per package id runs at a time.

use crate::catalog::archive::{copy_dir, extract_archive, find_manifest_root, verify_digest};
use crate::catalog::descriptor::{UpdateDescriptor, UpdateQuery};
use crate::catalog::error::UpdateError;
use crate::catalog::fetch::PackageFetcher;
use crate::config::HostConfig;
use crate::package::{
    compare_versions, Host, HostOptions, LoadOptions, Manifest, PackageError, PackageResolver,
    PackageSettings, PackageVersion, ResolvedFrom,
};
use crate::trust::VerifyMode;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const INCOMING_PREFIX: &str = ".incoming-";

/// Where a candidate package comes from
#[derive(Debug, Clone)]
pub enum PackageSource {
    /// Archive downloaded through the fetcher
    Url(String),
    /// Archive bytes compiled into or held by the embedding application
    Embedded(Vec<u8>),
    /// Archive file on disk
    Archive(PathBuf),
}

type ActiveSet = Arc<Mutex<HashSet<String>>>;

/// Held for the lifetime of an update; releases the package id on drop
#[derive(Debug)]
pub struct UpdateGuard {
    id: String,
    active: ActiveSet,
}

impl Drop for UpdateGuard {
    fn drop(&mut self) {
        let mut active = self.active.lock().unwrap_or_else(|p| p.into_inner());
        active.remove(&self.id);
    }
}

/// Drives update checks, installs and rollovers
pub struct UpdateCoordinator {
    config: Arc<HostConfig>,
    fetcher: Arc<dyn PackageFetcher>,
    active: ActiveSet,
}

impl UpdateCoordinator {
    pub fn new(config: Arc<HostConfig>, fetcher: Arc<dyn PackageFetcher>) -> Self {
        Self {
            config,
            fetcher,
            active: Arc::default(),
        }
    }

    /// Whether an update for `id` is currently running
    pub fn is_updating(&self, id: &str) -> bool {
        let active = self.active.lock().unwrap_or_else(|p| p.into_inner());
        active.contains(&id.to_ascii_lowercase())
    }

    fn acquire(&self, id: &str) -> Result<UpdateGuard, UpdateError> {
        let key = id.trim().to_ascii_lowercase();
        let mut active = self.active.lock().unwrap_or_else(|p| p.into_inner());
        if !active.insert(key.clone()) {
            warn!("Rejecting concurrent update for '{}'", id);
            return Err(UpdateError::InProgress { id: id.to_string() });
        }
        Ok(UpdateGuard {
            id: key,
            active: self.active.clone(),
        })
    }

    /// Start an update of the package under `root`
    ///
    /// `root` may be empty or missing for a first-time install.
    pub fn begin(
        &self,
        root: &Path,
        options: HostOptions,
        cancel: CancellationToken,
    ) -> Result<Update<Idle>, UpdateError> {
        if options.package_id.trim().is_empty() {
            return Err(PackageError::MissingId.into());
        }
        let guard = self.acquire(&options.package_id)?;

        std::fs::create_dir_all(root).map_err(|e| UpdateError::io(root, e))?;
        remove_incoming(root);
        let resolver = PackageResolver::new(root);
        let previous = match resolver.resolve() {
            Ok(resolved) => {
                // Pin the running version so that a directory copied by an
                // interrupted update is never picked as "newest"
                let mut settings = resolver.settings();
                if resolved.source == ResolvedFrom::Newest && settings.version.is_none() {
                    settings.version = resolved.version.clone();
                    settings.save(&resolver.cache_dir())?;
                }
                resolved.version
            }
            Err(_) => None,
        };

        info!(
            "Starting update of '{}' (installed: {})",
            options.package_id,
            previous.as_deref().unwrap_or("none")
        );

        Ok(Update {
            ctx: UpdateContext {
                root: root.to_path_buf(),
                resolver,
                options,
                config: self.config.clone(),
                fetcher: self.fetcher.clone(),
                previous,
                cancel,
                _guard: guard,
            },
            state: Idle,
        })
    }

    /// Run a complete install from `source`
    ///
    /// `promised` is the version the caller expects the candidate to declare.
    pub async fn install(
        &self,
        root: &Path,
        options: HostOptions,
        source: PackageSource,
        promised: Option<&str>,
        digest: Option<&str>,
        cancel: CancellationToken,
    ) -> Result<Installed, UpdateError> {
        let installed = self
            .begin(root, options, cancel)?
            .stage(source, digest)
            .await?
            .validate(promised)
            .await?
            .copy()?
            .commit()?
            .finish();
        Ok(installed)
    }

    /// Ask the package's update source whether a newer version exists
    ///
    /// Transient failures are logged and reported as "no update". The
    /// host's pending-update version is refreshed either way.
    pub async fn check_for_update(&self, host: &Host) -> Option<UpdateDescriptor> {
        let source = host.options().update.as_ref()?;
        let url = source.check_url(&UpdateQuery {
            version: host.version(),
            id: host.id(),
            kind: &self.config.host_kind,
            host: &self.config.host_id,
        });

        let descriptor = match self.fetcher.fetch_text(&url).await {
            Ok(text) => match UpdateDescriptor::parse(&text) {
                Ok(descriptor) => descriptor,
                Err(e) => {
                    warn!("Ignoring update descriptor from {}: {}", url, e);
                    return None;
                }
            },
            Err(e) => {
                warn!("Update check for '{}' failed: {}", host.id(), e);
                return None;
            }
        };

        if descriptor.applies_to(host.version()) {
            info!("Update available for '{}': {}", host.id(), descriptor.version);
            host.set_new_version_available(Some(descriptor.version.clone())).await;
            Some(descriptor)
        } else {
            debug!("'{}' is up to date ({})", host.id(), host.version());
            host.set_new_version_available(None).await;
            None
        }
    }

    /// Check and, if an update applies, install it
    ///
    /// The running `host` keeps its (now retired) directory; reload it to
    /// pick up the new version.
    pub async fn update(
        &self,
        host: &Host,
        cancel: CancellationToken,
    ) -> Result<Option<Installed>, UpdateError> {
        let Some(descriptor) = self.check_for_update(host).await else {
            return Ok(None);
        };

        let installed = self
            .install(
                host.root(),
                host.options().clone(),
                PackageSource::Url(descriptor.url.clone()),
                Some(&descriptor.version),
                descriptor.digest.as_deref(),
                cancel,
            )
            .await?;
        Ok(Some(installed))
    }
}

/// Clear copies left behind by updates that never committed
fn remove_incoming(root: &Path) {
    let Ok(entries) = std::fs::read_dir(root) else {
        return;
    };
    for entry in entries.filter_map(|e| e.ok()) {
        if !entry.file_name().to_string_lossy().starts_with(INCOMING_PREFIX) {
            continue;
        }
        let path = entry.path();
        debug!("Removing abandoned copy {:?}", path);
        if let Err(e) = std::fs::remove_dir_all(&path) {
            warn!("Failed to remove abandoned copy {:?}: {}", path, e);
        }
    }
}

struct UpdateContext {
    root: PathBuf,
    resolver: PackageResolver,
    options: HostOptions,
    config: Arc<HostConfig>,
    fetcher: Arc<dyn PackageFetcher>,
    previous: Option<String>,
    cancel: CancellationToken,
    _guard: UpdateGuard,
}

impl UpdateContext {
    fn check_cancelled(&self) -> Result<(), UpdateError> {
        if self.cancel.is_cancelled() {
            info!("Update of '{}' cancelled", self.options.package_id);
            return Err(UpdateError::Cancelled);
        }
        Ok(())
    }

    fn previous_dir(&self) -> Option<PathBuf> {
        self.previous
            .as_deref()
            .and_then(|v| self.resolver.version_dir(v))
    }

    /// Best-effort removal of a freshly copied directory that never committed
    fn discard(&self, dest: &Path) {
        if self.previous_dir().as_deref() == Some(dest) {
            return;
        }
        if let Err(e) = std::fs::remove_dir_all(dest) {
            warn!("Failed to remove abandoned directory {:?}: {}", dest, e);
        }
    }
}

/// An update in state `S`
pub struct Update<S> {
    ctx: UpdateContext,
    state: S,
}

pub struct Idle;

pub struct Staged {
    staging: TempDir,
    candidate: PathBuf,
}

pub struct Validated {
    staging: TempDir,
    candidate: PathBuf,
    manifest: Manifest,
}

pub struct Copied {
    incoming: PathBuf,
    dest: PathBuf,
    manifest: Manifest,
}

pub struct Committed {
    dest: PathBuf,
    manifest: Manifest,
}

/// Result of a completed install
#[derive(Debug, Clone)]
pub struct Installed {
    pub id: String,
    pub version: String,
    pub dir: PathBuf,
    /// Version that was active before
    pub previous: Option<String>,
    pub manifest: Manifest,
}

impl<S> Update<S> {
    pub fn package_id(&self) -> &str {
        &self.ctx.options.package_id
    }

    /// Installed version when the update started
    pub fn previous_version(&self) -> Option<&str> {
        self.ctx.previous.as_deref()
    }
}

impl Update<Idle> {
    /// Obtain the archive and extract it into a staging directory under `cache/`
    pub async fn stage(
        self,
        source: PackageSource,
        digest: Option<&str>,
    ) -> Result<Update<Staged>, UpdateError> {
        self.ctx.check_cancelled()?;

        let cache_dir = self.ctx.resolver.cache_dir();
        std::fs::create_dir_all(&cache_dir).map_err(|e| UpdateError::io(&cache_dir, e))?;
        let staging = tempfile::Builder::new()
            .prefix("staging-")
            .tempdir_in(&cache_dir)
            .map_err(|e| UpdateError::io(&cache_dir, e))?;

        let bytes = match source {
            PackageSource::Url(url) => {
                let archive = staging.path().join("package.tar.gz");
                self.ctx
                    .fetcher
                    .download(&url, &archive, &self.ctx.cancel)
                    .await?;
                tokio::fs::read(&archive)
                    .await
                    .map_err(|e| UpdateError::io(&archive, e))?
            }
            PackageSource::Embedded(bytes) => bytes,
            PackageSource::Archive(path) => tokio::fs::read(&path)
                .await
                .map_err(|e| UpdateError::io(&path, e))?,
        };

        if let Some(expected) = digest {
            verify_digest(&bytes, expected)?;
            debug!("Verified archive digest {}", expected);
        }
        self.ctx.check_cancelled()?;

        let content = staging.path().join("content");
        extract_archive(&bytes, &content)?;
        let candidate = find_manifest_root(&content, &self.ctx.options.manifest_file)?;

        debug!("Staged candidate at {:?}", candidate);
        Ok(Update {
            ctx: self.ctx,
            state: Staged { staging, candidate },
        })
    }
}

impl Update<Staged> {
    /// Directory holding the extracted candidate
    pub fn candidate_dir(&self) -> &Path {
        &self.state.candidate
    }

    /// Load the candidate as a package and verify it completely
    ///
    /// The candidate must carry the installed package id, be compatible
    /// with this host, fully verify, and declare `promised` if given.
    pub async fn validate(self, promised: Option<&str>) -> Result<Update<Validated>, UpdateError> {
        self.ctx.check_cancelled()?;

        let load = LoadOptions {
            mode: VerifyMode::Strict,
            cancel: self.ctx.cancel.clone(),
        };
        let host = Host::open(
            &self.ctx.root,
            &self.state.candidate,
            self.ctx.options.clone(),
            self.ctx.config.clone(),
            load,
        )
        .await
        .map_err(|e| match e {
            PackageError::Cancelled => UpdateError::Cancelled,
            other => UpdateError::Package(other),
        })?;

        let manifest = host.manifest().clone();
        if PackageVersion::parse(&manifest.version).is_none() {
            return Err(PackageError::ManifestFormat {
                path: self.state.candidate.join(&self.ctx.options.manifest_file),
                reason: format!("'{}' is not a valid version", manifest.version),
            }
            .into());
        }
        if let Some(promised) = promised {
            if compare_versions(promised, &manifest.version) != Ordering::Equal {
                return Err(UpdateError::VersionMismatch {
                    promised: promised.to_string(),
                    actual: manifest.version.clone(),
                });
            }
        }

        info!("Validated candidate {} v{}", manifest.id, manifest.version);
        Ok(Update {
            ctx: self.ctx,
            state: Validated {
                staging: self.state.staging,
                candidate: self.state.candidate,
                manifest,
            },
        })
    }
}

impl Update<Validated> {
    pub fn version(&self) -> &str {
        &self.state.manifest.version
    }

    /// Copy the candidate next to the installed versions
    ///
    /// The copy lands in `.incoming-<version>`; `commit` moves it into place.
    pub fn copy(self) -> Result<Update<Copied>, UpdateError> {
        self.ctx.check_cancelled()?;

        let dest = self
            .ctx
            .resolver
            .version_dir(&self.state.manifest.version)
            .ok_or_else(|| UpdateError::VersionMismatch {
                promised: String::new(),
                actual: self.state.manifest.version.clone(),
            })?;

        let incoming = self
            .ctx
            .root
            .join(format!("{INCOMING_PREFIX}{}", self.state.manifest.version));
        if incoming.exists() {
            std::fs::remove_dir_all(&incoming).map_err(|e| UpdateError::io(&incoming, e))?;
        }

        if let Err(e) = copy_dir(&self.state.candidate, &incoming) {
            remove_quietly(&incoming);
            return Err(e);
        }

        // Staging is no longer needed once the copy exists
        if let Err(e) = self.state.staging.close() {
            debug!("Failed to remove staging directory: {}", e);
        }

        debug!("Copied candidate to {:?}", incoming);
        Ok(Update {
            ctx: self.ctx,
            state: Copied {
                incoming,
                dest,
                manifest: self.state.manifest,
            },
        })
    }
}

impl Update<Copied> {
    /// Directory the version will occupy once committed
    pub fn dest(&self) -> &Path {
        &self.state.dest
    }

    /// Directory holding the uncommitted copy
    pub fn incoming_dir(&self) -> &Path {
        &self.state.incoming
    }

    /// Move the copy into `v<version>` and record it in `settings.json`
    ///
    /// This is the commit point. Cancellation is honoured up to here and
    /// ignored afterwards.
    pub fn commit(self) -> Result<Update<Committed>, UpdateError> {
        if let Err(e) = self.ctx.check_cancelled() {
            remove_quietly(&self.state.incoming);
            return Err(e);
        }

        let dest = &self.state.dest;
        if dest.exists() {
            debug!("Replacing existing directory {:?}", dest);
            if let Err(e) = std::fs::remove_dir_all(dest) {
                remove_quietly(&self.state.incoming);
                return Err(UpdateError::io(dest, e));
            }
        }
        if let Err(e) = std::fs::rename(&self.state.incoming, dest) {
            remove_quietly(&self.state.incoming);
            return Err(UpdateError::io(dest, e));
        }

        let version = &self.state.manifest.version;
        let old = self
            .ctx
            .previous
            .as_deref()
            .filter(|old| compare_versions(old, version) != Ordering::Equal);

        let settings = PackageSettings::committed(version, old);
        if let Err(e) = settings.save(&self.ctx.resolver.cache_dir()) {
            self.ctx.discard(&self.state.dest);
            return Err(e.into());
        }

        info!(
            "Committed '{}' v{} (previous: {})",
            self.ctx.options.package_id,
            version,
            old.unwrap_or("none")
        );
        Ok(Update {
            ctx: self.ctx,
            state: Committed {
                dest: self.state.dest,
                manifest: self.state.manifest,
            },
        })
    }
}

fn remove_quietly(dir: &Path) {
    if let Err(e) = std::fs::remove_dir_all(dir) {
        warn!("Failed to remove abandoned copy {:?}: {}", dir, e);
    }
}

impl Update<Committed> {
    /// Retire the superseded version directory
    pub fn finish(self) -> Installed {
        self.ctx.resolver.cleanup_stale(&self.state.dest);

        Installed {
            id: self.state.manifest.id.clone(),
            version: self.state.manifest.version.clone(),
            dir: self.state.dest,
            previous: self.ctx.previous,
            manifest: self.state.manifest,
        }
    }
}
