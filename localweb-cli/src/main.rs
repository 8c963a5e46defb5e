//! localweb - sign, package, install and serve local web apps
//!
//! Logs always go to stderr. stdout carries command output and, for
//! `serve`, the response channel.

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, ValueEnum};
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use localweb_core::bridge::MessageRouter;
use localweb_core::catalog::{
    PackageFetcher, PackageRegistry, PackageRegistryEntry, PackageSource, UpdateCoordinator,
};
use localweb_core::package::{PackageResolver, ResolvedFrom};
use localweb_core::{Host, HostConfig, HostOptions, LoadOptions};

mod package_cli;
mod registry_cli;

#[derive(Debug, Clone, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_filter_directive(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

#[derive(Parser, Debug)]
#[clap(
    name = "localweb",
    about = "Trusted host for signed local web app packages",
    version
)]
struct Cli {
    #[clap(subcommand)]
    command: Command,

    /// Set log level
    #[clap(long, default_value = "info", global = true)]
    log_level: LogLevel,

    /// Emit logs as JSON
    #[clap(long, global = true)]
    json: bool,

    /// Host configuration file (YAML)
    #[clap(long, global = true)]
    config: Option<PathBuf>,

    /// Registry file
    #[clap(long, global = true)]
    registry: Option<PathBuf>,
}

#[derive(Parser, Debug)]
enum Command {
    /// Show which version directory a package root resolves to
    Resolve {
        /// Package root
        root: PathBuf,
    },

    /// Install a registered package from an archive or URL
    Install {
        /// Registered package id
        id: String,

        /// Local .tar.gz archive
        #[clap(long, conflicts_with = "url")]
        archive: Option<PathBuf>,

        /// Remote .tar.gz archive
        #[clap(long)]
        url: Option<String>,

        /// Expected `sha256:<hex>` digest of the archive
        #[clap(long)]
        digest: Option<String>,
    },

    /// Ask a registered package's update source for a newer version
    CheckUpdate {
        id: String,
    },

    /// Check for and install an update of a registered package
    Update {
        id: String,
    },

    /// Serve the message router over newline-delimited JSON on stdin/stdout
    ///
    /// Each input line is `{"origin": "...", "request": {...}}`.
    Serve {
        id: String,

        /// Load even if verification fails (privileged commands stay denied)
        #[clap(long)]
        skip_signature_errors: bool,
    },

    /// Sign, package and verify package directories
    Package {
        #[clap(subcommand)]
        command: package_cli::PackageCommand,
    },

    /// Manage the package registry
    Registry {
        #[clap(subcommand)]
        command: registry_cli::RegistryCommand,
    },
}

fn initialize_tracing(log_level: &LogLevel, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_filter_directive()));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }
}

/// Shared state for commands that need configuration and the registry
pub(crate) struct App {
    pub config: Arc<HostConfig>,
    registry_path: Option<PathBuf>,
}

impl App {
    fn new(config: Option<PathBuf>, registry_path: Option<PathBuf>) -> Result<Self> {
        let config = match config.or_else(HostConfig::default_path) {
            Some(path) => HostConfig::load_from_path(&path)?,
            None => HostConfig::default(),
        };
        Ok(Self {
            config: Arc::new(config),
            registry_path,
        })
    }

    pub fn registry(&self) -> Result<PackageRegistry> {
        match &self.registry_path {
            Some(path) => PackageRegistry::load_from_path(path.clone()),
            None => PackageRegistry::load(),
        }
    }

    fn entry(&self, id: &str) -> Result<PackageRegistryEntry> {
        let registry = self.registry()?;
        let entry = registry
            .find(id)
            .cloned()
            .ok_or_else(|| anyhow!("Package '{id}' is not registered"))?;
        if entry.disabled {
            bail!("Package '{id}' is disabled");
        }
        Ok(entry)
    }

    fn options(&self, entry: &PackageRegistryEntry) -> Result<HostOptions> {
        let provider = entry
            .provider()
            .with_context(|| format!("Invalid key for '{}'", entry.id))?;
        let mut options = HostOptions::new(&entry.id, provider);
        if let Some(update) = &entry.update {
            options = options.with_update(update.clone());
        }
        Ok(options)
    }

    fn root(entry: &PackageRegistryEntry) -> Result<PathBuf> {
        entry
            .root
            .clone()
            .ok_or_else(|| anyhow!("Package '{}' has no root directory", entry.id))
    }

    async fn load_host(&self, entry: &PackageRegistryEntry, load: LoadOptions) -> Result<Host> {
        let root = Self::root(entry)?;
        Host::load(&root, self.options(entry)?, self.config.clone(), load)
            .await
            .with_context(|| format!("Failed to load '{}'", entry.id))
    }

    fn coordinator(&self) -> Result<UpdateCoordinator> {
        Ok(UpdateCoordinator::new(self.config.clone(), self.fetcher()?))
    }

    #[cfg(feature = "http")]
    fn fetcher(&self) -> Result<Arc<dyn PackageFetcher>> {
        let fetcher = localweb_core::catalog::HttpFetcher::new(&self.config)?;
        Ok(Arc::new(fetcher))
    }

    #[cfg(not(feature = "http"))]
    fn fetcher(&self) -> Result<Arc<dyn PackageFetcher>> {
        Ok(Arc::new(localweb_core::catalog::MemoryFetcher::new()))
    }

    fn record_installed(&self, id: &str, version: &str) -> Result<()> {
        let mut registry = self.registry()?;
        if registry.record_installed(id, version) {
            registry.save()?;
        }
        Ok(())
    }
}

/// Cancel on Ctrl-C
fn cancel_on_interrupt() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling");
            token.cancel();
        }
    });
    cancel
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    initialize_tracing(&cli.log_level, cli.json);

    let ctx = App::new(cli.config, cli.registry)?;

    match cli.command {
        Command::Resolve { root } => resolve_command(root),
        Command::Install {
            id,
            archive,
            url,
            digest,
        } => install_command(&ctx, &id, archive, url, digest).await,
        Command::CheckUpdate { id } => check_update_command(&ctx, &id).await,
        Command::Update { id } => update_command(&ctx, &id).await,
        Command::Serve {
            id,
            skip_signature_errors,
        } => serve_command(&ctx, &id, skip_signature_errors).await,
        Command::Package { command } => command.execute(&ctx).await,
        Command::Registry { command } => command.execute(&ctx).await,
    }
}

fn resolve_command(root: PathBuf) -> Result<()> {
    let resolver = PackageResolver::new(&root);
    let resolved = resolver.resolve()?;
    let source = match resolved.source {
        ResolvedFrom::Recorded => "settings",
        ResolvedFrom::Newest => "newest",
        ResolvedFrom::Fallback => "fallback",
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "dir": resolved.dir,
            "version": resolved.version,
            "source": source,
        }))?
    );
    Ok(())
}

async fn install_command(
    ctx: &App,
    id: &str,
    archive: Option<PathBuf>,
    url: Option<String>,
    digest: Option<String>,
) -> Result<()> {
    let entry = ctx.entry(id)?;
    let root = App::root(&entry)?;
    let source = match (archive, url) {
        (Some(path), _) => PackageSource::Archive(path),
        (None, Some(url)) => PackageSource::Url(url),
        (None, None) => bail!("Either --archive or --url is required"),
    };

    let installed = ctx
        .coordinator()?
        .install(
            &root,
            ctx.options(&entry)?,
            source,
            None,
            digest.as_deref(),
            cancel_on_interrupt(),
        )
        .await?;

    ctx.record_installed(&installed.id, &installed.version)?;
    println!(
        "Installed {} v{} into {}",
        installed.id,
        installed.version,
        installed.dir.display()
    );
    Ok(())
}

async fn check_update_command(ctx: &App, id: &str) -> Result<()> {
    let entry = ctx.entry(id)?;
    let host = ctx
        .load_host(&entry, LoadOptions::skip_signature_errors())
        .await?;
    if host.options().update.is_none() {
        bail!("Package '{id}' has no update source");
    }

    match ctx.coordinator()?.check_for_update(&host).await {
        Some(descriptor) => println!(
            "Update available for {}: {} -> {}{}",
            host.id(),
            host.version(),
            descriptor.version,
            if descriptor.force { " (forced)" } else { "" }
        ),
        None => println!("{} is up to date ({})", host.id(), host.version()),
    }
    Ok(())
}

async fn update_command(ctx: &App, id: &str) -> Result<()> {
    let entry = ctx.entry(id)?;
    let host = ctx
        .load_host(&entry, LoadOptions::skip_signature_errors())
        .await?;

    match ctx.coordinator()?.update(&host, cancel_on_interrupt()).await? {
        Some(installed) => {
            ctx.record_installed(&installed.id, &installed.version)?;
            println!(
                "Updated {} from {} to {}",
                installed.id,
                installed.previous.as_deref().unwrap_or("none"),
                installed.version
            );
        }
        None => println!("{} is up to date ({})", host.id(), host.version()),
    }
    Ok(())
}

/// One inbound line of the serve channel
#[derive(Debug, Deserialize)]
struct ServeMessage {
    origin: String,
    request: Value,
}

async fn serve_command(ctx: &App, id: &str, skip_signature_errors: bool) -> Result<()> {
    let entry = ctx.entry(id)?;
    let load = if skip_signature_errors {
        LoadOptions::skip_signature_errors()
    } else {
        LoadOptions::default()
    };
    let host = Arc::new(ctx.load_host(&entry, load).await?);
    if !host.is_verified() {
        warn!(target: "security", "Serving unverified package '{}'; privileged commands are denied", id);
    }

    let mut router = MessageRouter::new(host.clone());
    if host.options().update.is_some() {
        router = router.with_updates(Arc::new(ctx.coordinator()?));
    }
    let router = Arc::new(router);

    info!(
        "Serving '{}' v{} at {}",
        host.id(),
        host.version(),
        host.entry_url()
    );

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<String>();
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(line) = rx.recv().await {
            if stdout.write_all(line.as_bytes()).await.is_err()
                || stdout.write_all(b"\n").await.is_err()
                || stdout.flush().await.is_err()
            {
                error!("stdout closed, stopping");
                break;
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut tasks = tokio::task::JoinSet::new();
    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        reap_finished(&mut tasks);
        if line.trim().is_empty() {
            continue;
        }
        let router = router.clone();
        let tx = tx.clone();
        tasks.spawn(async move {
            let response = match serde_json::from_str::<ServeMessage>(&line) {
                Ok(message) => router.handle_value(message.request, &message.origin).await,
                Err(e) => {
                    debug!("Malformed serve line: {}", e);
                    router.handle(&line, "").await
                }
            };
            match serde_json::to_string(&response) {
                Ok(json) => {
                    let _ = tx.send(json);
                }
                Err(e) => error!("Failed to serialize response: {}", e),
            }
        });
    }

    while tasks.join_next().await.is_some() {}
    drop(tx);
    let _ = writer.await;
    Ok(())
}

/// Drop completed request tasks without waiting on running ones
fn reap_finished(tasks: &mut tokio::task::JoinSet<()>) -> usize {
    let mut reaped = 0;
    while let Some(result) = tasks.try_join_next() {
        if let Err(e) = result {
            error!("Request task failed: {}", e);
        }
        reaped += 1;
    }
    reaped
}
