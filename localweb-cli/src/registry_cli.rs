//! Registry commands: list, add, dev-add, remove, disable, enable

use crate::App;
use anyhow::{bail, Context, Result};
use clap::{Args, Parser};
use localweb_core::catalog::{PackageRegistryEntry, UpdateSource};
use localweb_core::package::{DEFAULT_MANIFEST_NAME, PackageResolver};
use localweb_core::trust::SignatureAlgorithm;
use localweb_core::Manifest;
use std::path::PathBuf;
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};

#[derive(Args, Debug)]
pub struct EntryArgs {
    /// Package id
    id: String,

    /// Package root directory
    #[clap(long)]
    root: PathBuf,

    /// Base64url verification key
    #[clap(long)]
    public_key: String,

    #[clap(long, default_value = "ed25519")]
    algorithm: SignatureAlgorithm,

    /// Update check URL template
    #[clap(long)]
    update_url: Option<String>,
}

impl EntryArgs {
    fn to_entry(&self) -> Result<PackageRegistryEntry> {
        // Reject keys that cannot build a verifier before they are stored
        self.algorithm
            .provider(&self.public_key)
            .with_context(|| format!("Invalid {} key", self.algorithm))?;

        let mut entry = PackageRegistryEntry::new(&self.id, self.algorithm, &self.public_key);
        entry.root = Some(self.root.clone());
        entry.update = self.update_url.clone().map(UpdateSource::new);

        if let Ok(resolved) = PackageResolver::new(&self.root).resolve() {
            let path = resolved.dir.join(DEFAULT_MANIFEST_NAME);
            if let Ok(content) = std::fs::read(&path) {
                if let Ok(manifest) = Manifest::from_json(&content, &path) {
                    entry.mirror_manifest(&manifest);
                }
            }
        }
        Ok(entry)
    }
}

#[derive(Parser, Debug)]
pub enum RegistryCommand {
    /// List registered packages
    List {
        /// Output as JSON
        #[clap(long)]
        json: bool,
    },

    /// Register an installed package
    Add(EntryArgs),

    /// Register a development package (oldest are evicted over the limit)
    DevAdd(EntryArgs),

    /// Remove a package from the registry (files are left in place)
    Remove { id: String },

    Disable { id: String },

    Enable { id: String },
}

impl RegistryCommand {
    pub async fn execute(&self, app: &App) -> Result<()> {
        let mut registry = app.registry()?;

        match self {
            RegistryCommand::List { json } => {
                if *json {
                    println!("{}", serde_json::to_string_pretty(&registry)?);
                } else {
                    list(&registry.apps, &registry.devapps);
                }
                return Ok(());
            }
            RegistryCommand::Add(args) => {
                let entry = args.to_entry()?;
                println!("Registered {}", entry.id);
                registry.upsert(entry);
            }
            RegistryCommand::DevAdd(args) => {
                let entry = args.to_entry()?;
                println!("Registered dev package {}", entry.id);
                registry.add_dev(entry, app.config.dev_app_limit);
            }
            RegistryCommand::Remove { id } => {
                if !registry.remove(id) {
                    bail!("Package '{id}' is not registered");
                }
                println!("Removed {id}");
            }
            RegistryCommand::Disable { id } | RegistryCommand::Enable { id } => {
                let disabled = matches!(self, RegistryCommand::Disable { .. });
                if !registry.set_disabled(id, disabled) {
                    bail!("Package '{id}' is not registered");
                }
                println!("{} {id}", if disabled { "Disabled" } else { "Enabled" });
            }
        }

        registry.save()
    }
}

#[derive(Tabled)]
struct EntryRow {
    #[tabled(rename = "Id")]
    id: String,
    #[tabled(rename = "Version")]
    version: String,
    #[tabled(rename = "Kind")]
    kind: &'static str,
    #[tabled(rename = "Status")]
    status: &'static str,
    #[tabled(rename = "Root")]
    root: String,
}

fn row(entry: &PackageRegistryEntry, kind: &'static str) -> EntryRow {
    EntryRow {
        id: entry.id.clone(),
        version: entry
            .version
            .as_ref()
            .map(|v| format!("v{v}"))
            .unwrap_or_else(|| "-".to_string()),
        kind,
        status: if entry.disabled { "disabled" } else { "enabled" },
        root: entry
            .root
            .as_ref()
            .map(|r| r.display().to_string())
            .unwrap_or_default(),
    }
}

fn list(apps: &[PackageRegistryEntry], devapps: &[PackageRegistryEntry]) {
    if apps.is_empty() && devapps.is_empty() {
        println!("No packages registered.");
        println!("\nRun 'localweb registry add' to register one.");
        return;
    }

    let rows: Vec<EntryRow> = apps
        .iter()
        .map(|e| row(e, "app"))
        .chain(devapps.iter().map(|e| row(e, "dev")))
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Rows::first()).with(Alignment::center()))
        .to_string();
    println!("{table}");
}
