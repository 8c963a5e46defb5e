//! Package commands: keygen, sign, package, verify

use crate::App;
use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser};
use localweb_core::catalog::{archive, package_directory};
use localweb_core::package::DEFAULT_MANIFEST_NAME;
use localweb_core::trust::{
    encode_signature, Ed25519Provider, KeyPair, SignatureAlgorithm, SignatureProvider,
    DEFAULT_FILES_NAME,
};
use localweb_core::{Host, HostOptions, LoadOptions, Manifest};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Where the signing key comes from
#[derive(Args, Debug)]
pub struct SigningKey {
    /// Signature algorithm
    #[clap(long, default_value = "ed25519")]
    algorithm: SignatureAlgorithm,

    /// Base64url secret key (Ed25519 seed or HMAC secret)
    #[clap(long, conflicts_with = "key_file", required_unless_present = "key_file")]
    key: Option<String>,

    /// Key file written by `localweb package keygen`
    #[clap(long)]
    key_file: Option<PathBuf>,
}

impl SigningKey {
    fn secret(&self) -> Result<String> {
        if let Some(key) = &self.key {
            return Ok(key.clone());
        }
        let path = self
            .key_file
            .as_ref()
            .ok_or_else(|| anyhow!("--key or --key-file is required"))?;
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read key file: {}", path.display()))?;
        let pair: KeyPair = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse key file: {}", path.display()))?;
        Ok(pair.secret_key)
    }

    fn provider(&self) -> Result<Arc<dyn SignatureProvider>> {
        let secret = self.secret()?;
        let provider: Arc<dyn SignatureProvider> = match self.algorithm {
            SignatureAlgorithm::Ed25519 => Arc::new(Ed25519Provider::from_secret_key(&secret)?),
            SignatureAlgorithm::HmacSha256 => SignatureAlgorithm::HmacSha256.provider(&secret)?,
        };
        Ok(provider)
    }
}

/// Names of the manifest and signature list inside a package
#[derive(Args, Debug)]
pub struct PackageFiles {
    #[clap(long, default_value = DEFAULT_MANIFEST_NAME)]
    manifest: String,

    #[clap(long, default_value = DEFAULT_FILES_NAME)]
    files: String,
}

#[derive(Parser, Debug)]
pub enum PackageCommand {
    /// Generate a signing key
    Keygen {
        #[clap(long, default_value = "ed25519")]
        algorithm: SignatureAlgorithm,

        /// Write the key to this file instead of stdout
        #[clap(long)]
        out: Option<PathBuf>,
    },

    /// Write the signature list for a package directory
    Sign {
        /// Package directory
        dir: PathBuf,

        #[clap(flatten)]
        key: SigningKey,

        #[clap(flatten)]
        files: PackageFiles,
    },

    /// Sign a package directory and pack it into a .tar.gz archive
    Package {
        dir: PathBuf,

        /// Output archive
        #[clap(long, short)]
        out: PathBuf,

        #[clap(flatten)]
        key: SigningKey,

        #[clap(flatten)]
        files: PackageFiles,
    },

    /// Verify a package directory against a public key
    Verify {
        dir: PathBuf,

        #[clap(long, default_value = "ed25519")]
        algorithm: SignatureAlgorithm,

        /// Base64url verification key
        #[clap(long)]
        public_key: String,

        #[clap(flatten)]
        files: PackageFiles,
    },
}

impl PackageCommand {
    pub async fn execute(&self, app: &App) -> Result<()> {
        match self {
            PackageCommand::Keygen { algorithm, out } => keygen(*algorithm, out.as_deref()),
            PackageCommand::Sign { dir, key, files } => {
                let collection = localweb_core::trust::sign_directory(
                    dir,
                    key.provider()?.as_ref(),
                    &files.manifest,
                    &files.files,
                )?;
                println!("Signed {} file(s) in {}", collection.len(), dir.display());
                Ok(())
            }
            PackageCommand::Package {
                dir,
                out,
                key,
                files,
            } => {
                let collection = package_directory(
                    dir,
                    key.provider()?.as_ref(),
                    &files.manifest,
                    &files.files,
                    out,
                )?;
                let bytes = std::fs::read(out)
                    .with_context(|| format!("Failed to read archive: {}", out.display()))?;
                println!(
                    "Packed {} signed file(s) into {}",
                    collection.len(),
                    out.display()
                );
                println!("digest: {}", archive::archive_digest(&bytes));
                Ok(())
            }
            PackageCommand::Verify {
                dir,
                algorithm,
                public_key,
                files,
            } => verify(app, dir, *algorithm, public_key, files).await,
        }
    }
}

fn keygen(algorithm: SignatureAlgorithm, out: Option<&Path>) -> Result<()> {
    let pair = match algorithm {
        SignatureAlgorithm::Ed25519 => Ed25519Provider::generate().1,
        SignatureAlgorithm::HmacSha256 => {
            use rand::RngCore;
            let mut secret = [0u8; 32];
            rand::rngs::OsRng.fill_bytes(&mut secret);
            let secret = encode_signature(&secret);
            KeyPair {
                public_key: secret.clone(),
                secret_key: secret,
            }
        }
    };
    let json = serde_json::to_string_pretty(&pair)?;

    match out {
        Some(path) => {
            if path.exists() {
                bail!("Refusing to overwrite {}", path.display());
            }
            std::fs::write(path, format!("{json}\n"))
                .with_context(|| format!("Failed to write key file: {}", path.display()))?;
            println!("Wrote {} key to {}", algorithm, path.display());
            println!("publicKey: {}", pair.public_key);
        }
        None => println!("{json}"),
    }
    Ok(())
}

async fn verify(
    app: &App,
    dir: &Path,
    algorithm: SignatureAlgorithm,
    public_key: &str,
    files: &PackageFiles,
) -> Result<()> {
    let manifest_path = dir.join(&files.manifest);
    let content = std::fs::read(&manifest_path)
        .with_context(|| format!("Failed to read manifest: {}", manifest_path.display()))?;
    let manifest = Manifest::from_json(&content, &manifest_path)?;

    let mut options = HostOptions::new(&manifest.id, algorithm.provider(public_key)?);
    options.manifest_file = files.manifest.clone();
    options.files_file = files.files.clone();

    let host = Host::open(dir, dir, options, app.config.clone(), LoadOptions::default()).await?;
    println!("{} v{} verified", host.id(), host.version());
    Ok(())
}
