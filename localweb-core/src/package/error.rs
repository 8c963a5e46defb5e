//! Package loading errors

use crate::trust::SignatureError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while resolving and loading a package
#[derive(Error, Debug)]
pub enum PackageError {
    /// No package id was configured
    #[error("Package id is missing or blank")]
    MissingId,

    /// No `v<version>` or `app` directory under the package root
    #[error("No package directory found under {root}\n\nExpected a 'v<version>' or 'app' directory.")]
    DirectoryNotFound { root: PathBuf },

    /// The manifest file does not exist
    #[error("Package manifest not found: {path}")]
    ManifestNotFound { path: PathBuf },

    /// The manifest could not be parsed or has a blank id
    #[error("Invalid package manifest {path}: {reason}")]
    ManifestFormat { path: PathBuf, reason: String },

    /// The manifest id differs from the requested package id
    #[error("Package id mismatch: expected '{expected}', manifest declares '{actual}'")]
    IdMismatch { expected: String, actual: String },

    /// The manifest does not allow this host
    #[error("Package '{package}' is not compatible with host '{host_id}' {host_version}")]
    IncompatibleHost {
        package: String,
        host_id: String,
        host_version: String,
    },

    /// Integrity failure from the trust system
    #[error(transparent)]
    Signature(#[from] SignatureError),

    #[error("I/O error at {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write package settings to {path}")]
    SettingsWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Package load cancelled")]
    Cancelled,
}

impl PackageError {
    /// Whether this is a configuration problem (as opposed to integrity or I/O)
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            PackageError::MissingId
                | PackageError::IdMismatch { .. }
                | PackageError::IncompatibleHost { .. }
        )
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PackageError::Io {
            path: path.into(),
            source,
        }
    }
}
