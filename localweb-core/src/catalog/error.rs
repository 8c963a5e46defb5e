//! Update and install errors

use crate::package::PackageError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum UpdateError {
    /// Another update for the same package id is running
    #[error("An update for '{id}' is already in progress")]
    InProgress { id: String },

    /// Download or update check failed
    #[error("Failed to fetch {url}: {reason}")]
    Fetch { url: String, reason: String },

    /// The update descriptor could not be parsed
    #[error("Invalid update descriptor: {reason}")]
    Descriptor { reason: String },

    #[error("Digest verification failed!\nExpected: {expected}\nActual: {actual}")]
    DigestMismatch { expected: String, actual: String },

    /// The archive could not be read or extracted
    #[error("Invalid package archive: {reason}")]
    Archive { reason: String },

    /// No manifest at the archive root or in its single top-level directory
    #[error("No '{manifest}' found in the package archive")]
    ManifestRootNotFound { manifest: String },

    /// The candidate declares a different version than promised
    #[error("Candidate version '{actual}' does not match the promised version '{promised}'")]
    VersionMismatch { promised: String, actual: String },

    /// The candidate failed to load or verify, or settings could not be written
    #[error(transparent)]
    Package(#[from] PackageError),

    #[error("I/O error at {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Update cancelled")]
    Cancelled,
}

impl UpdateError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        UpdateError::Io {
            path: path.into(),
            source,
        }
    }

    /// Transient failures are reported as "no update" by update checks
    pub fn is_transient(&self) -> bool {
        matches!(self, UpdateError::Fetch { .. } | UpdateError::Io { .. })
    }
}
