//! Signature error types with clear, actionable messages

use std::path::PathBuf;
use thiserror::Error;

/// Classification of integrity failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureErrorKind {
    /// The manifest file has no entry in the signature list
    ManifestMissing,
    /// The signature list file does not exist
    ListMissing,
    /// A declared file failed its signature check or is missing on disk
    Incorrect,
    /// Source files exist on disk with no signature entry
    Partial,
}

impl SignatureErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignatureErrorKind::ManifestMissing => "manifest-signature-missing",
            SignatureErrorKind::ListMissing => "signature-list-missing",
            SignatureErrorKind::Incorrect => "incorrect",
            SignatureErrorKind::Partial => "partial",
        }
    }
}

impl std::fmt::Display for SignatureErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trust system specific errors
#[derive(Error, Debug)]
pub enum SignatureError {
    /// The manifest itself is not covered by the signature list
    #[error("The signature list has no entry for the manifest file '{manifest}'.\n\nRe-sign the package with:\n  localweb package sign")]
    ManifestSignatureMissing { manifest: String },

    /// No signature list next to the manifest
    #[error("Signature list not found: {path}\n\nThe package has not been signed.")]
    ListMissing { path: PathBuf },

    /// A declared file does not match its signature
    #[error("Signature verification failed for '{src}'.\n\nThis file has been modified since the package was signed.")]
    Incorrect { src: String },

    /// Files on disk that the signature list does not account for
    #[error("{} file(s) are not covered by the signature list: {}", .unaccounted.len(), .unaccounted.join(", "))]
    Partial { unaccounted: Vec<String> },

    /// Failed to read the signature list
    #[error("Failed to read signature list from {path}")]
    ListReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse the signature list
    #[error("Failed to parse signature list (corrupted or invalid format)")]
    ListParseError {
        #[source]
        source: serde_json::Error,
    },

    /// Failed to write the signature list
    #[error("Failed to write signature list to {path}")]
    ListWriteError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A key could not be decoded or has the wrong length
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// The provider cannot produce signatures (verify-only key)
    #[error("Signature provider '{0}' cannot sign: no private key loaded")]
    SigningUnavailable(String),

    /// The operation was cancelled
    #[error("Verification cancelled")]
    Cancelled,
}

impl SignatureError {
    /// Integrity classification, if this is an integrity failure
    pub fn kind(&self) -> Option<SignatureErrorKind> {
        match self {
            SignatureError::ManifestSignatureMissing { .. } => {
                Some(SignatureErrorKind::ManifestMissing)
            }
            SignatureError::ListMissing { .. } => Some(SignatureErrorKind::ListMissing),
            SignatureError::Incorrect { .. } => Some(SignatureErrorKind::Incorrect),
            SignatureError::Partial { .. } => Some(SignatureErrorKind::Partial),
            _ => None,
        }
    }

    /// Log security-critical integrity errors
    pub fn log_if_security_critical(&self) {
        match self {
            SignatureError::Incorrect { .. } | SignatureError::Partial { .. } => {
                tracing::error!(target: "security", "INTEGRITY VIOLATION: {}", self);
            }
            _ => {}
        }
    }
}
