//! Command errors surfaced to web content
//!
//! Every failure inside the bridge becomes a [`CommandError`], and every
//! `CommandError` becomes an error response. Nothing escapes to the
//! transport.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CommandError {
    /// Missing or malformed request data
    #[error("{0}")]
    Argument(String),

    #[error("{message}")]
    Io {
        message: String,
        #[source]
        source: std::io::Error,
    },

    /// The caller is not allowed to run this command
    #[error("{0}")]
    Permission(String),

    #[error("{0}")]
    NotSupported(String),

    /// Content that could not be decoded (JSON, Base64, UTF-8, ciphertext)
    #[error("{0}")]
    Format(String),

    /// Several independent failures
    #[error("{message}")]
    Aggregate {
        message: String,
        errors: Vec<CommandError>,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CommandError {
    pub fn argument(message: impl Into<String>) -> Self {
        CommandError::Argument(message.into())
    }

    pub fn format(message: impl Into<String>) -> Self {
        CommandError::Format(message.into())
    }

    pub fn io(message: impl Into<String>, source: std::io::Error) -> Self {
        CommandError::Io {
            message: message.into(),
            source,
        }
    }

    /// Stable tag reported in the response `type` field
    pub fn type_name(&self) -> &'static str {
        match self {
            CommandError::Argument(_) => "argument",
            CommandError::Io { .. } => "io",
            CommandError::Permission(_) => "permission",
            CommandError::NotSupported(_) => "not-supported",
            CommandError::Format(_) => "format",
            CommandError::Aggregate { .. } => "aggregate",
            CommandError::Other(_) => "other",
        }
    }

    /// Messages of the inner causes, outermost first
    pub fn causes(&self) -> Vec<String> {
        match self {
            CommandError::Aggregate { errors, .. } => {
                errors.iter().map(ToString::to_string).collect()
            }
            CommandError::Other(e) => e.chain().skip(1).map(ToString::to_string).collect(),
            other => {
                let mut causes = Vec::new();
                let mut source = std::error::Error::source(other);
                while let Some(err) = source {
                    causes.push(err.to_string());
                    source = err.source();
                }
                causes
            }
        }
    }

    /// Collapse a list of failures; `None` when the list is empty
    pub fn aggregate(message: impl Into<String>, mut errors: Vec<CommandError>) -> Option<Self> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(CommandError::Aggregate {
                message: message.into(),
                errors,
            }),
        }
    }

    /// Log unexpected and permission failures
    pub fn log(&self, cmd: &str) {
        match self {
            CommandError::Permission(_) => {
                tracing::warn!(target: "security", "Denied '{}' for untrusted caller", cmd);
            }
            CommandError::Other(e) => {
                tracing::error!("Unexpected failure in '{}': {:#}", cmd, e);
            }
            other => tracing::debug!("'{}' failed ({}): {}", cmd, other.type_name(), other),
        }
    }
}

impl From<serde_json::Error> for CommandError {
    fn from(e: serde_json::Error) -> Self {
        CommandError::Format(e.to_string())
    }
}
