//! Built-in command handlers

pub mod crypto;
pub mod files;
pub mod launch;
pub mod update;
pub mod window;

use crate::bridge::envelope::{Reply, Request};
use crate::bridge::error::CommandError;
use crate::package::{Host, MappedPath};
use async_trait::async_trait;
use std::path::PathBuf;

/// Externally registered handler, addressed by the request's `handler` id
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, request: &Request, host: &Host) -> Result<Reply, CommandError>;
}

/// What a built-in handler can see
pub struct CommandContext<'a> {
    pub host: &'a Host,
    pub request: &'a Request,
}

impl<'a> CommandContext<'a> {
    pub fn new(host: &'a Host, request: &'a Request) -> Self {
        Self { host, request }
    }

    /// Map a required path argument to a local path
    pub fn local_path(&self, name: &str) -> Result<PathBuf, CommandError> {
        let raw = self.request.required_str(name)?;
        resolve_local(self.host, raw)
    }
}

/// Map a content path to a local path, refusing remote and rejected paths
pub fn resolve_local(host: &Host, raw: &str) -> Result<PathBuf, CommandError> {
    match host.map_local_path(raw, false) {
        Some(MappedPath::Local(path)) => Ok(path),
        Some(MappedPath::Remote(_)) => Err(CommandError::NotSupported(format!(
            "Remote paths are not supported here: '{raw}'"
        ))),
        None => Err(CommandError::argument(format!("Invalid path: '{raw}'"))),
    }
}
