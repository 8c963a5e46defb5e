//! Message router: the only entry point from web content into the host
//!
//! Each inbound message is bound to its origin, checked against the trust
//! gate, dispatched to a built-in command or a registered handler, and turned
//! into exactly one [`ResponseEnvelope`]. Failures never escape `handle`.

use crate::bridge::command::{Command, Dispatch};
use crate::bridge::envelope::{Reply, Request, RequestEnvelope, ResponseEnvelope};
use crate::bridge::error::CommandError;
use crate::bridge::handlers::launch::{ProcessLauncher, SystemLauncher};
use crate::bridge::handlers::window::{HeadlessWindow, WindowHost};
use crate::bridge::handlers::{crypto, files, launch, update, window, CommandContext, MessageHandler};
use crate::catalog::UpdateCoordinator;
use crate::package::Host;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use tracing::{debug, instrument, trace};

/// A download performed on behalf of content
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadRecord {
    pub url: String,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    pub started: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed: Option<DateTime<Utc>>,
}

pub struct MessageRouter {
    host: Arc<Host>,
    handlers: HashMap<String, Arc<dyn MessageHandler>>,
    window: Arc<dyn WindowHost>,
    launcher: Arc<dyn ProcessLauncher>,
    updates: Option<Arc<UpdateCoordinator>>,
    downloads: Mutex<Vec<DownloadRecord>>,
}

impl MessageRouter {
    pub fn new(host: Arc<Host>) -> Self {
        Self {
            host,
            handlers: HashMap::new(),
            window: Arc::new(HeadlessWindow::new()),
            launcher: Arc::new(SystemLauncher),
            updates: None,
            downloads: Mutex::new(Vec::new()),
        }
    }

    pub fn with_window(mut self, window: Arc<dyn WindowHost>) -> Self {
        self.window = window;
        self
    }

    pub fn with_launcher(mut self, launcher: Arc<dyn ProcessLauncher>) -> Self {
        self.launcher = launcher;
        self
    }

    pub fn with_updates(mut self, updates: Arc<UpdateCoordinator>) -> Self {
        self.updates = Some(updates);
        self
    }

    /// Register an external handler; ids are case-insensitive
    pub fn register_handler(mut self, id: &str, handler: Arc<dyn MessageHandler>) -> Self {
        self.handlers.insert(id.trim().to_ascii_lowercase(), handler);
        self
    }

    pub fn host(&self) -> &Arc<Host> {
        &self.host
    }

    /// Record a download made by the embedding browser
    pub fn record_download(&self, record: DownloadRecord) {
        let mut downloads = self.downloads.lock().unwrap_or_else(|p| p.into_inner());
        downloads.push(record);
    }

    pub fn downloads(&self) -> Vec<DownloadRecord> {
        self.downloads
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// Handle one raw message from `origin`
    pub async fn handle(&self, raw: &str, origin: &str) -> ResponseEnvelope {
        match serde_json::from_str::<Value>(raw) {
            Ok(value) => self.handle_value(value, origin).await,
            Err(e) => ResponseEnvelope::malformed(&Value::Null, CommandError::from(e)),
        }
    }

    #[instrument(skip(self, value), fields(cmd = tracing::field::Empty))]
    pub async fn handle_value(&self, value: Value, origin: &str) -> ResponseEnvelope {
        let envelope: RequestEnvelope = match serde_json::from_value(value.clone()) {
            Ok(envelope) => envelope,
            Err(e) => {
                let error = CommandError::from(e);
                error.log("<malformed>");
                return ResponseEnvelope::malformed(&value, error);
            }
        };

        let trusted = self.host.is_trusted_origin(origin);
        let request = Request::new(envelope, origin, trusted);
        tracing::Span::current().record("cmd", request.cmd());
        trace!(
            "Request {:?} '{}' from {} (trusted: {})",
            request.trace(),
            request.cmd(),
            origin,
            trusted
        );

        let processing = Utc::now();
        let result = AssertUnwindSafe(self.dispatch(&request))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| Err(panicked(request.cmd(), payload.as_ref())));
        if let Err(e) = &result {
            e.log(request.cmd());
        }
        ResponseEnvelope::from_result(&request, processing, result)
    }

    async fn dispatch(&self, request: &Request) -> Result<Reply, CommandError> {
        let messages = &self.host.config().messages;

        match Dispatch::route(request.cmd(), request.handler()) {
            Dispatch::Handler(id) => {
                let handler = self
                    .handlers
                    .get(&id)
                    .ok_or_else(|| CommandError::NotSupported(messages.handler_missing.clone()))?;
                debug!("Dispatching '{}' to handler '{}'", request.cmd(), id);
                handler.handle(request, &self.host).await
            }
            Dispatch::Unknown(cmd) => {
                debug!("Unknown command '{}'", cmd);
                Err(CommandError::NotSupported(messages.not_supported.clone()))
            }
            Dispatch::Builtin(command) => {
                if command.requires_trust(request.data()) && !self.is_privileged(request) {
                    return Err(CommandError::Permission(messages.no_permission.clone()));
                }
                self.run(command, request).await
            }
        }
    }

    /// Trusted origin and a verified package
    fn is_privileged(&self, request: &Request) -> bool {
        request.is_full_trusted() && self.host.is_verified()
    }

    async fn run(&self, command: Command, request: &Request) -> Result<Reply, CommandError> {
        let ctx = CommandContext::new(&self.host, request);
        match command {
            Command::ListFile => files::list_file(&ctx).await,
            Command::ListDrives => files::list_drives(&ctx).await,
            Command::GetFile => files::get_file(&ctx).await,
            Command::WriteFile => files::write_file(&ctx).await,
            Command::MoveFile => files::move_file(&ctx).await,
            Command::MakeDir => files::make_dir(&ctx).await,
            Command::Hash => crypto::hash(&ctx).await,
            Command::Symmetric => crypto::symmetric(&ctx).await,
            Command::Open => launch::open(&ctx, self.launcher.as_ref()).await,
            Command::DownloadList => Ok(Reply::data(serde_json::to_value(self.downloads())?)),
            Command::Theme => window::theme(&ctx, self.window.as_ref()).await,
            Command::CheckUpdate => update::check_update(&ctx, self.updates.as_deref()).await,
            Command::Window => window::window(&ctx, self.window.as_ref()).await,
        }
    }
}

/// Error for a command whose future panicked
fn panicked(cmd: &str, payload: &(dyn Any + Send)) -> CommandError {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    CommandError::Other(anyhow::anyhow!("Command '{cmd}' panicked: {message}"))
}
