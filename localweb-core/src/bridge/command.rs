//! The fixed command table

use serde_json::Value;
use std::fmt;

/// Built-in commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    ListFile,
    ListDrives,
    GetFile,
    WriteFile,
    MoveFile,
    MakeDir,
    Hash,
    Symmetric,
    Open,
    DownloadList,
    Theme,
    CheckUpdate,
    Window,
}

impl Command {
    pub const ALL: [Command; 13] = [
        Command::ListFile,
        Command::ListDrives,
        Command::GetFile,
        Command::WriteFile,
        Command::MoveFile,
        Command::MakeDir,
        Command::Hash,
        Command::Symmetric,
        Command::Open,
        Command::DownloadList,
        Command::Theme,
        Command::CheckUpdate,
        Command::Window,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Command::ListFile => "list-file",
            Command::ListDrives => "list-drives",
            Command::GetFile => "get-file",
            Command::WriteFile => "write-file",
            Command::MoveFile => "move-file",
            Command::MakeDir => "make-dir",
            Command::Hash => "hash",
            Command::Symmetric => "symmetric",
            Command::Open => "open",
            Command::DownloadList => "download-list",
            Command::Theme => "theme",
            Command::CheckUpdate => "check-update",
            Command::Window => "window",
        }
    }

    /// Look up a command; case and `-`/`_` separators are ignored
    pub fn parse(name: &str) -> Option<Self> {
        let wanted = squash(name);
        Self::ALL.into_iter().find(|c| squash(c.name()) == wanted)
    }

    /// Whether this invocation needs a fully trusted caller
    ///
    /// File-system, process and key-file access always do. Hashing text,
    /// inline-key encryption, theme, window and update checks do not.
    pub fn requires_trust(&self, data: &Value) -> bool {
        match self {
            Command::ListFile
            | Command::ListDrives
            | Command::GetFile
            | Command::WriteFile
            | Command::MoveFile
            | Command::MakeDir
            | Command::DownloadList => true,
            Command::Hash => has_field(data, "file"),
            Command::Symmetric => has_field(data, "keyFile"),
            Command::Open => !has_field(data, "url") || has_any(data, &["file", "dir", "process"]),
            Command::Theme | Command::CheckUpdate | Command::Window => false,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn squash(name: &str) -> String {
    name.trim()
        .chars()
        .filter(|c| *c != '-' && *c != '_')
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

fn has_field(data: &Value, name: &str) -> bool {
    data.get(name).is_some_and(|v| !v.is_null())
}

fn has_any(data: &Value, names: &[&str]) -> bool {
    names.iter().any(|name| has_field(data, name))
}

/// Routing decision for a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Externally registered handler, by id
    Handler(String),
    Builtin(Command),
    /// Not in the command table
    Unknown(String),
}

impl Dispatch {
    pub fn route(cmd: &str, handler: Option<&str>) -> Self {
        if let Some(handler) = handler {
            return Dispatch::Handler(handler.trim().to_ascii_lowercase());
        }
        match Command::parse(cmd) {
            Some(command) => Dispatch::Builtin(command),
            None => Dispatch::Unknown(cmd.to_string()),
        }
    }
}
