//! `open` command: URLs in the default browser, files and folders in their
//! default application, and processes

use crate::bridge::envelope::{Reply, Request};
use crate::bridge::error::CommandError;
use crate::bridge::handlers::CommandContext;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Outcome of starting a process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Launched {
    pub pid: Option<u32>,
    /// Exit code, only when the caller waited
    pub exit_code: Option<i32>,
}

/// Operating-system launch surface
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    async fn open_url(&self, url: &url::Url) -> std::io::Result<()>;

    async fn open_path(&self, path: &Path) -> std::io::Result<()>;

    async fn run(
        &self,
        program: &str,
        args: &[String],
        cwd: Option<&Path>,
        wait: bool,
    ) -> std::io::Result<Launched>;
}

/// Launches through the platform opener and `tokio::process`
#[derive(Debug, Default, Clone)]
pub struct SystemLauncher;

impl SystemLauncher {
    fn opener(target: &std::ffi::OsStr) -> tokio::process::Command {
        if cfg!(target_os = "windows") {
            let mut command = tokio::process::Command::new("cmd");
            command.arg("/C").arg("start").arg("").arg(target);
            command
        } else if cfg!(target_os = "macos") {
            let mut command = tokio::process::Command::new("open");
            command.arg(target);
            command
        } else {
            let mut command = tokio::process::Command::new("xdg-open");
            command.arg(target);
            command
        }
    }

    async fn spawn_opener(target: &std::ffi::OsStr) -> std::io::Result<()> {
        let status = Self::opener(target).status().await?;
        if status.success() {
            Ok(())
        } else {
            Err(std::io::Error::other(format!("opener exited with {status}")))
        }
    }
}

#[async_trait]
impl ProcessLauncher for SystemLauncher {
    async fn open_url(&self, url: &url::Url) -> std::io::Result<()> {
        Self::spawn_opener(url.as_str().as_ref()).await
    }

    async fn open_path(&self, path: &Path) -> std::io::Result<()> {
        Self::spawn_opener(path.as_os_str()).await
    }

    async fn run(
        &self,
        program: &str,
        args: &[String],
        cwd: Option<&Path>,
        wait: bool,
    ) -> std::io::Result<Launched> {
        let mut command = tokio::process::Command::new(program);
        command.args(args);
        if let Some(cwd) = cwd {
            command.current_dir(cwd);
        }

        let mut child = command.spawn()?;
        let pid = child.id();
        if !wait {
            debug!("Started '{}' (pid {:?}) without waiting", program, pid);
            return Ok(Launched { pid, exit_code: None });
        }

        let status = child.wait().await?;
        if !status.success() {
            warn!("Process '{}' exited with {}", program, status);
        }
        Ok(Launched {
            pid,
            exit_code: status.code(),
        })
    }
}

/// `args` as a string (shell-word split) or an array of strings
fn process_args(request: &Request) -> Result<Vec<String>, CommandError> {
    match request.data().get("args") {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::String(line)) => shell_words::split(line)
            .map_err(|e| CommandError::argument(format!("Invalid 'args': {e}"))),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| CommandError::argument("'args' must contain only strings"))
            })
            .collect(),
        Some(_) => Err(CommandError::argument("'args' must be a string or an array")),
    }
}

/// Parse a URL that may be opened; only http and https are accepted
pub fn browsable_url(raw: &str) -> Result<url::Url, CommandError> {
    let url = url::Url::parse(raw.trim())
        .map_err(|e| CommandError::argument(format!("Invalid url '{raw}': {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(CommandError::NotSupported(format!(
            "Cannot open '{other}' urls"
        ))),
    }
}

pub async fn open(
    ctx: &CommandContext<'_>,
    launcher: &dyn ProcessLauncher,
) -> Result<Reply, CommandError> {
    let request = ctx.request;

    if let Some(process) = request.str_arg("process") {
        let program = resolve_program(ctx, process)?;
        let args = process_args(request)?;
        let cwd = match request.str_arg("dir") {
            Some(_) => Some(ctx.local_path("dir")?),
            None => None,
        };

        info!("Starting process '{}' for {}", program, ctx.host.id());
        let launched = launcher
            .run(&program, &args, cwd.as_deref(), request.flag("wait"))
            .await
            .map_err(|e| CommandError::io(format!("Failed to start '{process}'"), e))?;
        return Ok(Reply::data(json!({
            "pid": launched.pid,
            "exitCode": launched.exit_code,
        })));
    }

    if let Some(name) = ["file", "dir"]
        .into_iter()
        .find(|name| request.str_arg(name).is_some())
    {
        let path = ctx.local_path(name)?;
        if !path.exists() {
            return Err(CommandError::io(
                format!("'{}' does not exist", path.display()),
                std::io::Error::new(std::io::ErrorKind::NotFound, "path not found"),
            ));
        }
        launcher
            .open_path(&path)
            .await
            .map_err(|e| CommandError::io(format!("Failed to open '{}'", path.display()), e))?;
        return Ok(Reply::data(true));
    }

    if let Some(raw) = request.str_arg("url") {
        let url = browsable_url(raw)?;
        launcher
            .open_url(&url)
            .await
            .map_err(|e| CommandError::io(format!("Failed to open '{url}'"), e))?;
        return Ok(Reply::data(true));
    }

    Err(CommandError::argument("'url', 'file', 'dir' or 'process' is required"))
}

/// Package-relative programs are mapped; bare names are left to `PATH`
fn resolve_program(ctx: &CommandContext<'_>, process: &str) -> Result<String, CommandError> {
    let looks_like_path = process.contains('/') || process.contains('\\') || process.starts_with('.');
    if !looks_like_path {
        return Ok(process.to_string());
    }
    let path: PathBuf = crate::bridge::handlers::resolve_local(ctx.host, process)?;
    Ok(path.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(data: Value) -> Request {
        Request::new(
            serde_json::from_value(json!({"cmd": "open", "data": data})).unwrap(),
            "https://demo.localhost/",
            true,
        )
    }

    #[test]
    fn test_process_args_forms() {
        assert_eq!(
            process_args(&request(json!({"args": "-a 'two words'"}))).unwrap(),
            vec!["-a", "two words"]
        );
        assert_eq!(
            process_args(&request(json!({"args": ["x", "y"]}))).unwrap(),
            vec!["x", "y"]
        );
        assert!(process_args(&request(json!({}))).unwrap().is_empty());
        assert!(process_args(&request(json!({"args": [1]}))).is_err());
        assert!(process_args(&request(json!({"args": "unterminated 'quote"}))).is_err());
    }

    #[test]
    fn test_browsable_url_schemes() {
        assert!(browsable_url("https://example.com/a").is_ok());
        assert!(browsable_url("http://example.com").is_ok());
        assert!(matches!(
            browsable_url("file:///etc/passwd"),
            Err(CommandError::NotSupported(_))
        ));
        assert!(matches!(
            browsable_url("javascript:alert(1)"),
            Err(CommandError::NotSupported(_))
        ));
        assert!(matches!(browsable_url("not a url"), Err(CommandError::Argument(_))));
    }
}
