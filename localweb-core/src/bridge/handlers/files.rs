//! File-system commands: list-file, list-drives, get-file, write-file,
//! move-file, make-dir
//!
//! All of them require a fully trusted caller; the router enforces that
//! before dispatching here.

use crate::bridge::envelope::Reply;
use crate::bridge::error::CommandError;
use crate::bridge::handlers::CommandContext;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// File attributes reported to content; unreadable attributes are omitted
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    pub name: String,
    pub path: String,
    pub is_dir: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub readonly: Option<bool>,
}

/// Attributes of `path`, displayed as `display`; `None` if it does not exist
pub fn file_info(path: &Path, display: &str) -> Option<FileInfo> {
    let metadata = std::fs::metadata(path).ok()?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    Some(FileInfo {
        name,
        path: display.to_string(),
        is_dir: metadata.is_dir(),
        size: metadata.is_file().then(|| metadata.len()),
        modified: metadata.modified().ok().map(DateTime::<Utc>::from),
        created: metadata.created().ok().map(DateTime::<Utc>::from),
        readonly: Some(metadata.permissions().readonly()),
    })
}

fn info_value(path: &Path, display: &str) -> serde_json::Value {
    file_info(path, display)
        .and_then(|info| serde_json::to_value(info).ok())
        .unwrap_or_default()
}

/// `*`/`?` wildcard to an anchored, case-insensitive regex
fn wildcard(pattern: &str) -> Result<Regex, CommandError> {
    let escaped = regex::escape(pattern).replace(r"\*", ".*").replace(r"\?", ".");
    Regex::new(&format!("(?i)^{escaped}$"))
        .map_err(|e| CommandError::argument(format!("Invalid pattern '{pattern}': {e}")))
}

pub async fn list_file(ctx: &CommandContext<'_>) -> Result<Reply, CommandError> {
    let dir = ctx.local_path("path")?;
    let pattern = ctx.request.str_arg("pattern").map(wildcard).transpose()?;
    let recursive = ctx.request.flag("recursive");

    if !dir.is_dir() {
        return Err(CommandError::io(
            format!("Not a directory: {}", dir.display()),
            std::io::Error::new(std::io::ErrorKind::NotFound, "directory not found"),
        ));
    }

    let max_depth = if recursive { usize::MAX } else { 1 };
    let mut entries = Vec::new();
    for entry in WalkDir::new(&dir).min_depth(1).max_depth(max_depth).sort_by_file_name() {
        let Ok(entry) = entry else { continue };
        let name = entry.file_name().to_string_lossy();
        if let Some(pattern) = &pattern {
            if !entry.file_type().is_dir() && !pattern.is_match(&name) {
                continue;
            }
        }
        let relative = entry
            .path()
            .strip_prefix(&dir)
            .map(|p| p.to_string_lossy().replace('\\', "/"))
            .unwrap_or_default();
        if let Some(info) = file_info(entry.path(), &relative) {
            entries.push(info);
        }
    }

    debug!("Listed {} entries under {:?}", entries.len(), dir);
    Ok(Reply::data(serde_json::to_value(entries)?))
}

pub async fn list_drives(_ctx: &CommandContext<'_>) -> Result<Reply, CommandError> {
    let drives: Vec<serde_json::Value> = drive_roots()
        .into_iter()
        .map(|root| {
            let display = root.display().to_string();
            json!({ "name": display, "path": display })
        })
        .collect();
    Ok(Reply::data(drives))
}

#[cfg(windows)]
fn drive_roots() -> Vec<PathBuf> {
    (b'A'..=b'Z')
        .map(|letter| PathBuf::from(format!("{}:\\", letter as char)))
        .filter(|root| root.exists())
        .collect()
}

#[cfg(not(windows))]
fn drive_roots() -> Vec<PathBuf> {
    let mut roots = vec![PathBuf::from("/")];
    roots.extend(dirs::home_dir());
    roots
}

pub async fn get_file(ctx: &CommandContext<'_>) -> Result<Reply, CommandError> {
    let raw = ctx.request.required_str("path")?;
    let path = ctx.local_path("path")?;

    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|e| CommandError::io(format!("Failed to read '{raw}'"), e))?;

    let data = match ctx.request.str_arg("encoding").unwrap_or("text") {
        "base64" => STANDARD.encode(&bytes),
        "text" => String::from_utf8(bytes)
            .map_err(|_| CommandError::format(format!("'{raw}' is not valid UTF-8 text")))?,
        other => {
            return Err(CommandError::argument(format!("Unknown encoding '{other}'")));
        }
    };

    Ok(Reply::data(data).with_info(info_value(&path, raw)))
}

pub async fn write_file(ctx: &CommandContext<'_>) -> Result<Reply, CommandError> {
    let raw = ctx.request.required_str("path")?;
    let path = ctx.local_path("path")?;

    let bytes = match (ctx.request.str_arg("text"), ctx.request.str_arg("base64")) {
        (Some(text), _) => text.as_bytes().to_vec(),
        (None, Some(encoded)) => STANDARD
            .decode(encoded.trim())
            .map_err(|e| CommandError::format(format!("Invalid base64 content: {e}")))?,
        (None, None) => return Err(CommandError::argument("'text' or 'base64' is required")),
    };

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| CommandError::io(format!("Failed to create folder for '{raw}'"), e))?;
    }

    let write_err = |e| CommandError::io(format!("Failed to write '{raw}'"), e);
    if ctx.request.flag("append") {
        use tokio::io::AsyncWriteExt;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(write_err)?;
        file.write_all(&bytes).await.map_err(write_err)?;
        file.flush().await.map_err(write_err)?;
    } else {
        tokio::fs::write(&path, &bytes).await.map_err(write_err)?;
    }

    Ok(Reply::data(bytes.len()).with_info(info_value(&path, raw)))
}

/// Move, copy (`copy: true`) or delete (`delete: true`) a file or folder
pub async fn move_file(ctx: &CommandContext<'_>) -> Result<Reply, CommandError> {
    let raw_from = ctx.request.required_str("from")?;
    let from = ctx.local_path("from")?;
    if !from.exists() {
        return Err(CommandError::io(
            format!("'{raw_from}' does not exist"),
            std::io::Error::new(std::io::ErrorKind::NotFound, "source not found"),
        ));
    }

    if ctx.request.flag("delete") && !ctx.request.flag("copy") {
        remove_path(&from)
            .await
            .map_err(|e| CommandError::io(format!("Failed to delete '{raw_from}'"), e))?;
        return Ok(Reply::data(true));
    }

    let raw_to = ctx.request.required_str("to")?;
    let to = ctx.local_path("to")?;
    if to.exists() {
        if !ctx.request.flag("overwrite") {
            return Err(CommandError::argument(format!("'{raw_to}' already exists")));
        }
        remove_path(&to)
            .await
            .map_err(|e| CommandError::io(format!("Failed to replace '{raw_to}'"), e))?;
    }
    if let Some(parent) = to.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| CommandError::io(format!("Failed to create folder for '{raw_to}'"), e))?;
    }

    if ctx.request.flag("copy") {
        copy_path(&from, &to, raw_from).await?;
        if ctx.request.flag("delete") {
            remove_path(&from)
                .await
                .map_err(|e| CommandError::io(format!("Failed to delete '{raw_from}'"), e))?;
        }
    } else if tokio::fs::rename(&from, &to).await.is_err() {
        // Rename fails across volumes
        copy_path(&from, &to, raw_from).await?;
        remove_path(&from)
            .await
            .map_err(|e| CommandError::io(format!("Failed to delete '{raw_from}'"), e))?;
    }

    Ok(Reply::data(true).with_info(info_value(&to, raw_to)))
}

pub async fn make_dir(ctx: &CommandContext<'_>) -> Result<Reply, CommandError> {
    let raw = ctx.request.required_str("path")?;
    let path = ctx.local_path("path")?;
    tokio::fs::create_dir_all(&path)
        .await
        .map_err(|e| CommandError::io(format!("Failed to create '{raw}'"), e))?;
    Ok(Reply::data(true).with_info(info_value(&path, raw)))
}

async fn remove_path(path: &Path) -> std::io::Result<()> {
    if path.is_dir() {
        tokio::fs::remove_dir_all(path).await
    } else {
        tokio::fs::remove_file(path).await
    }
}

/// Copy a file or folder tree
///
/// A folder copy carries on past failing entries and reports all of them.
async fn copy_path(from: &Path, to: &Path, raw_from: &str) -> Result<(), CommandError> {
    if !from.is_dir() {
        return tokio::fs::copy(from, to)
            .await
            .map(|_| ())
            .map_err(|e| CommandError::io(format!("Failed to copy '{raw_from}'"), e));
    }

    let mut errors = Vec::new();
    for entry in WalkDir::new(from).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let message = format!("Failed to read an entry of '{raw_from}'");
                errors.push(CommandError::io(message, e.into()));
                continue;
            }
        };
        let Ok(relative) = entry.path().strip_prefix(from) else {
            continue;
        };
        let target: PathBuf = to.join(relative);
        let result = if entry.file_type().is_dir() {
            tokio::fs::create_dir_all(&target).await
        } else if entry.file_type().is_file() {
            tokio::fs::copy(entry.path(), &target).await.map(|_| ())
        } else {
            continue;
        };
        if let Err(e) = result {
            let shown = relative.to_string_lossy().replace('\\', "/");
            errors.push(CommandError::io(format!("Failed to copy '{shown}'"), e));
        }
    }

    let message = format!("Failed to copy {} entries of '{raw_from}'", errors.len());
    match CommandError::aggregate(message, errors) {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wildcard() {
        let pattern = wildcard("*.JS").unwrap();
        assert!(pattern.is_match("app.js"));
        assert!(!pattern.is_match("app.json"));
        assert!(wildcard("a?c.txt").unwrap().is_match("abc.txt"));
        assert!(!wildcard("a+b").unwrap().is_match("aab"));
    }

    #[test]
    fn test_file_info_omits_missing() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let file = temp_dir.path().join("a.txt");
        std::fs::write(&file, "hello").unwrap();

        let info = file_info(&file, "a.txt").unwrap();
        assert_eq!(info.name, "a.txt");
        assert_eq!(info.size, Some(5));
        assert!(!info.is_dir);

        let dir_info = file_info(temp_dir.path(), ".").unwrap();
        assert_eq!(dir_info.size, None);
        let json = serde_json::to_value(&dir_info).unwrap();
        assert!(json.get("size").is_none());

        assert!(file_info(&temp_dir.path().join("missing"), "missing").is_none());
    }

    #[tokio::test]
    async fn test_folder_copy_reports_every_failed_entry() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let from = temp_dir.path().join("from");
        std::fs::create_dir_all(from.join("sub")).unwrap();
        std::fs::write(from.join("top.txt"), "top").unwrap();
        std::fs::write(from.join("sub/a.txt"), "a").unwrap();
        std::fs::write(from.join("sub/b.txt"), "b").unwrap();

        // A file where the copy needs a folder
        let to = temp_dir.path().join("to");
        std::fs::create_dir_all(&to).unwrap();
        std::fs::write(to.join("sub"), "in the way").unwrap();

        let err = copy_path(&from, &to, "from").await.unwrap_err();
        assert_eq!(err.type_name(), "aggregate");
        assert_eq!(err.to_string(), "Failed to copy 3 entries of 'from'");
        let mut causes = err.causes();
        causes.sort();
        assert_eq!(
            causes,
            vec![
                "Failed to copy 'sub'",
                "Failed to copy 'sub/a.txt'",
                "Failed to copy 'sub/b.txt'",
            ]
        );
        assert_eq!(std::fs::read_to_string(to.join("top.txt")).unwrap(), "top");

        let single = copy_path(&from.join("missing.txt"), &to.join("x"), "missing.txt")
            .await
            .unwrap_err();
        assert_eq!(single.type_name(), "io");
    }
}
