//! `theme` and `window` commands
//!
//! The embedding shell owns the real window; it plugs in through
//! [`WindowHost`]. [`HeadlessWindow`] keeps the state in memory for the CLI
//! and for tests.

use crate::bridge::envelope::Reply;
use crate::bridge::error::CommandError;
use crate::bridge::handlers::CommandContext;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    System,
    Light,
    Dark,
}

impl std::str::FromStr for Theme {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "system" | "auto" => Ok(Theme::System),
            "light" => Ok(Theme::Light),
            "dark" => Ok(Theme::Dark),
            other => Err(CommandError::argument(format!("Unknown theme '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowState {
    #[default]
    Normal,
    Minimized,
    Maximized,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowAction {
    State,
    Minimize,
    Maximize,
    Restore,
    Close,
}

impl std::str::FromStr for WindowAction {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "state" => Ok(WindowAction::State),
            "minimize" => Ok(WindowAction::Minimize),
            "maximize" => Ok(WindowAction::Maximize),
            "restore" | "normal" => Ok(WindowAction::Restore),
            "close" => Ok(WindowAction::Close),
            other => Err(CommandError::argument(format!("Unknown window action '{other}'"))),
        }
    }
}

#[async_trait]
pub trait WindowHost: Send + Sync {
    async fn theme(&self) -> Theme;

    async fn set_theme(&self, theme: Theme) -> Result<(), CommandError>;

    /// Apply an action and return the resulting state
    async fn apply(&self, action: WindowAction) -> Result<WindowState, CommandError>;
}

#[derive(Debug, Default)]
pub struct HeadlessWindow {
    theme: RwLock<Theme>,
    state: RwLock<WindowState>,
}

impl HeadlessWindow {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WindowHost for HeadlessWindow {
    async fn theme(&self) -> Theme {
        self.theme.read().map(|t| *t).unwrap_or_default()
    }

    async fn set_theme(&self, theme: Theme) -> Result<(), CommandError> {
        let mut current = self
            .theme
            .write()
            .map_err(|_| CommandError::Other(anyhow::anyhow!("window state poisoned")))?;
        *current = theme;
        Ok(())
    }

    async fn apply(&self, action: WindowAction) -> Result<WindowState, CommandError> {
        let mut state = self
            .state
            .write()
            .map_err(|_| CommandError::Other(anyhow::anyhow!("window state poisoned")))?;
        if *state == WindowState::Closed && action != WindowAction::State {
            return Err(CommandError::NotSupported("The window is closed".into()));
        }
        *state = match action {
            WindowAction::State => *state,
            WindowAction::Minimize => WindowState::Minimized,
            WindowAction::Maximize => WindowState::Maximized,
            WindowAction::Restore => WindowState::Normal,
            WindowAction::Close => WindowState::Closed,
        };
        Ok(*state)
    }
}

/// Get the theme, or set it when `theme` is given
pub async fn theme(ctx: &CommandContext<'_>, window: &dyn WindowHost) -> Result<Reply, CommandError> {
    if let Some(raw) = ctx.request.str_arg("theme") {
        window.set_theme(raw.parse()?).await?;
    }
    Ok(Reply::data(serde_json::to_value(window.theme().await)?))
}

pub async fn window(ctx: &CommandContext<'_>, window: &dyn WindowHost) -> Result<Reply, CommandError> {
    let action: WindowAction = ctx.request.str_arg("action").unwrap_or("state").parse()?;
    let state = window.apply(action).await?;
    Ok(Reply::data(serde_json::to_value(state)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_headless_window_transitions() {
        let window = HeadlessWindow::new();
        assert_eq!(window.apply(WindowAction::State).await.unwrap(), WindowState::Normal);
        assert_eq!(
            window.apply(WindowAction::Maximize).await.unwrap(),
            WindowState::Maximized
        );
        assert_eq!(window.apply(WindowAction::Restore).await.unwrap(), WindowState::Normal);
        assert_eq!(window.apply(WindowAction::Close).await.unwrap(), WindowState::Closed);
        assert!(window.apply(WindowAction::Minimize).await.is_err());
    }

    #[tokio::test]
    async fn test_theme_round_trip() {
        let window = HeadlessWindow::new();
        assert_eq!(window.theme().await, Theme::System);
        window.set_theme("Dark".parse().unwrap()).await.unwrap();
        assert_eq!(window.theme().await, Theme::Dark);
        assert!("purple".parse::<Theme>().is_err());
    }
}
