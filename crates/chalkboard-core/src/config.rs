//! Board configuration and the shared drawing context (mode, color, staged text).

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::event_log::DEFAULT_PENDING_MOVE_WINDOW;
use crate::geometry::{SerializableColor, ShapeKind};

/// Maximum number of undo snapshots to keep.
pub const DEFAULT_MAX_HISTORY: usize = 50;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Color theme of the local view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

impl Theme {
    /// Brush color a participant starts with under this theme.
    pub fn brush_color(self) -> SerializableColor {
        match self {
            Theme::Light => SerializableColor::black(),
            Theme::Dark => SerializableColor::white(),
        }
    }

    pub fn background_color(self) -> SerializableColor {
        match self {
            Theme::Light => SerializableColor::white(),
            Theme::Dark => SerializableColor::rgb(23, 23, 23),
        }
    }

    pub fn toggle(self) -> Self {
        match self {
            Theme::Light => Theme::Dark,
            Theme::Dark => Theme::Light,
        }
    }
}

/// What happens to locally drawn events while the channel is down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectPolicy {
    /// Keep them and re-publish after the next initial state (may duplicate).
    #[default]
    QueueAndReplay,
    /// Keep them locally only until the next initial state replaces the log.
    Drop,
}

/// Persistent board settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoardConfig {
    /// Drawing surface width in pixels.
    pub surface_width: u32,
    /// Drawing surface height in pixels.
    pub surface_height: u32,
    /// Stroke width for segments and outlines (round caps).
    pub line_width: f64,
    /// Text size in pixels.
    pub font_size: f64,
    pub theme: Theme,
    /// Appends an early `TextMove` may wait for its text.
    pub pending_move_window: usize,
    /// Undo snapshots kept per participant.
    pub max_history: usize,
    pub disconnect_policy: DisconnectPolicy,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            surface_width: 1920,
            surface_height: 1080,
            line_width: 3.0,
            font_size: 16.0,
            theme: Theme::default(),
            pending_move_window: DEFAULT_PENDING_MOVE_WINDOW,
            max_history: DEFAULT_MAX_HISTORY,
            disconnect_policy: DisconnectPolicy::default(),
        }
    }
}

impl BoardConfig {
    /// Load from a JSON file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Drawing modes. Exactly one is active at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrawMode {
    #[default]
    Freehand,
    Rectangle,
    Circle,
    Text,
}

impl DrawMode {
    pub fn shape_kind(self) -> Option<ShapeKind> {
        match self {
            DrawMode::Rectangle => Some(ShapeKind::Rectangle),
            DrawMode::Circle => Some(ShapeKind::Circle),
            DrawMode::Freehand | DrawMode::Text => None,
        }
    }
}

/// Read/write drawing context for one active view.
///
/// Passed explicitly to the interaction controller (which owns it) and to
/// the renderer; nothing here is global.
#[derive(Debug, Clone, PartialEq)]
pub struct BoardContext {
    config: BoardConfig,
    mode: DrawMode,
    color: SerializableColor,
    staged_text: String,
}

impl Default for BoardContext {
    fn default() -> Self {
        Self::new(BoardConfig::default())
    }
}

impl BoardContext {
    pub fn new(config: BoardConfig) -> Self {
        let color = config.theme.brush_color();
        Self {
            config,
            mode: DrawMode::default(),
            color,
            staged_text: String::new(),
        }
    }

    pub fn config(&self) -> &BoardConfig {
        &self.config
    }

    pub fn mode(&self) -> DrawMode {
        self.mode
    }

    pub(crate) fn set_mode(&mut self, mode: DrawMode) {
        self.mode = mode;
    }

    pub fn color(&self) -> SerializableColor {
        self.color
    }

    pub fn set_color(&mut self, color: SerializableColor) {
        self.color = color;
    }

    pub fn staged_text(&self) -> &str {
        &self.staged_text
    }

    pub fn set_staged_text(&mut self, text: impl Into<String>) {
        self.staged_text = text.into();
    }

    pub(crate) fn take_staged_text(&mut self) -> String {
        std::mem::take(&mut self.staged_text)
    }

    pub fn theme(&self) -> Theme {
        self.config.theme
    }

    /// Switch theme; the brush color follows the theme default.
    pub fn set_theme(&mut self, theme: Theme) {
        self.config.theme = theme;
        self.color = theme.brush_color();
    }

    pub fn background(&self) -> SerializableColor {
        self.config.theme.background_color()
    }

    pub fn line_width(&self) -> f64 {
        self.config.line_width
    }

    pub fn font_size(&self) -> f64 {
        self.config.font_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BoardConfig::default();
        assert_eq!(config.line_width, 3.0);
        assert_eq!(config.font_size, 16.0);
        assert_eq!(config.max_history, DEFAULT_MAX_HISTORY);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = BoardConfig::from_json(r#"{ "theme": "dark", "line_width": 5.0 }"#).unwrap();
        assert_eq!(config.theme, Theme::Dark);
        assert_eq!(config.line_width, 5.0);
        assert_eq!(config.surface_width, 1920);
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(BoardConfig::from_json("{ nope"), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("board.json");

        let mut config = BoardConfig::default();
        config.surface_width = 640;
        config.disconnect_policy = DisconnectPolicy::Drop;
        config.save(&path).unwrap();

        assert_eq!(BoardConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = BoardConfig::load(dir.path().join("missing.json"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_theme_sets_brush_color() {
        let mut context = BoardContext::default();
        assert_eq!(context.color(), SerializableColor::black());
        context.set_theme(Theme::Dark);
        assert_eq!(context.color(), SerializableColor::white());
        assert_eq!(context.background(), Theme::Dark.background_color());
    }
}
