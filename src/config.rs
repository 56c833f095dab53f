// ABOUTME: Application configuration loaded from ~/.webterm/config.toml
// Every field has a default so a missing or partial file still yields a full config

use crate::terminal::attach::AttachOptions;
use crate::terminal::fit::CellMetrics;
use crate::terminal::widget::WidgetOptions;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

const APP_DIR: &str = ".webterm";
const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("config serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("invalid detach key {0:?}, expected \"ctrl-<key>\" or \"none\"")]
    InvalidDetachKey(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub client: ClientConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Bridge server host
    pub host: String,
    pub port: u16,
    pub connect_timeout_secs: u64,
    /// "ctrl-]" style key that detaches locally, or "none"
    pub detach_key: String,
    /// Send the fitted size once the resize handler is registered
    pub announce_initial_size: bool,
    /// Glyph cell size; only used when the terminal reports pixel sizes
    pub cell_width_px: Option<u16>,
    pub cell_height_px: Option<u16>,
    pub padding_px: u16,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8080,
            connect_timeout_secs: 5,
            detach_key: "ctrl-]".to_string(),
            announce_initial_size: false,
            cell_width_px: None,
            cell_height_px: None,
            padding_px: 0,
        }
    }
}

impl ClientConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn widget_options(&self) -> WidgetOptions {
        let cell_metrics = match (self.cell_width_px, self.cell_height_px) {
            (Some(width_px), Some(height_px)) => Some(CellMetrics { width_px, height_px }),
            _ => None,
        };
        WidgetOptions {
            cell_metrics,
            padding_px: self.padding_px,
        }
    }

    pub fn attach_options(&self) -> Result<AttachOptions, ConfigError> {
        Ok(AttachOptions {
            detach_key: parse_detach_key(&self.detach_key)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    /// Image used when a session container has to be created
    pub image: String,
    pub create_missing: bool,
    /// Remove containers this server created once their socket closes
    pub remove_on_disconnect: bool,
    pub docker_host: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
            image: "alpine:3".to_string(),
            create_missing: true,
            remove_on_disconnect: false,
            docker_host: None,
        }
    }
}

impl AppConfig {
    /// `~/.webterm`, or `./.webterm` when there is no home directory
    pub fn app_dir() -> PathBuf {
        directories::BaseDirs::new()
            .map(|dirs| dirs.home_dir().join(APP_DIR))
            .unwrap_or_else(|| PathBuf::from(APP_DIR))
    }

    pub fn default_path() -> PathBuf {
        Self::app_dir().join(CONFIG_FILE)
    }

    pub fn log_dir() -> PathBuf {
        Self::app_dir().join("logs")
    }

    /// Load from the default location
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::default_path())
    }

    /// Load from `path`; a missing file means defaults
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.client.attach_options()?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// "ctrl-]" → 0x1d, "ctrl-a" → 0x01, "none" → no detach key
fn parse_detach_key(spec: &str) -> Result<Option<u8>, ConfigError> {
    let spec_lower = spec.trim().to_ascii_lowercase();
    if spec_lower == "none" || spec_lower.is_empty() {
        return Ok(None);
    }

    let key = spec_lower
        .strip_prefix("ctrl-")
        .or_else(|| spec_lower.strip_prefix("ctrl+"))
        .ok_or_else(|| ConfigError::InvalidDetachKey(spec.to_string()))?;

    match key.as_bytes() {
        [c @ (b'a'..=b'z' | b'@' | b'[' | b'\\' | b']' | b'^' | b'_')] => Ok(Some(c & 0x1f)),
        _ => Err(ConfigError::InvalidDetachKey(spec.to_string())),
    }
}
