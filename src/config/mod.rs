//! Configuration module for hrm-stream
//!
//! The configuration is a TOML file with three sections:
//!
//! ```toml
//! [helper]
//! local_executable = "ble-helper.exe"
//! fallback_program = "dotnet"
//! fallback_args = ["run", "--project", "tools/ble-windows"]
//!
//! [ingest]
//! teardown_timeout_ms = 2000
//! event_capacity = 256
//!
//! [persistence]
//! enabled = true
//! csv_path = "bpm_log.csv"
//! ```
//!
//! Every field is optional; missing fields take their defaults.
//!
//! # Config Location
//!
//! Without an explicit path the file is looked up in the platform config
//! directory under `hrm-stream`:
//!
//! - **Linux**: `~/.config/hrm-stream/config.toml`
//! - **macOS**: `~/Library/Application Support/hrm-stream/config.toml`
//! - **Windows**: `%APPDATA%\hrm-stream\config.toml`

pub mod settings;

pub use settings::*;

use crate::error::{HrmError, Result, ResultExt};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application identifier for config directories
pub const APP_ID: &str = "hrm-stream";

/// Config filename
pub const CONFIG_FILE: &str = "config.toml";

/// Get the application config directory path
pub fn app_config_dir() -> Option<PathBuf> {
    dirs_next::config_dir().map(|p| p.join(APP_ID))
}

/// Default config file path
pub fn default_config_path() -> Option<PathBuf> {
    app_config_dir().map(|p| p.join(CONFIG_FILE))
}

/// Complete application configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// Helper process resolution
    #[serde(default)]
    pub helper: HelperConfig,

    /// Ingestion tuning
    #[serde(default)]
    pub ingest: IngestSettings,

    /// CSV logging
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

impl AppConfig {
    /// Create a new default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load a configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;

        toml::from_str(&content).map_err(|e| {
            HrmError::Config(format!("Failed to parse config file {:?}: {}", path, e))
        })
    }

    /// Load a configuration file, returning defaults if it is missing or invalid
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!("No config at {:?}, using defaults", path);
            return Self::default();
        }

        Self::load(path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Load from the default location, or defaults if there is none
    pub fn load_default_location() -> Self {
        match default_config_path() {
            Some(path) => Self::load_or_default(path),
            None => Self::default(),
        }
    }

    /// Save the configuration as TOML, creating parent directories
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory {:?}", parent))?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).with_context(|| format!("Failed to write config {:?}", path))
    }
}
