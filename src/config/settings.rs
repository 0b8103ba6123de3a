//! Configuration sections
//!
//! # Main Types
//!
//! - [`HelperConfig`] - Where to find the BLE helper and how to run it
//! - [`IngestSettings`] - Reader thread and diagnostics tuning
//! - [`PersistenceConfig`] - CSV logging options
//!
//! # Helper Resolution
//!
//! The ingestor prefers a pre-built helper binary at
//! [`HelperConfig::local_executable`]. When that file does not exist it
//! falls back to building and running the companion project with
//! [`HelperConfig::fallback_program`] and [`HelperConfig::fallback_args`]
//! (by default `dotnet run --project tools/ble-windows`).

use crate::persistence::DEFAULT_CSV_FILE;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default time to wait for the reader thread during `stop`
pub const DEFAULT_TEARDOWN_TIMEOUT_MS: u64 = 2000;

/// Default capacity of each diagnostic event subscription
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Pre-built helper binary name, relative to the working directory
#[cfg(windows)]
pub const DEFAULT_LOCAL_EXECUTABLE: &str = "ble-helper.exe";
#[cfg(not(windows))]
pub const DEFAULT_LOCAL_EXECUTABLE: &str = "ble-helper";

/// Helper process resolution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelperConfig {
    /// Pre-built helper, used when the file exists
    #[serde(default = "default_local_executable")]
    pub local_executable: PathBuf,

    /// Program used when no pre-built helper is present
    #[serde(default = "default_fallback_program")]
    pub fallback_program: String,

    /// Arguments for the fallback program
    #[serde(default = "default_fallback_args")]
    pub fallback_args: Vec<String>,

    /// Working directory for the helper (and for resolving the local executable)
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

fn default_local_executable() -> PathBuf {
    PathBuf::from(DEFAULT_LOCAL_EXECUTABLE)
}

fn default_fallback_program() -> String {
    "dotnet".to_string()
}

fn default_fallback_args() -> Vec<String> {
    vec![
        "run".to_string(),
        "--project".to_string(),
        "tools/ble-windows".to_string(),
    ]
}

impl Default for HelperConfig {
    fn default() -> Self {
        Self {
            local_executable: default_local_executable(),
            fallback_program: default_fallback_program(),
            fallback_args: default_fallback_args(),
            working_dir: None,
        }
    }
}

impl HelperConfig {
    /// Local executable path, resolved against the working directory if set
    pub fn local_executable_path(&self) -> PathBuf {
        match &self.working_dir {
            Some(dir) if self.local_executable.is_relative() => dir.join(&self.local_executable),
            _ => self.local_executable.clone(),
        }
    }
}

/// Ingestion tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestSettings {
    /// How long `stop` waits for the reader thread before detaching it
    #[serde(default = "default_teardown_timeout_ms")]
    pub teardown_timeout_ms: u64,

    /// Queue length of each diagnostic event subscription
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_teardown_timeout_ms() -> u64 {
    DEFAULT_TEARDOWN_TIMEOUT_MS
}

fn default_event_capacity() -> usize {
    DEFAULT_EVENT_CAPACITY
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            teardown_timeout_ms: DEFAULT_TEARDOWN_TIMEOUT_MS,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl IngestSettings {
    /// Teardown timeout as a Duration
    pub fn teardown_timeout(&self) -> Duration {
        Duration::from_millis(self.teardown_timeout_ms)
    }
}

/// CSV logging options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Whether measurements are written to CSV
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// CSV file path
    #[serde(default = "default_csv_path")]
    pub csv_path: PathBuf,
}

fn default_true() -> bool {
    true
}

fn default_csv_path() -> PathBuf {
    PathBuf::from(DEFAULT_CSV_FILE)
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            csv_path: default_csv_path(),
        }
    }
}
