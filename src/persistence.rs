//! Persistence sinks for parsed measurements
//!
//! The ingestor hands every measurement to a [`MeasurementSink`] before
//! notifying listeners. [`CsvDataLogger`] appends one row per measurement to
//! a CSV file and flushes immediately, so a crash loses at most the line in
//! flight.
//!
//! Row format: `"<local ISO-8601 datetime>","<bpm>"`, every field quoted.

use crate::error::{HrmError, Result};
use chrono::Local;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// Default CSV file name, relative to the working directory
pub const DEFAULT_CSV_FILE: &str = "bpm_log.csv";

/// Receiver of every parsed bpm, in delivery order.
///
/// Called on the reader thread; implementations must not block for long and
/// must not panic.
pub trait MeasurementSink: Send + Sync {
    fn log(&self, bpm: i32);
}

/// Sink that drops everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl MeasurementSink for NullSink {
    fn log(&self, _bpm: i32) {}
}

struct CsvState {
    writer: Option<BufWriter<File>>,
    rows_written: u64,
}

/// Appends measurements to a CSV file
pub struct CsvDataLogger {
    path: PathBuf,
    state: Mutex<CsvState>,
}

impl CsvDataLogger {
    /// Logger writing to [`DEFAULT_CSV_FILE`]
    pub fn new() -> Self {
        Self::with_path(DEFAULT_CSV_FILE)
    }

    /// Logger writing to the given path
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: Mutex::new(CsvState {
                writer: None,
                rows_written: 0,
            }),
        }
    }

    /// Target file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open the file in append mode. Calling it again while open is a no-op.
    pub fn start(&self) -> Result<()> {
        let mut state = self.lock();
        if state.writer.is_some() {
            return Ok(());
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| {
                tracing::error!("Failed to open CSV log {:?}: {}", self.path, e);
                HrmError::Persistence(format!("Failed to open {:?}: {}", self.path, e))
            })?;

        state.writer = Some(BufWriter::new(file));
        state.rows_written = 0;
        tracing::info!("CSV logger writing to {:?}", self.path);
        Ok(())
    }

    /// Flush and close the file
    pub fn stop(&self) {
        let mut state = self.lock();
        if let Some(mut writer) = state.writer.take() {
            if let Err(e) = writer.flush() {
                tracing::error!("Failed to flush CSV log {:?}: {}", self.path, e);
            }
            tracing::info!(
                "CSV logger closed {:?} after {} rows",
                self.path,
                state.rows_written
            );
        }
    }

    /// Whether the file is open
    pub fn is_active(&self) -> bool {
        self.lock().writer.is_some()
    }

    /// Rows written since the last `start`
    pub fn rows_written(&self) -> u64 {
        self.lock().rows_written
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CsvState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for CsvDataLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl MeasurementSink for CsvDataLogger {
    fn log(&self, bpm: i32) {
        let mut state = self.lock();
        let Some(writer) = state.writer.as_mut() else {
            return;
        };

        let timestamp = Local::now().format("%Y-%m-%dT%H:%M:%S%.f");
        let result = writeln!(writer, "\"{}\",\"{}\"", timestamp, bpm).and_then(|_| writer.flush());
        match result {
            Ok(()) => state.rows_written += 1,
            Err(e) => tracing::error!("Failed to write CSV row to {:?}: {}", self.path, e),
        }
    }
}

impl Drop for CsvDataLogger {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for CsvDataLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CsvDataLogger")
            .field("path", &self.path)
            .field("active", &self.is_active())
            .finish()
    }
}
