//! Core data types for hrm-stream
//!
//! # Main Types
//!
//! - [`Measurement`] - A single heart-rate reading parsed from a helper line
//! - [`IngestionState`] - Lifecycle state of a [`crate::ingest::StreamIngestor`]
//! - [`ListenerHandle`] - Token returned when registering a listener
//! - [`IngestStats`] - Counters for a running ingestion session

use std::sync::atomic::{AtomicU64, Ordering};

/// A heart-rate measurement as emitted by the helper process.
///
/// `bpm` is not range checked; zero or negative values from malformed input
/// are passed through. `timestamp` is the helper's string, untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Measurement {
    /// Beats per minute
    pub bpm: i32,
    /// Timestamp reported by the helper, if any
    pub timestamp: Option<String>,
}

impl Measurement {
    /// Create a measurement without a timestamp
    pub fn new(bpm: i32) -> Self {
        Self {
            bpm,
            timestamp: None,
        }
    }

    /// Create a measurement carrying the helper's timestamp
    pub fn with_timestamp(bpm: i32, timestamp: impl Into<String>) -> Self {
        Self {
            bpm,
            timestamp: Some(timestamp.into()),
        }
    }

    /// Timestamp as a borrowed string slice
    pub fn timestamp(&self) -> Option<&str> {
        self.timestamp.as_deref()
    }
}

impl std::fmt::Display for Measurement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.timestamp {
            Some(ts) => write!(f, "{} bpm @ {}", self.bpm, ts),
            None => write!(f, "{} bpm", self.bpm),
        }
    }
}

/// Lifecycle state of the stream ingestor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum IngestionState {
    /// No helper process, no reader thread
    #[default]
    Stopped = 0,
    /// Helper is being spawned
    Starting = 1,
    /// Helper spawned and reader thread launched
    Running = 2,
    /// Teardown in progress
    Stopping = 3,
}

impl IngestionState {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => IngestionState::Starting,
            2 => IngestionState::Running,
            3 => IngestionState::Stopping,
            _ => IngestionState::Stopped,
        }
    }
}

impl std::fmt::Display for IngestionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IngestionState::Stopped => write!(f, "Stopped"),
            IngestionState::Starting => write!(f, "Starting..."),
            IngestionState::Running => write!(f, "Running"),
            IngestionState::Stopping => write!(f, "Stopping..."),
        }
    }
}

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

/// Identity token for a registered listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerHandle(u64);

impl ListenerHandle {
    pub(crate) fn next() -> Self {
        Self(NEXT_LISTENER_ID.fetch_add(1, Ordering::SeqCst))
    }

    /// Raw numeric id
    pub fn id(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ListenerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "listener#{}", self.0)
    }
}

/// Counters for the current (or last) ingestion session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    /// Lines read from the helper output
    pub lines_read: u64,
    /// Lines that produced a measurement
    pub measurements: u64,
    /// Lines that produced nothing
    pub skipped_lines: u64,
    /// Listener callbacks that panicked
    pub listener_faults: u64,
}

impl IngestStats {
    /// Fraction of lines that produced a measurement, as a percentage
    pub fn parse_rate(&self) -> f64 {
        if self.lines_read == 0 {
            100.0
        } else {
            (self.measurements as f64 / self.lines_read as f64) * 100.0
        }
    }
}
