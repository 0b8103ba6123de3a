//! Streaming ingestion of helper process output
//!
//! This module owns the helper process and the thread that reads its output.
//! Every line is parsed with [`crate::parser::MeasurementParser`]; each
//! measurement goes to the persistence sink and then to every registered
//! listener, in the order the lines were read.
//!
//! # Architecture
//!
//! - [`StreamIngestor`] - Start/stop lifecycle, owns the current session
//! - [`HelperLauncher`] - Seam that produces a helper process and its merged
//!   stdout/stderr stream ([`CommandLauncher`] for the real helper)
//! - [`IngestEvent`] - Diagnostic side channel for faults that never reach
//!   a caller (listener panics, stream errors, teardown problems)
//!
//! # Threading
//!
//! One reader thread per session, blocking on the helper's output. Listener
//! callbacks and the sink run on that thread. `stop()` clears the session
//! flag, terminates the helper (which closes its output and wakes the
//! reader) and joins the reader with a timeout.
//!
//! # Example
//!
//! ```ignore
//! use hrm_stream::config::AppConfig;
//! use hrm_stream::ingest::StreamIngestor;
//! use hrm_stream::persistence::CsvDataLogger;
//! use std::sync::Arc;
//!
//! let config = AppConfig::default();
//! let csv = Arc::new(CsvDataLogger::new());
//! csv.start()?;
//!
//! let ingestor = StreamIngestor::from_config(&config, csv.clone());
//! ingestor.listeners().register_fn(|bpm, ts| println!("{bpm} bpm at {ts:?}"));
//! ingestor.start()?;
//!
//! // ...
//! ingestor.stop();
//! csv.stop();
//! ```

pub mod ingestor;
pub mod launcher;
#[cfg(feature = "mock-source")]
pub mod mock_source;
mod reader;

pub use ingestor::{StartOutcome, StreamIngestor};
pub use launcher::{CommandLauncher, HelperCommand, HelperLauncher, HelperProcess, LaunchedHelper};
#[cfg(feature = "mock-source")]
pub use mock_source::{MockBpmPattern, MockHeartRateLauncher};

use crate::types::ListenerHandle;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

/// Diagnostic event published by the ingestor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestEvent {
    /// Helper spawned and reader running
    Started { command: String },
    /// `start()` called while a session exists
    AlreadyRunning,
    /// Helper could not be launched
    LaunchFailed { error: String },
    /// A line produced no measurement
    ParseSkipped { line: String },
    /// A listener panicked
    ListenerFault { handle: ListenerHandle, message: String },
    /// Helper output reached end of stream
    StreamEnded,
    /// Reading helper output failed
    StreamFault { error: String },
    /// Terminating the helper or joining the reader failed
    TeardownFault { error: String },
    /// Session torn down
    Stopped,
}

/// Fan-out of [`IngestEvent`]s to bounded subscriber queues.
///
/// Publishing never blocks: a full queue drops the event, a disconnected
/// subscriber is removed.
#[derive(Debug, Default)]
pub(crate) struct EventBus {
    subscribers: Mutex<Vec<Sender<IngestEvent>>>,
    dropped: AtomicU64,
}

impl EventBus {
    pub(crate) fn subscribe(&self, capacity: usize) -> Receiver<IngestEvent> {
        let (tx, rx) = bounded(capacity.max(1));
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    pub(crate) fn publish(&self, event: IngestEvent) {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        subscribers.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
    }

    pub(crate) fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
