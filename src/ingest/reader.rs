//! Reader thread body
//!
//! Reads helper output one line at a time, dispatches each line, and exits
//! on end of stream, on a read error, or when its session is no longer the
//! active one.

use super::{EventBus, IngestEvent};
use crate::listeners::ListenerRegistry;
use crate::parser::MeasurementParser;
use crate::persistence::MeasurementSink;
use crate::types::IngestStats;
use crossbeam_channel::Sender;
use std::io::{self, BufRead};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Running flag tagged with a session generation.
///
/// Layout: `generation << 1 | active`. A reader can only clear the flag of
/// its own session, so a reader left over from an earlier session cannot
/// flip the flag of a newer one.
#[derive(Debug, Default)]
pub(crate) struct SessionFlag(AtomicU64);

impl SessionFlag {
    /// Activate a new session and return its generation
    pub(crate) fn begin(&self) -> u64 {
        let previous = self
            .0
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| {
                Some((((v >> 1) + 1) << 1) | 1)
            })
            .unwrap_or_else(|v| v);
        (previous >> 1) + 1
    }

    /// Deactivate `session` if it is still the active one
    pub(crate) fn end(&self, session: u64) -> bool {
        self.0
            .compare_exchange(
                (session << 1) | 1,
                session << 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    /// Whether `session` is the active one
    pub(crate) fn is_active(&self, session: u64) -> bool {
        self.0.load(Ordering::SeqCst) == (session << 1) | 1
    }

    /// Whether any session is active
    pub(crate) fn is_running(&self) -> bool {
        self.0.load(Ordering::SeqCst) & 1 == 1
    }
}

#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    lines_read: AtomicU64,
    measurements: AtomicU64,
    skipped_lines: AtomicU64,
    listener_faults: AtomicU64,
}

impl StatsCounters {
    pub(crate) fn reset(&self) {
        self.lines_read.store(0, Ordering::Relaxed);
        self.measurements.store(0, Ordering::Relaxed);
        self.skipped_lines.store(0, Ordering::Relaxed);
        self.listener_faults.store(0, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> IngestStats {
        IngestStats {
            lines_read: self.lines_read.load(Ordering::Relaxed),
            measurements: self.measurements.load(Ordering::Relaxed),
            skipped_lines: self.skipped_lines.load(Ordering::Relaxed),
            listener_faults: self.listener_faults.load(Ordering::Relaxed),
        }
    }
}

/// Everything a reader needs to deliver measurements
pub(crate) struct Dispatch {
    pub(crate) sink: Arc<dyn MeasurementSink>,
    pub(crate) listeners: Arc<ListenerRegistry>,
    pub(crate) events: EventBus,
    pub(crate) stats: StatsCounters,
    pub(crate) flag: SessionFlag,
}

impl Dispatch {
    /// Parse one line and deliver the measurement, if any
    pub(crate) fn handle_line(&self, line: &str) {
        self.stats.lines_read.fetch_add(1, Ordering::Relaxed);
        tracing::trace!("helper: {}", line);

        let Some(measurement) = MeasurementParser::parse(line) else {
            self.stats.skipped_lines.fetch_add(1, Ordering::Relaxed);
            if !line.is_empty() {
                tracing::debug!("No measurement in line: {}", line);
                self.events.publish(IngestEvent::ParseSkipped {
                    line: line.to_string(),
                });
            }
            return;
        };

        self.stats.measurements.fetch_add(1, Ordering::Relaxed);
        self.sink.log(measurement.bpm);

        let faults = self
            .listeners
            .notify_all(measurement.bpm, measurement.timestamp());
        for fault in faults {
            self.stats.listener_faults.fetch_add(1, Ordering::Relaxed);
            self.events.publish(IngestEvent::ListenerFault {
                handle: fault.handle,
                message: fault.message,
            });
        }
    }
}

/// Why a reader loop returned
#[derive(Debug)]
pub(crate) enum ReaderExit {
    /// Session was stopped
    Stopped,
    /// Helper closed its output
    EndOfStream,
    /// Reading failed
    Fault(io::Error),
}

/// Clears the session flag and signals completion however the reader exits
pub(crate) struct ReaderGuard {
    dispatch: Arc<Dispatch>,
    session: u64,
    done: Option<Sender<()>>,
}

impl ReaderGuard {
    pub(crate) fn new(dispatch: Arc<Dispatch>, session: u64, done: Sender<()>) -> Self {
        Self {
            dispatch,
            session,
            done: Some(done),
        }
    }
}

impl Drop for ReaderGuard {
    fn drop(&mut self) {
        if self.dispatch.flag.end(self.session) {
            tracing::debug!("Reader for session {} cleared the running flag", self.session);
        }
        if let Some(done) = self.done.take() {
            let _ = done.send(());
        }
    }
}

/// Read lines until the stream ends, fails, or the session stops
pub(crate) fn read_lines<R: BufRead>(mut reader: R, dispatch: &Dispatch, session: u64) -> ReaderExit {
    let mut buf = Vec::with_capacity(256);

    loop {
        if !dispatch.flag.is_active(session) {
            return ReaderExit::Stopped;
        }

        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => return ReaderExit::EndOfStream,
            Ok(_) => {
                // A line read while stop() ran belongs to nobody
                if !dispatch.flag.is_active(session) {
                    return ReaderExit::Stopped;
                }
                let line = String::from_utf8_lossy(trim_line_ending(&buf));
                dispatch.handle_line(&line);
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return ReaderExit::Fault(e),
        }
    }
}

/// Reader thread entry point: read, then report how the loop ended
pub(crate) fn run_session<R: BufRead>(reader: R, guard: ReaderGuard) {
    let dispatch = guard.dispatch.clone();
    let session = guard.session;
    tracing::debug!("Reader for session {} started", session);

    match read_lines(reader, &dispatch, session) {
        ReaderExit::Stopped => {
            tracing::debug!("Reader for session {} stopped", session);
        }
        ReaderExit::EndOfStream => {
            tracing::info!("Helper output ended");
            dispatch.events.publish(IngestEvent::StreamEnded);
        }
        ReaderExit::Fault(e) => {
            tracing::error!("Error reading helper output: {}", e);
            dispatch.events.publish(IngestEvent::StreamFault {
                error: e.to_string(),
            });
        }
    }

    drop(guard);
}

fn trim_line_ending(buf: &[u8]) -> &[u8] {
    let buf = buf.strip_suffix(b"\n").unwrap_or(buf);
    buf.strip_suffix(b"\r").unwrap_or(buf)
}
