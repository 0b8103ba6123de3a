//! Stream ingestor: helper process lifecycle and reader thread ownership
//!
//! State machine:
//!
//! ```text
//! Stopped --start()--> Starting --(spawned, reader launched)--> Running
//! Running --stop()--> Stopping --(terminated, reader joined)--> Stopped
//! ```
//!
//! `start()` and `stop()` serialize on one lifecycle mutex. The running
//! flag is separate and lock-free: `stop()` and the reader thread write it,
//! `is_running()` reads it without blocking. When the helper's output ends on
//! its own the flag clears but the state stays `Running` until `stop()`
//! releases the process.

use super::launcher::{CommandLauncher, HelperLauncher, HelperProcess, LaunchedHelper};
use super::reader::{self, Dispatch, ReaderGuard, SessionFlag, StatsCounters};
use super::{EventBus, IngestEvent};
use crate::config::{AppConfig, IngestSettings};
use crate::error::{HrmError, Result};
use crate::listeners::ListenerRegistry;
use crate::persistence::MeasurementSink;
use crate::types::{IngestStats, IngestionState};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use std::io::BufReader;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

/// Name of the reader thread
const READER_THREAD_NAME: &str = "hrm-stdout-reader";

/// Result of a `start()` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// A new helper and reader were started
    Started,
    /// A session already exists; nothing was started
    AlreadyRunning,
}

/// One helper process and its reader thread
struct Session {
    id: u64,
    process: Box<dyn HelperProcess>,
    reader: Option<JoinHandle<()>>,
    reader_done: Receiver<()>,
    description: String,
}

/// Owns the helper process, the reader thread, and the delivery targets
pub struct StreamIngestor {
    launcher: Box<dyn HelperLauncher>,
    dispatch: Arc<Dispatch>,
    settings: IngestSettings,
    state: AtomicU8,
    session: Mutex<Option<Session>>,
}

impl StreamIngestor {
    /// Ingestor using the given launcher and persistence sink
    pub fn new(launcher: impl HelperLauncher + 'static, sink: Arc<dyn MeasurementSink>) -> Self {
        Self {
            launcher: Box::new(launcher),
            dispatch: Arc::new(Dispatch {
                sink,
                listeners: Arc::new(ListenerRegistry::new()),
                events: EventBus::default(),
                stats: StatsCounters::default(),
                flag: SessionFlag::default(),
            }),
            settings: IngestSettings::default(),
            state: AtomicU8::new(IngestionState::Stopped as u8),
            session: Mutex::new(None),
        }
    }

    /// Ingestor for the real helper, configured from `config`
    pub fn from_config(config: &AppConfig, sink: Arc<dyn MeasurementSink>) -> Self {
        Self::new(CommandLauncher::new(config.helper.clone()), sink)
            .with_settings(config.ingest.clone())
    }

    /// Replace the ingestion settings
    pub fn with_settings(mut self, settings: IngestSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Listener registry; safe to use from any thread at any time
    pub fn listeners(&self) -> &Arc<ListenerRegistry> {
        &self.dispatch.listeners
    }

    /// Subscribe to diagnostic events
    pub fn subscribe_events(&self) -> Receiver<IngestEvent> {
        self.dispatch.events.subscribe(self.settings.event_capacity)
    }

    /// Events dropped because a subscriber queue was full
    pub fn dropped_events(&self) -> u64 {
        self.dispatch.events.dropped()
    }

    /// Whether the reader is active. Never blocks.
    pub fn is_running(&self) -> bool {
        self.dispatch.flag.is_running()
    }

    /// Current lifecycle state. Never blocks.
    pub fn state(&self) -> IngestionState {
        IngestionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Counters for the current (or last) session
    pub fn stats(&self) -> IngestStats {
        self.dispatch.stats.snapshot()
    }

    /// Command line the launcher would run
    pub fn describe_helper(&self) -> String {
        self.launcher.describe()
    }

    /// Spawn the helper and start reading its output.
    ///
    /// Returns [`StartOutcome::AlreadyRunning`] without side effects unless
    /// the state is `Stopped`. A launch failure leaves the state `Stopped`.
    pub fn start(&self) -> Result<StartOutcome> {
        let mut slot = self.lock_session();

        if self.state() != IngestionState::Stopped {
            tracing::info!("Ingestion already running");
            self.dispatch.events.publish(IngestEvent::AlreadyRunning);
            return Ok(StartOutcome::AlreadyRunning);
        }

        self.set_state(IngestionState::Starting);

        let launched = match self.launcher.launch() {
            Ok(launched) => launched,
            Err(e) => {
                self.set_state(IngestionState::Stopped);
                tracing::error!("Failed to start helper: {}", e);
                self.dispatch.events.publish(IngestEvent::LaunchFailed {
                    error: e.to_string(),
                });
                return Err(e);
            }
        };

        match self.spawn_reader(launched) {
            Ok(session) => {
                tracing::info!("Ingestion started (command: {})", session.description);
                self.dispatch.events.publish(IngestEvent::Started {
                    command: session.description.clone(),
                });
                *slot = Some(session);
                self.set_state(IngestionState::Running);
                Ok(StartOutcome::Started)
            }
            Err(e) => {
                self.set_state(IngestionState::Stopped);
                tracing::error!("Failed to start reader thread: {}", e);
                self.dispatch.events.publish(IngestEvent::LaunchFailed {
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    fn spawn_reader(&self, launched: LaunchedHelper) -> Result<Session> {
        let LaunchedHelper {
            mut process,
            output,
            description,
        } = launched;

        self.dispatch.stats.reset();
        let id = self.dispatch.flag.begin();
        let (done_tx, done_rx) = bounded(1);
        let guard = ReaderGuard::new(self.dispatch.clone(), id, done_tx);

        let spawned = std::thread::Builder::new()
            .name(READER_THREAD_NAME.to_string())
            .spawn(move || reader::run_session(BufReader::new(output), guard));

        match spawned {
            Ok(handle) => Ok(Session {
                id,
                process,
                reader: Some(handle),
                reader_done: done_rx,
                description,
            }),
            Err(e) => {
                self.dispatch.flag.end(id);
                if let Err(kill_err) = process.terminate().and_then(|_| process.wait()) {
                    tracing::warn!("Failed to terminate helper after reader spawn error: {}", kill_err);
                }
                Err(HrmError::launch(description, e))
            }
        }
    }

    /// Tear down the current session. Idempotent and never fails; problems
    /// are logged and published as [`IngestEvent::TeardownFault`].
    pub fn stop(&self) {
        let mut slot = self.lock_session();

        let Some(mut session) = slot.take() else {
            self.set_state(IngestionState::Stopped);
            tracing::debug!("Ingestion not running, nothing to stop");
            return;
        };

        self.set_state(IngestionState::Stopping);
        self.dispatch.flag.end(session.id);

        self.terminate_helper(&mut session);
        self.join_reader(&mut session);

        self.set_state(IngestionState::Stopped);
        tracing::info!("Ingestion stopped");
        self.dispatch.events.publish(IngestEvent::Stopped);
    }

    fn terminate_helper(&self, session: &mut Session) {
        match session.process.is_alive() {
            Ok(true) => {
                if let Err(e) = session.process.terminate() {
                    self.teardown_fault(format!("Failed to terminate helper: {}", e));
                }
                match session.process.wait() {
                    Ok(code) => tracing::debug!("Helper exited with code {:?}", code),
                    Err(e) => self.teardown_fault(format!("Failed to wait for helper: {}", e)),
                }
            }
            Ok(false) => {
                if let Err(e) = session.process.wait() {
                    tracing::debug!("Failed to reap exited helper: {}", e);
                }
            }
            Err(e) => self.teardown_fault(format!("Failed to query helper status: {}", e)),
        }
    }

    fn join_reader(&self, session: &mut Session) {
        let Some(handle) = session.reader.take() else {
            return;
        };

        match session
            .reader_done
            .recv_timeout(self.settings.teardown_timeout())
        {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if handle.join().is_err() {
                    self.teardown_fault("Reader thread panicked".to_string());
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                // The helper's output is still open elsewhere (e.g. a grandchild
                // of `dotnet run`); the reader exits on its next line or EOF.
                self.teardown_fault(format!(
                    "Reader still blocked after {:?}, detaching it",
                    self.settings.teardown_timeout()
                ));
            }
        }
    }

    fn teardown_fault(&self, error: String) {
        tracing::warn!("{}", error);
        self.dispatch
            .events
            .publish(IngestEvent::TeardownFault { error });
    }

    fn set_state(&self, state: IngestionState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    fn lock_session(&self) -> MutexGuard<'_, Option<Session>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for StreamIngestor {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for StreamIngestor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamIngestor")
            .field("state", &self.state())
            .field("running", &self.is_running())
            .field("listeners", &self.dispatch.listeners.len())
            .finish()
    }
}
