//! Scripted launchers, recording sinks and listeners

use hrm_stream::ingest::{HelperLauncher, HelperProcess, LaunchedHelper};
use hrm_stream::{HrmError, MeasurementListener, MeasurementSink, Result};
use std::io::{self, Cursor, Read};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Launcher whose helper prints a fixed script and exits
pub struct ScriptedLauncher {
    output: String,
    launches: Arc<AtomicUsize>,
    fail: bool,
    hold_open: bool,
}

impl ScriptedLauncher {
    pub fn new(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            launches: Arc::new(AtomicUsize::new(0)),
            fail: false,
            hold_open: false,
        }
    }

    /// Every launch fails as if the helper binary were missing
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new("")
        }
    }

    /// After the script, block until the helper is terminated
    pub fn hold_open(mut self) -> Self {
        self.hold_open = true;
        self
    }

    /// Shared launch counter
    pub fn launches(&self) -> Arc<AtomicUsize> {
        self.launches.clone()
    }
}

impl HelperLauncher for ScriptedLauncher {
    fn launch(&self) -> Result<LaunchedHelper> {
        if self.fail {
            return Err(HrmError::launch(
                "scripted-helper",
                io::Error::new(io::ErrorKind::NotFound, "program not found"),
            ));
        }
        self.launches.fetch_add(1, Ordering::SeqCst);

        let alive = Arc::new(AtomicBool::new(true));
        let script = Cursor::new(self.output.clone().into_bytes());
        let output: Box<dyn Read + Send> = if self.hold_open {
            Box::new(script.chain(BlockUntilTerminated {
                alive: alive.clone(),
            }))
        } else {
            Box::new(script)
        };

        Ok(LaunchedHelper {
            process: Box::new(ScriptedProcess { alive }),
            output,
            description: self.describe(),
        })
    }

    fn describe(&self) -> String {
        "scripted-helper".to_string()
    }
}

struct ScriptedProcess {
    alive: Arc<AtomicBool>,
}

impl HelperProcess for ScriptedProcess {
    fn id(&self) -> Option<u32> {
        None
    }

    fn is_alive(&mut self) -> io::Result<bool> {
        Ok(self.alive.load(Ordering::SeqCst))
    }

    fn terminate(&mut self) -> io::Result<()> {
        self.alive.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn wait(&mut self) -> io::Result<Option<i32>> {
        Ok(Some(0))
    }
}

/// Reader that blocks like an idle pipe until the process is terminated
struct BlockUntilTerminated {
    alive: Arc<AtomicBool>,
}

impl Read for BlockUntilTerminated {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        while self.alive.load(Ordering::SeqCst) {
            std::thread::sleep(std::time::Duration::from_millis(2));
        }
        Ok(0)
    }
}

/// Sink that remembers every bpm it was given
#[derive(Debug, Default)]
pub struct RecordingSink {
    rows: Mutex<Vec<i32>>,
}

impl RecordingSink {
    pub fn rows(&self) -> Vec<i32> {
        self.rows.lock().unwrap().clone()
    }
}

impl MeasurementSink for RecordingSink {
    fn log(&self, bpm: i32) {
        self.rows.lock().unwrap().push(bpm);
    }
}

/// Listener that remembers every notification
#[derive(Debug, Default)]
pub struct RecordingListener {
    received: Mutex<Vec<(i32, Option<String>)>>,
}

impl RecordingListener {
    pub fn received(&self) -> Vec<(i32, Option<String>)> {
        self.received.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.received.lock().unwrap().len()
    }
}

impl MeasurementListener for RecordingListener {
    fn on_measurement(&self, bpm: i32, timestamp: Option<&str>) {
        self.received
            .lock()
            .unwrap()
            .push((bpm, timestamp.map(str::to_string)));
    }
}

/// Listener that always panics
#[derive(Debug, Default)]
pub struct PanickingListener;

impl MeasurementListener for PanickingListener {
    fn on_measurement(&self, bpm: i32, _timestamp: Option<&str>) {
        panic!("listener cannot handle {} bpm", bpm);
    }
}
