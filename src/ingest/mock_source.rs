//! Simulated helper for running without BLE hardware
//!
//! [`MockHeartRateLauncher`] stands in for the BLE helper: instead of a
//! child process it starts a generator thread that writes protocol lines
//! (`{"timestamp":"...","bpm":N}`) into an in-process pipe. The ingestor
//! reads that pipe exactly like real helper output, so everything
//! downstream of the launcher is exercised unchanged.
//!
//! # Patterns
//!
//! - [`MockBpmPattern::Constant`] - The same bpm every tick
//! - [`MockBpmPattern::Random`] - Uniform in `[min, max)` (default 60-100)
//! - [`MockBpmPattern::Sine`] - Slow oscillation around a resting rate
//! - [`MockBpmPattern::Sequence`] - A fixed list, then the generator exits
//!
//! # Enabling
//!
//! Only available with the `mock-source` feature:
//!
//! ```bash
//! cargo run --features mock-source -- --mock
//! ```

use super::launcher::{HelperLauncher, HelperProcess, LaunchedHelper};
use crate::error::{HrmError, Result};
use chrono::{SecondsFormat, Utc};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::io::{self, Write};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Default delay between generated lines
pub const DEFAULT_MOCK_INTERVAL: Duration = Duration::from_secs(1);

/// How generated bpm values evolve
#[derive(Debug, Clone, PartialEq)]
pub enum MockBpmPattern {
    /// Fixed value
    Constant(i32),
    /// Uniform values in `[min, max)`
    Random { min: i32, max: i32 },
    /// `resting + amplitude * sin(2π t / period_secs)`
    Sine {
        resting: f64,
        amplitude: f64,
        period_secs: f64,
    },
    /// Emit these values in order, then end the stream
    Sequence(Vec<i32>),
}

impl Default for MockBpmPattern {
    fn default() -> Self {
        MockBpmPattern::Random { min: 60, max: 100 }
    }
}

impl MockBpmPattern {
    /// Value for the `tick`-th line at `elapsed_secs`, or None when exhausted
    pub fn sample(&self, tick: usize, elapsed_secs: f64, seed: &mut u64) -> Option<i32> {
        match self {
            MockBpmPattern::Constant(v) => Some(*v),
            MockBpmPattern::Random { min, max } => {
                let (min, max) = (i64::from(*min), i64::from(*max));
                let span = (max - min).max(1);
                let offset = ((next_unit(seed) * span as f64) as i64).min(span - 1);
                i32::try_from(min + offset).ok()
            }
            MockBpmPattern::Sine {
                resting,
                amplitude,
                period_secs,
            } => {
                let phase = if *period_secs > 0.0 {
                    2.0 * std::f64::consts::PI * elapsed_secs / period_secs
                } else {
                    0.0
                };
                Some((resting + amplitude * phase.sin()).round() as i32)
            }
            MockBpmPattern::Sequence(values) => values.get(tick).copied(),
        }
    }
}

/// Xorshift step mapped to `[0, 1)`
fn next_unit(seed: &mut u64) -> f64 {
    let mut s = *seed;
    s ^= s << 13;
    s ^= s >> 7;
    s ^= s << 17;
    *seed = s;
    (s >> 11) as f64 / (1u64 << 53) as f64
}

/// Launcher producing simulated helper output
#[derive(Debug, Clone)]
pub struct MockHeartRateLauncher {
    pattern: MockBpmPattern,
    interval: Duration,
    limit: Option<usize>,
    with_timestamps: bool,
    seed: u64,
}

impl Default for MockHeartRateLauncher {
    fn default() -> Self {
        Self::new()
    }
}

impl MockHeartRateLauncher {
    /// Random 60-100 bpm, one line per second, forever
    pub fn new() -> Self {
        Self {
            pattern: MockBpmPattern::default(),
            interval: DEFAULT_MOCK_INTERVAL,
            limit: None,
            with_timestamps: true,
            seed: 12345,
        }
    }

    pub fn with_pattern(mut self, pattern: MockBpmPattern) -> Self {
        self.pattern = pattern;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Stop after `lines` lines and close the stream
    pub fn with_limit(mut self, lines: usize) -> Self {
        self.limit = Some(lines);
        self
    }

    /// Omit the `timestamp` field from generated lines
    pub fn without_timestamps(mut self) -> Self {
        self.with_timestamps = false;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        // Xorshift never leaves zero
        self.seed = seed.max(1);
        self
    }

    fn format_line(&self, bpm: i32) -> String {
        if self.with_timestamps {
            format!(
                "{{\"timestamp\":\"{}\",\"bpm\":{}}}",
                Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
                bpm
            )
        } else {
            format!("{{\"bpm\":{}}}", bpm)
        }
    }

    fn generate(&self, mut out: impl Write, stop: Receiver<()>) {
        let start = Instant::now();
        let mut seed = self.seed;
        let mut tick = 0usize;

        loop {
            if self.limit.is_some_and(|limit| tick >= limit) {
                break;
            }
            let Some(bpm) = self
                .pattern
                .sample(tick, start.elapsed().as_secs_f64(), &mut seed)
            else {
                break;
            };

            if let Err(e) = writeln!(out, "{}", self.format_line(bpm)).and_then(|_| out.flush()) {
                tracing::debug!("Mock helper output closed: {}", e);
                break;
            }
            tick += 1;

            match stop.recv_timeout(self.interval) {
                Err(RecvTimeoutError::Timeout) => continue,
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        tracing::debug!("Mock helper finished after {} lines", tick);
    }
}

impl HelperLauncher for MockHeartRateLauncher {
    fn launch(&self) -> Result<LaunchedHelper> {
        let description = self.describe();
        let (reader, writer) = io::pipe().map_err(|e| HrmError::launch(description.clone(), e))?;
        let (stop_tx, stop_rx) = bounded(1);

        let generator = self.clone();
        let handle = std::thread::Builder::new()
            .name("hrm-mock-helper".to_string())
            .spawn(move || generator.generate(writer, stop_rx))
            .map_err(|e| HrmError::launch(description.clone(), e))?;

        Ok(LaunchedHelper {
            process: Box::new(MockProcess {
                stop: Some(stop_tx),
                handle: Some(handle),
            }),
            output: Box::new(reader),
            description,
        })
    }

    fn describe(&self) -> String {
        format!("mock-helper ({:?}, every {:?})", self.pattern, self.interval)
    }
}

/// Generator thread posing as a helper process
struct MockProcess {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl HelperProcess for MockProcess {
    fn id(&self) -> Option<u32> {
        None
    }

    fn is_alive(&mut self) -> io::Result<bool> {
        Ok(self.handle.as_ref().is_some_and(|h| !h.is_finished()))
    }

    fn terminate(&mut self) -> io::Result<()> {
        // Dropping the sender wakes the generator out of its sleep
        self.stop.take();
        Ok(())
    }

    fn wait(&mut self) -> io::Result<Option<i32>> {
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map(|_| Some(0))
                .map_err(|_| io::Error::other("mock helper panicked")),
            None => Ok(Some(0)),
        }
    }
}
