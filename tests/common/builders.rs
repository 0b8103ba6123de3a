//! Test data builders for helper output and ingestors

use super::mock_helpers::{RecordingSink, ScriptedLauncher};
use hrm_stream::config::IngestSettings;
use hrm_stream::StreamIngestor;
use std::sync::Arc;

/// Builder for helper output text, one protocol line at a time
#[derive(Debug, Default, Clone)]
pub struct HelperOutputBuilder {
    lines: Vec<String>,
}

impl HelperOutputBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Well-formed measurement line
    pub fn measurement(mut self, timestamp: &str, bpm: i32) -> Self {
        self.lines
            .push(format!("{{\"timestamp\": \"{}\", \"bpm\": {}}}", timestamp, bpm));
        self
    }

    /// Measurement line without a timestamp
    pub fn bpm(mut self, bpm: i32) -> Self {
        self.lines.push(format!("{{\"bpm\": {}}}", bpm));
        self
    }

    /// Any other line (diagnostics, garbage, truncated JSON)
    pub fn raw(mut self, line: &str) -> Self {
        self.lines.push(line.to_string());
        self
    }

    pub fn build(self) -> String {
        self.lines.iter().map(|l| format!("{}\n", l)).collect()
    }
}

/// Builder for an ingestor over scripted helper output
pub struct IngestorBuilder {
    launcher: ScriptedLauncher,
    sink: Arc<RecordingSink>,
    settings: IngestSettings,
}

impl IngestorBuilder {
    pub fn new(output: impl Into<String>) -> Self {
        Self {
            launcher: ScriptedLauncher::new(output),
            sink: Arc::new(RecordingSink::default()),
            settings: IngestSettings::default(),
        }
    }

    pub fn launcher(mut self, launcher: ScriptedLauncher) -> Self {
        self.launcher = launcher;
        self
    }

    pub fn teardown_timeout_ms(mut self, ms: u64) -> Self {
        self.settings.teardown_timeout_ms = ms;
        self
    }

    /// Ingestor plus the sink it writes to
    pub fn build(self) -> (StreamIngestor, Arc<RecordingSink>) {
        let ingestor = StreamIngestor::new(self.launcher, self.sink.clone())
            .with_settings(self.settings);
        (ingestor, self.sink)
    }
}
