//! # hrm-stream: Heart-Rate Measurement Streaming
//!
//! Ingests heart-rate measurements from an external BLE helper process. The
//! helper prints one JSON object per line (`{"timestamp": "...", "bpm": 72}`)
//! on its standard output; every line is parsed, logged to CSV and fanned out
//! to registered listeners.
//!
//! ## Architecture
//!
//! - **Parser**: Tolerant line decoding with a resilient fallback scan for
//!   malformed lines ([`parser::MeasurementParser`])
//! - **Listeners**: Thread-safe observer registry with per-listener fault
//!   isolation ([`listeners::ListenerRegistry`])
//! - **Ingest**: Helper process lifecycle and the reader thread
//!   ([`ingest::StreamIngestor`])
//! - **Persistence**: Append-only CSV log of received bpm values
//!   ([`persistence::CsvDataLogger`])
//!
//! ## Configuration
//!
//! Settings live in `config.toml` under the platform config directory:
//!
//! - **Linux**: `~/.config/hrm-stream/`
//! - **macOS**: `~/Library/Application Support/hrm-stream/`
//! - **Windows**: `%APPDATA%\hrm-stream\`
//!
//! ## Example
//!
//! ```ignore
//! use hrm_stream::{AppConfig, CsvDataLogger, StreamIngestor};
//! use std::sync::Arc;
//!
//! fn main() -> hrm_stream::Result<()> {
//!     let config = AppConfig::load_default_location();
//!
//!     let csv = Arc::new(CsvDataLogger::with_path(&config.persistence.csv_path));
//!     csv.start()?;
//!
//!     let ingestor = StreamIngestor::from_config(&config, csv.clone());
//!     ingestor
//!         .listeners()
//!         .register_fn(|bpm, timestamp| println!("{bpm} bpm ({timestamp:?})"));
//!
//!     ingestor.start()?;
//!     while ingestor.is_running() {
//!         std::thread::sleep(std::time::Duration::from_millis(250));
//!     }
//!     ingestor.stop();
//!     csv.stop();
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod ingest;
pub mod listeners;
pub mod parser;
pub mod persistence;
pub mod types;

// Re-export commonly used types
pub use config::AppConfig;
pub use error::{HrmError, Result};
pub use ingest::{IngestEvent, StartOutcome, StreamIngestor};
pub use listeners::{ListenerRegistry, MeasurementListener};
pub use parser::MeasurementParser;
pub use persistence::{CsvDataLogger, MeasurementSink, NullSink};
pub use types::{IngestStats, IngestionState, ListenerHandle, Measurement};
