//! Heart-rate stream monitor - Main Entry Point
//!
//! Starts the BLE helper (or the simulated source), prints every measurement
//! it reports and appends it to the CSV log until the stream ends.

use anyhow::Context;
use clap::Parser;
use hrm_stream::{
    config::{default_config_path, AppConfig},
    ingest::IngestEvent,
    CsvDataLogger, MeasurementSink, NullSink, StreamIngestor,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Stream heart-rate measurements from a BLE helper process
#[derive(Parser, Debug)]
#[command(name = "hrm-stream")]
#[command(version)]
#[command(about = "Stream heart-rate measurements from a BLE helper", long_about = None)]
struct Args {
    /// Config file (defaults to the platform config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// CSV log path, overriding the config
    #[arg(long, conflicts_with = "no_csv")]
    csv: Option<PathBuf>,

    /// Disable CSV logging
    #[arg(long)]
    no_csv: bool,

    /// Use the simulated heart-rate source instead of the helper
    #[cfg(feature = "mock-source")]
    #[arg(long)]
    mock: bool,

    /// Stop after this many seconds instead of waiting for the stream to end
    #[arg(short, long)]
    duration: Option<u64>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,hrm_stream=debug")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    tracing::info!("Starting heart-rate stream monitor");

    let config = load_config(&args)?;

    let csv = csv_logger(&args, &config);
    if let Some(csv) = &csv {
        csv.start().context("Failed to start CSV logger")?;
    }
    let sink: Arc<dyn MeasurementSink> = match &csv {
        Some(csv) => csv.clone() as Arc<dyn MeasurementSink>,
        None => Arc::new(NullSink),
    };

    let ingestor = build_ingestor(&args, &config, sink);
    ingestor
        .listeners()
        .register_fn(|bpm, timestamp| match timestamp {
            Some(ts) => println!("{ts}  {bpm} bpm"),
            None => println!("{bpm} bpm"),
        });

    let events = ingestor.subscribe_events();
    ingestor
        .start()
        .with_context(|| format!("Failed to start helper: {}", ingestor.describe_helper()))?;

    let deadline = args.duration.map(|secs| Instant::now() + Duration::from_secs(secs));
    while ingestor.is_running() && deadline.is_none_or(|d| Instant::now() < d) {
        for event in events.try_iter() {
            if let IngestEvent::StreamFault { error } = event {
                tracing::warn!("Helper stream failed: {}", error);
            }
        }
        std::thread::sleep(POLL_INTERVAL);
    }

    tracing::info!("Shutting down...");
    let stats = ingestor.stats();
    ingestor.stop();
    if let Some(csv) = &csv {
        csv.stop();
    }

    tracing::info!(
        "Read {} lines, {} measurements ({} skipped, {} listener faults)",
        stats.lines_read,
        stats.measurements,
        stats.skipped_lines,
        stats.listener_faults
    );
    Ok(())
}

fn load_config(args: &Args) -> anyhow::Result<AppConfig> {
    match &args.config {
        Some(path) => AppConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        None => {
            if let Some(path) = default_config_path() {
                tracing::debug!("Looking for config at {:?}", path);
            }
            Ok(AppConfig::load_default_location())
        }
    }
}

fn csv_logger(args: &Args, config: &AppConfig) -> Option<Arc<CsvDataLogger>> {
    if args.no_csv || (!config.persistence.enabled && args.csv.is_none()) {
        return None;
    }
    let path = args
        .csv
        .clone()
        .unwrap_or_else(|| config.persistence.csv_path.clone());
    Some(Arc::new(CsvDataLogger::with_path(path)))
}

#[cfg(feature = "mock-source")]
fn build_ingestor(args: &Args, config: &AppConfig, sink: Arc<dyn MeasurementSink>) -> StreamIngestor {
    if args.mock {
        tracing::info!("Using simulated heart-rate source");
        return StreamIngestor::new(hrm_stream::ingest::MockHeartRateLauncher::new(), sink)
            .with_settings(config.ingest.clone());
    }
    StreamIngestor::from_config(config, sink)
}

#[cfg(not(feature = "mock-source"))]
fn build_ingestor(_args: &Args, config: &AppConfig, sink: Arc<dyn MeasurementSink>) -> StreamIngestor {
    StreamIngestor::from_config(config, sink)
}
