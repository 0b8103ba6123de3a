//! Integration tests for the ingestion lifecycle
//!
//! These tests drive a StreamIngestor over scripted helper output:
//! - Delivery to the sink and every listener, in line order
//! - Lines that produce no measurement
//! - Listener fault isolation
//! - start/stop idempotence and restart

mod common;

use common::builders::{HelperOutputBuilder, IngestorBuilder};
use common::mock_helpers::{PanickingListener, RecordingListener, ScriptedLauncher};
use common::wait_until;
use hrm_stream::{IngestEvent, IngestionState, StartOutcome};
use std::sync::atomic::Ordering;
use std::sync::Arc;

#[test]
fn test_two_lines_reach_sink_and_every_listener() {
    let output = HelperOutputBuilder::new()
        .measurement("2024-01-01T10:00:00Z", 72)
        .measurement("2024-01-01T10:00:01Z", 73)
        .build();
    let (ingestor, sink) = IngestorBuilder::new(output).build();

    let a = Arc::new(RecordingListener::default());
    let b = Arc::new(RecordingListener::default());
    ingestor.listeners().register(a.clone());
    ingestor.listeners().register(b.clone());

    assert_eq!(ingestor.start().unwrap(), StartOutcome::Started);
    assert!(wait_until(|| !ingestor.is_running()));
    ingestor.stop();

    let expected = vec![
        (72, Some("2024-01-01T10:00:00Z".to_string())),
        (73, Some("2024-01-01T10:00:01Z".to_string())),
    ];
    assert_eq!(a.received(), expected);
    assert_eq!(b.received(), expected);
    assert_eq!(sink.rows(), vec![72, 73]);
}

#[test]
fn test_structured_and_recovered_lines_reach_all_targets() {
    let output = HelperOutputBuilder::new()
        .raw("{\"bpm\": 72, \"timestamp\": \"2024-01-01T00:00:00\"}")
        .raw("garbage{\"bpm\":65}trailing")
        .build();
    let (ingestor, sink) = IngestorBuilder::new(output).build();

    let a = Arc::new(RecordingListener::default());
    let b = Arc::new(RecordingListener::default());
    ingestor.listeners().register(a.clone());
    ingestor.listeners().register(b.clone());

    ingestor.start().unwrap();
    assert!(wait_until(|| !ingestor.is_running()));
    ingestor.stop();

    let expected = vec![(72, Some("2024-01-01T00:00:00".to_string())), (65, None)];
    assert_eq!(a.received(), expected);
    assert_eq!(b.received(), expected);
    assert_eq!(sink.rows(), vec![72, 65]);
    assert_eq!(ingestor.stats().measurements, 2);
}

#[test]
fn test_null_bpm_delivers_nothing() {
    let output = HelperOutputBuilder::new()
        .raw("{\"timestamp\": \"2024-01-01T10:00:00Z\", \"bpm\": null}")
        .build();
    let (ingestor, sink) = IngestorBuilder::new(output).build();
    let listener = Arc::new(RecordingListener::default());
    ingestor.listeners().register(listener.clone());

    ingestor.start().unwrap();
    assert!(wait_until(|| !ingestor.is_running()));
    ingestor.stop();

    assert_eq!(listener.count(), 0);
    assert!(sink.rows().is_empty());
    let stats = ingestor.stats();
    assert_eq!(stats.lines_read, 1);
    assert_eq!(stats.skipped_lines, 1);
}

#[test]
fn test_noise_between_measurements_is_skipped() {
    let output = HelperOutputBuilder::new()
        .raw("Scanning for heart-rate monitors...")
        .bpm(64)
        .raw("")
        .raw("{\"timestamp\": \"t\", \"bpm\": 66")
        .raw("Connected")
        .bpm(68)
        .build();
    let (ingestor, sink) = IngestorBuilder::new(output).build();
    let events = ingestor.subscribe_events();

    ingestor.start().unwrap();
    assert!(wait_until(|| !ingestor.is_running()));
    ingestor.stop();

    // The truncated line is recovered by the resilient scan
    assert_eq!(sink.rows(), vec![64, 66, 68]);

    let skipped: Vec<String> = events
        .try_iter()
        .filter_map(|e| match e {
            IngestEvent::ParseSkipped { line } => Some(line),
            _ => None,
        })
        .collect();
    assert_eq!(skipped, vec!["Scanning for heart-rate monitors...", "Connected"]);
}

#[test]
fn test_windows_line_endings() {
    let (ingestor, sink) = IngestorBuilder::new("{\"bpm\": 70}\r\n{\"bpm\": 71}\r\n").build();
    let listener = Arc::new(RecordingListener::default());
    ingestor.listeners().register(listener.clone());

    ingestor.start().unwrap();
    assert!(wait_until(|| !ingestor.is_running()));
    ingestor.stop();

    assert_eq!(sink.rows(), vec![70, 71]);
    assert_eq!(listener.received(), vec![(70, None), (71, None)]);
}

#[test]
fn test_panicking_listener_is_isolated() {
    let output = HelperOutputBuilder::new().bpm(80).bpm(81).build();
    let (ingestor, sink) = IngestorBuilder::new(output).build();
    let events = ingestor.subscribe_events();

    let first = Arc::new(RecordingListener::default());
    ingestor.listeners().register(first.clone());
    let bad = ingestor.listeners().register(Arc::new(PanickingListener));
    let last = Arc::new(RecordingListener::default());
    ingestor.listeners().register(last.clone());

    ingestor.start().unwrap();
    assert!(wait_until(|| !ingestor.is_running()));
    ingestor.stop();

    assert_eq!(first.count(), 2);
    assert_eq!(last.count(), 2);
    assert_eq!(sink.rows(), vec![80, 81]);
    assert_eq!(ingestor.stats().listener_faults, 2);

    let faults: Vec<_> = events
        .try_iter()
        .filter_map(|e| match e {
            IngestEvent::ListenerFault { handle, message } => Some((handle, message)),
            _ => None,
        })
        .collect();
    assert_eq!(faults.len(), 2);
    assert!(faults.iter().all(|(h, _)| *h == bad));
    assert!(faults[0].1.contains("cannot handle 80 bpm"));
}

#[test]
fn test_unregistered_listener_stops_receiving() {
    let launcher = ScriptedLauncher::new(HelperOutputBuilder::new().bpm(90).build()).hold_open();
    let (ingestor, _sink) = IngestorBuilder::new("").launcher(launcher).build();

    let kept = Arc::new(RecordingListener::default());
    let removed = Arc::new(RecordingListener::default());
    ingestor.listeners().register(kept.clone());
    let handle = ingestor.listeners().register(removed.clone());

    ingestor.start().unwrap();
    assert!(wait_until(|| kept.count() == 1));
    assert!(ingestor.listeners().unregister(handle));
    assert!(!ingestor.listeners().unregister(handle));
    ingestor.stop();

    assert_eq!(removed.count(), 1);
    assert_eq!(ingestor.listeners().len(), 1);
}

#[test]
fn test_double_start_launches_once() {
    let launcher = ScriptedLauncher::new("").hold_open();
    let launches = launcher.launches();
    let (ingestor, _sink) = IngestorBuilder::new("").launcher(launcher).build();
    let events = ingestor.subscribe_events();

    assert_eq!(ingestor.start().unwrap(), StartOutcome::Started);
    assert_eq!(ingestor.start().unwrap(), StartOutcome::AlreadyRunning);
    assert_eq!(launches.load(Ordering::SeqCst), 1);
    assert!(ingestor.is_running());

    ingestor.stop();
    assert!(!ingestor.is_running());
    assert_eq!(ingestor.state(), IngestionState::Stopped);

    let received: Vec<_> = events.try_iter().collect();
    assert!(matches!(received[0], IngestEvent::Started { .. }));
    assert_eq!(received[1], IngestEvent::AlreadyRunning);
    assert_eq!(received.last(), Some(&IngestEvent::Stopped));
}

#[test]
fn test_stop_on_idle_ingestor_is_noop() {
    let (ingestor, sink) = IngestorBuilder::new("").build();
    ingestor.stop();
    ingestor.stop();
    assert_eq!(ingestor.state(), IngestionState::Stopped);
    assert!(sink.rows().is_empty());
}

#[test]
fn test_stop_while_blocked_returns_promptly() {
    let launcher = ScriptedLauncher::new("").hold_open();
    let (ingestor, _sink) = IngestorBuilder::new("").launcher(launcher).build();

    ingestor.start().unwrap();
    assert!(ingestor.is_running());

    let started = std::time::Instant::now();
    ingestor.stop();
    assert!(started.elapsed() < common::test_timeout());
    assert!(!ingestor.is_running());
}

#[test]
fn test_restart_after_stop() {
    let launcher = ScriptedLauncher::new(HelperOutputBuilder::new().bpm(75).build());
    let launches = launcher.launches();
    let (ingestor, sink) = IngestorBuilder::new("").launcher(launcher).build();

    for _ in 0..3 {
        assert_eq!(ingestor.start().unwrap(), StartOutcome::Started);
        assert!(wait_until(|| !ingestor.is_running()));
        ingestor.stop();
    }

    assert_eq!(launches.load(Ordering::SeqCst), 3);
    assert_eq!(sink.rows(), vec![75, 75, 75]);
    assert_eq!(ingestor.stats().measurements, 1);
}

#[test]
fn test_launch_failure_is_reported() {
    let (ingestor, _sink) = IngestorBuilder::new("")
        .launcher(ScriptedLauncher::failing())
        .build();
    let events = ingestor.subscribe_events();

    let err = ingestor.start().unwrap_err();
    assert!(err.is_launch());
    assert!(!ingestor.is_running());
    assert_eq!(ingestor.state(), IngestionState::Stopped);
    assert!(matches!(
        events.try_recv().unwrap(),
        IngestEvent::LaunchFailed { .. }
    ));
}

#[test]
fn test_listener_registered_from_other_thread_while_running() {
    let launcher = ScriptedLauncher::new("").hold_open();
    let (ingestor, _sink) = IngestorBuilder::new("").launcher(launcher).build();
    ingestor.start().unwrap();

    let registry = ingestor.listeners().clone();
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let registry = registry.clone();
            std::thread::spawn(move || {
                let h = registry.register_fn(|_, _| {});
                registry.unregister(h)
            })
        })
        .collect();
    for h in handles {
        assert!(h.join().unwrap());
    }

    ingestor.stop();
    assert!(registry.is_empty());
}
