//! Lifecycle of a running twin: startup, shutdown latency and the
//! telemetry to alerts pipeline

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tanktwin::alerts::{AlertProcessor, LevelState, MemorySink};
use tanktwin::prelude::*;
use tanktwin::telemetry::ChannelPublisher;
use tanktwin::twin::{TaskKind, TaskState};

fn config() -> TwinConfig {
    let mut config = TwinConfig::default();
    config.store.endpoint = "memory://orchestrator".to_string();
    config.reference.seed = Some(7);
    config
}

fn store(config: &TwinConfig) -> Arc<MemoryTagStore> {
    Arc::new(MemoryTagStore::with_points(
        config.store.endpoint.clone(),
        config.op_timeout(),
        config.all_tags(),
    ))
}

#[test]
fn test_start_runs_every_task() {
    let config = config();
    let store = store(&config);
    let twin = Orchestrator::new(config).unwrap().start(store.clone()).unwrap();

    assert!(store.is_connected());
    assert_eq!(twin.plant_count(), 3);

    let states = twin.task_states();
    // two tasks per plant plus the randomizer
    assert_eq!(states.len(), 7);
    assert!(states.iter().all(|(_, state)| *state == TaskState::Running));
    assert!(states.iter().any(|(kind, _)| *kind == TaskKind::Randomizer));

    thread::sleep(Duration::from_millis(700));
    let snapshot = twin.snapshot(0).unwrap();
    assert!(tanktwin::plant::error_integrals(&snapshot.state)[0] > 0.0);
    assert!(twin.snapshot(3).is_none());

    let report = twin.shutdown();
    assert!(!report.any_panicked());
    assert!(report.disconnected);
    assert!(!store.is_connected());
}

#[test]
fn test_shutdown_latency_bounds() {
    let config = config();
    let store = store(&config);
    let twin = Orchestrator::new(config).unwrap().start(store).unwrap();
    thread::sleep(Duration::from_millis(500));

    let started = Instant::now();
    let report = twin.shutdown();
    let elapsed = started.elapsed();

    assert_eq!(report.tasks.len(), 7);
    let loops = report.max_latency(|k| matches!(k, TaskKind::Simulation(_) | TaskKind::Control(_)));
    assert!(loops <= Duration::from_millis(300), "scan loops took {loops:?}");
    let randomizer = report.max_latency(|k| *k == TaskKind::Randomizer);
    assert!(randomizer <= Duration::from_millis(5200), "randomizer took {randomizer:?}");
    assert!(elapsed < Duration::from_secs(6));
}

#[test]
fn test_dropping_the_twin_stops_it() {
    let config = config();
    let store = store(&config);
    let twin = Orchestrator::new(config).unwrap().start(store.clone()).unwrap();
    drop(twin);
    assert!(!store.is_connected());
}

#[test]
fn test_connect_failure_is_fatal() {
    let config = config();
    let store = Arc::new(MemoryTagStore::unreachable("opc.tcp://nowhere:4840"));

    let err = Orchestrator::new(config).unwrap().start(store.clone()).unwrap_err();
    assert!(matches!(
        err,
        TwinError::Store(StoreError::ConnectionRefused { .. })
    ));
    assert!(!store.is_connected());
}

#[test]
fn test_invalid_config_never_starts() {
    let mut config = config();
    config.gain.pop();
    assert!(matches!(Orchestrator::new(config), Err(TwinError::Config(_))));
}

#[test]
fn test_tag_initialisation_failure_is_not_fatal() {
    let config = config();
    // No points registered, so every zero write fails
    let store = Arc::new(MemoryTagStore::new(
        config.store.endpoint.clone(),
        config.op_timeout(),
    ));

    let twin = Orchestrator::new(config).unwrap().start(store).unwrap();
    thread::sleep(Duration::from_millis(300));
    assert!(twin
        .task_states()
        .iter()
        .all(|(_, state)| *state == TaskState::Running));
    let report = twin.shutdown();
    assert!(!report.any_panicked());
}

#[test]
fn test_fixed_references_without_randomizer() {
    let mut config = config();
    config.reference.randomize = false;
    let expected = config.plants[1].reference();
    let store = store(&config);

    let twin = Orchestrator::new(config).unwrap().start(store).unwrap();
    assert_eq!(twin.task_states().len(), 6);
    thread::sleep(Duration::from_millis(500));
    assert_eq!(twin.snapshot(1).unwrap().reference, expected);
    twin.shutdown();
}

#[test]
fn test_telemetry_feeds_alerts() {
    let mut config = config();
    config.reference.randomize = false;
    config.telemetry.enabled = true;
    config.telemetry.period_s = 0.05;
    let band = config.telemetry.alarm;
    let store = store(&config);

    let (publisher, rx) = ChannelPublisher::channel();
    let twin = Orchestrator::new(config)
        .unwrap()
        .with_publisher(Arc::new(publisher))
        .start(store)
        .unwrap();
    assert!(twin
        .task_states()
        .iter()
        .any(|(kind, _)| *kind == TaskKind::Telemetry));

    thread::sleep(Duration::from_millis(400));
    twin.shutdown();

    // The bridge is gone, so the channel drains and closes
    let source = CancellationSource::new();
    let mut processor = AlertProcessor::new(band, MemorySink::default(), "iot/alerts");
    processor.consume(&rx, &source.token());

    let (processed, failed) = processor.counts();
    assert!(processed >= 3);
    assert_eq!(failed, 0);

    let records = processor.sink().records();
    assert!(records.iter().any(|r| r.plant == "plant3"));
    // Tanks start empty, well below the alarm band
    assert_eq!(records[0].state, LevelState::Low);
}
