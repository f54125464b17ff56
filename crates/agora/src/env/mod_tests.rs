// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tempfile::tempdir;
use tokio::sync::mpsc;

use super::*;
use crate::config::Mode;
use crate::registry::{AgentHandle, Registry};

fn round_config(max_steps: u64) -> SimulationConfig {
    SimulationConfig { mode: Mode::Round, max_steps, bus_idle_timeout: 5.0, ..SimulationConfig::default() }
}

fn tick_config(max_steps: u64, interval: f64) -> SimulationConfig {
    SimulationConfig { mode: Mode::Tick, max_steps, interval, bus_idle_timeout: 5.0, ..SimulationConfig::default() }
}

struct Harness {
    bus: Arc<EventBus>,
    registry: Arc<Registry>,
    driver: EnvironmentDriver,
    _run_task: tokio::task::JoinHandle<()>,
}

fn build(config: SimulationConfig, start_targets: Vec<&str>, end_targets: Vec<&str>, snapshot: Option<Arc<SnapshotWriter>>) -> Harness {
    let registry = Arc::new(Registry::new());
    let (env_tx, env_rx) = mpsc::channel(32);
    let bus = Arc::new(EventBus::new(Arc::clone(&registry), env_tx, None, Duration::from_secs(5)));
    let run_task = {
        let bus = Arc::clone(&bus);
        tokio::spawn(async move { bus.run().await })
    };
    let driver = EnvironmentDriver::new(
        Arc::clone(&bus),
        config,
        env_rx,
        start_targets.into_iter().map(str::to_owned).collect(),
        end_targets.into_iter().map(str::to_owned).collect(),
        snapshot,
    )
    .with_shutdown_grace(Duration::from_millis(20));
    Harness { bus, registry, driver, _run_task: run_task }
}

async fn register(registry: &Registry, agent_id: &str) -> mpsc::Receiver<Event> {
    let (tx, rx) = mpsc::channel(16);
    registry.register(Arc::new(AgentHandle::new(agent_id, "test", tx))).await;
    rx
}

#[tokio::test]
async fn start_seeds_the_start_targets_with_a_start_event() {
    let h = build(round_config(3), vec!["a1"], vec!["a1"], None);
    let mut rx = register(&h.registry, "a1").await;
    h.driver.start().await.unwrap();
    let event = rx.recv().await.unwrap();
    assert_eq!(event.kind, EventKind::Start);
    assert_eq!(h.driver.state().await, SimulationState::Running);
}

#[tokio::test]
async fn start_is_idempotent_while_already_running() {
    let h = build(round_config(3), vec!["a1"], vec!["a1"], None);
    let _rx = register(&h.registry, "a1").await;
    h.driver.start().await.unwrap();
    h.driver.start().await.unwrap();
    assert_eq!(h.driver.state().await, SimulationState::Running);
}

#[tokio::test]
async fn pause_then_resume_round_trips_through_the_fsm() {
    let h = build(round_config(3), vec!["a1"], vec!["a1"], None);
    let _rx = register(&h.registry, "a1").await;
    h.driver.start().await.unwrap();
    h.driver.pause().await.unwrap();
    assert_eq!(h.driver.state().await, SimulationState::Paused);
    assert!(h.bus.is_paused());
    h.driver.resume().await.unwrap();
    assert_eq!(h.driver.state().await, SimulationState::Running);
    assert!(!h.bus.is_paused());
}

#[tokio::test]
async fn pause_is_idempotent() {
    let h = build(round_config(3), vec!["a1"], vec!["a1"], None);
    let _rx = register(&h.registry, "a1").await;
    h.driver.start().await.unwrap();
    h.driver.pause().await.unwrap();
    h.driver.pause().await.unwrap();
    assert_eq!(h.driver.state().await, SimulationState::Paused);
}

#[tokio::test]
async fn stop_broadcasts_external_end_and_terminates() {
    let h = build(round_config(3), vec!["a1"], vec!["a1"], None);
    let mut rx = register(&h.registry, "a1").await;
    h.driver.start().await.unwrap();
    let _ = rx.recv().await.unwrap(); // the Start from start()

    let outcome = h.driver.stop().await.unwrap();
    assert_eq!(outcome.final_state, SimulationState::Terminated);
    assert_eq!(outcome.termination, TerminationReason::ExternalStop);

    let end = rx.recv().await.unwrap();
    assert_eq!(end.kind, EventKind::End { reason: "external".into() });
}

#[tokio::test]
async fn stop_is_idempotent() {
    let h = build(round_config(3), vec!["a1"], vec!["a1"], None);
    let _rx = register(&h.registry, "a1").await;
    h.driver.start().await.unwrap();
    let first = h.driver.stop().await.unwrap();
    let second = h.driver.stop().await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn handle_data_get_returns_the_stored_value() {
    let h = build(round_config(3), vec![], vec![], None);
    let request = Event::new("a1", ENV, EventKind::DataSet {
        source_kind: "agent".into(),
        target_kind: "env".into(),
        key: "weather".into(),
        value: json!("sunny"),
    });
    h.driver.handle_data_set(&request, "weather".into(), json!("sunny")).await;

    let get_request = Event::new(
        "a2",
        ENV,
        EventKind::DataGet { source_kind: "agent".into(), target_kind: "env".into(), key: "weather".into(), default: None },
    );
    h.driver.handle_data_get(&get_request, "weather".into(), None).await;

    assert_eq!(h.driver.env_state.read().await.get("weather"), Some(&json!("sunny")));
}

#[tokio::test]
async fn handle_data_get_falls_back_to_the_caller_supplied_default_and_responds_to_the_requester() {
    let h = build(round_config(3), vec![], vec![], None);
    let mut rx = register(&h.registry, "a2").await;
    assert_eq!(h.driver.env_state.read().await.get("missing"), None);

    let request = Event::new(
        "a2",
        ENV,
        EventKind::DataGet { source_kind: "agent".into(), target_kind: "env".into(), key: "missing".into(), default: Some(json!(0)) },
    );
    h.driver.handle_data_get(&request, "missing".into(), Some(json!(0))).await;

    let response = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
    match response.kind {
        EventKind::DataGetResponse { value, ok, .. } => {
            assert!(ok);
            assert_eq!(value, Some(json!(0)));
        }
        other => panic!("expected a data_get response, got {other:?}"),
    }
}

#[tokio::test]
async fn handle_peer_death_forces_error_when_an_end_target_is_orphaned() {
    let h = build(round_config(3), vec!["a1", "a2"], vec!["a1", "a2"], None);
    h.driver.pending_acks.lock().await.insert("a2".into());
    h.driver.handle_peer_death(&["a2".to_string()]).await.unwrap();
    assert_eq!(h.driver.state().await, SimulationState::Error);
    assert!(!h.driver.pending_acks.lock().await.contains("a2"));
}

#[tokio::test]
async fn handle_peer_death_leaves_state_alone_when_no_end_target_is_orphaned() {
    let h = build(round_config(3), vec!["a1"], vec!["a1"], None);
    h.driver.handle_peer_death(&["a3".to_string()]).await.unwrap();
    assert_eq!(h.driver.state().await, SimulationState::Initialized);
}

#[tokio::test]
async fn round_mode_completes_after_max_steps_rounds_of_acks() {
    let h = build(round_config(2), vec!["a1", "a2"], vec!["a1", "a2"], None);
    let mut rx1 = register(&h.registry, "a1").await;
    let mut rx2 = register(&h.registry, "a2").await;
    let bus = Arc::clone(&h.bus);

    let acker = tokio::spawn(async move {
        for _ in 0..2 {
            let e1 = rx1.recv().await.unwrap();
            assert_eq!(e1.kind, EventKind::Start);
            let e2 = rx2.recv().await.unwrap();
            assert_eq!(e2.kind, EventKind::Start);
            bus.dispatch(Event::new("a1", ENV, EventKind::End { reason: "round_done".into() })).await.unwrap();
            bus.dispatch(Event::new("a2", ENV, EventKind::End { reason: "round_done".into() })).await.unwrap();
        }
    });

    let outcome = tokio::time::timeout(Duration::from_secs(5), h.driver.run()).await.unwrap().unwrap();
    acker.await.unwrap();

    assert_eq!(outcome.final_state, SimulationState::Completed);
    assert_eq!(outcome.steps_completed, 2);
    assert_eq!(outcome.termination, TerminationReason::Completed);
}

#[tokio::test]
async fn tick_mode_completes_after_max_steps_ticks_and_writes_snapshots() {
    let dir = tempdir().unwrap();
    let writer = Arc::new(SnapshotWriter::new(dir.path()).await.unwrap());
    let h = build(tick_config(2, 0.01), vec![], vec![], Some(Arc::clone(&writer)));

    let outcome = tokio::time::timeout(Duration::from_secs(5), h.driver.run()).await.unwrap().unwrap();

    assert_eq!(outcome.final_state, SimulationState::Completed);
    assert_eq!(outcome.steps_completed, 2);
    assert!(dir.path().join("env_states/step_1.json").is_file());
    assert!(dir.path().join("env_states/step_2.json").is_file());
}

#[tokio::test]
async fn round_mode_force_closes_a_round_on_idle_timeout() {
    let mut config = round_config(1);
    config.bus_idle_timeout = 0.05;
    let h = build(config, vec!["a1"], vec!["a1"], None);
    let mut rx = register(&h.registry, "a1").await;

    // a1 receives Start but never acks; the idle watchdog should force the
    // round closed and complete the run at max_steps=1 regardless.
    let outcome = tokio::time::timeout(Duration::from_secs(5), h.driver.run()).await.unwrap().unwrap();
    let _ = rx.recv().await.unwrap();

    assert_eq!(outcome.final_state, SimulationState::Completed);
    assert_eq!(outcome.steps_completed, 1);
}
