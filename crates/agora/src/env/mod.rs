// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The environment driver: owns the simulation's lifecycle, the
//! authoritative environment key/value store, and the round/tick main
//! loop.
//!
//! `start`/`stop`/`pause`/`resume` drive the [`state_machine::StateMachine`]
//! and forward pause/resume to the bus so wall-clock accounting excludes
//! paused time. `run` is the top-level orchestration loop: it consumes
//! events addressed to `ENV` (`DataGet`/`DataSet`/round-done acks), and in
//! round mode waits for every `end_targets` agent to ack before advancing
//! the step counter, or in tick mode broadcasts `Tick` on a fixed
//! interval. Both modes force-close on `bus_idle_timeout` of inactivity so
//! a stuck round or dead ticker never wedges the run forever.

pub mod snapshot;
pub mod state_machine;

pub use snapshot::{SnapshotError, SnapshotWriter, StepSnapshot};
pub use state_machine::{FsmError, SimulationState, StateMachine};

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{info, warn};

use crate::bus::{BusError, EventBus};
use crate::clock::Clock;
use crate::config::{Mode, SimulationConfig};
use crate::error::ErrorCode;
use crate::event::{Event, EventKind, ALL, ENV};
use crate::lock::local::LocalLockService;
use crate::lock::LockService;

/// Why a run ended, reported alongside the final [`SimulationState`] in
/// [`RunOutcome`].
#[derive(Debug, Clone, PartialEq)]
pub enum TerminationReason {
    /// `max_steps` (round mode) or the tick count (tick mode) was reached.
    Completed,
    /// `stop()` was called, or the stop token was otherwise cancelled.
    ExternalStop,
    /// A fatal condition forced a transition to `ERROR`.
    Error(String),
}

/// Summary returned by [`EnvironmentDriver::run`].
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub final_state: SimulationState,
    pub steps_completed: u64,
    pub termination: TerminationReason,
}

#[derive(Debug, Error)]
pub enum EnvError {
    #[error(transparent)]
    Fsm(#[from] FsmError),
    #[error(transparent)]
    Bus(#[from] BusError),
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    #[error("environment inbox closed unexpectedly")]
    InboxClosed,
}

impl EnvError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Fsm(_) => ErrorCode::InvalidTransition,
            Self::Bus(err) => err.code(),
            Self::Snapshot(_) => ErrorCode::Internal,
            Self::InboxClosed => ErrorCode::Internal,
        }
    }
}

/// Owns the simulation lifecycle: the FSM, the environment's key/value
/// store, the round/tick main loop, and (if configured) the snapshot
/// writer. One instance per simulation run.
pub struct EnvironmentDriver {
    bus: Arc<EventBus>,
    config: SimulationConfig,
    fsm: Mutex<StateMachine>,
    clock: Clock,
    lock: LocalLockService,
    env_state: RwLock<std::collections::HashMap<String, Value>>,
    env_inbox: Mutex<Option<mpsc::Receiver<Event>>>,
    start_targets: Vec<String>,
    end_targets: Vec<String>,
    pending_acks: Mutex<HashSet<String>>,
    step: AtomicU64,
    shutdown_grace: Duration,
    finished: AtomicBool,
    snapshot: Option<Arc<SnapshotWriter>>,
    snapshot_tx: Mutex<Option<mpsc::Sender<StepSnapshot>>>,
    snapshot_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl EnvironmentDriver {
    /// Default grace period `stop()` waits after broadcasting
    /// `End(reason="external")` before declaring the run terminated.
    pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

    pub fn new(
        bus: Arc<EventBus>,
        config: SimulationConfig,
        env_inbox: mpsc::Receiver<Event>,
        start_targets: Vec<String>,
        end_targets: Vec<String>,
        snapshot: Option<Arc<SnapshotWriter>>,
    ) -> Self {
        let (snapshot_tx, snapshot_task) = match &snapshot {
            Some(writer) => {
                let (tx, mut rx) = mpsc::channel::<StepSnapshot>(64);
                let writer = Arc::clone(writer);
                let task = tokio::spawn(async move {
                    while let Some(snap) = rx.recv().await {
                        if let Err(err) = writer.write_step(&snap).await {
                            warn!(%err, "snapshot write failed");
                        }
                    }
                });
                (Some(tx), Some(task))
            }
            None => (None, None),
        };

        Self {
            bus,
            config,
            fsm: Mutex::new(StateMachine::new()),
            clock: Clock::new(),
            lock: LocalLockService::new(),
            env_state: RwLock::new(std::collections::HashMap::new()),
            env_inbox: Mutex::new(Some(env_inbox)),
            start_targets,
            end_targets,
            pending_acks: Mutex::new(HashSet::new()),
            step: AtomicU64::new(0),
            shutdown_grace: Self::DEFAULT_SHUTDOWN_GRACE,
            finished: AtomicBool::new(false),
            snapshot,
            snapshot_tx: Mutex::new(snapshot_tx),
            snapshot_task: Mutex::new(snapshot_task),
        }
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub async fn state(&self) -> SimulationState {
        self.fsm.lock().await.state()
    }

    pub fn step(&self) -> u64 {
        self.step.load(Ordering::Acquire)
    }

    /// Begin the run: transitions `INITIALIZED -> RUNNING` and seeds the
    /// first round's `Start` broadcast. Idempotent while already running.
    pub async fn start(&self) -> Result<(), EnvError> {
        {
            let mut fsm = self.fsm.lock().await;
            if fsm.state() == SimulationState::Running {
                return Ok(());
            }
            fsm.transition(SimulationState::Running)?;
        }
        if self.config.mode == Mode::Round {
            self.seed_start_targets().await?;
        }
        Ok(())
    }

    /// Stop the run: broadcasts `End(reason="external")`, waits a grace
    /// period, then transitions to `TERMINATED`. Idempotent — a second
    /// call against an already-finished run returns the same outcome
    /// without re-broadcasting.
    pub async fn stop(&self) -> Result<RunOutcome, EnvError> {
        let already_done = {
            let state = self.fsm.lock().await.state();
            matches!(state, SimulationState::Terminated | SimulationState::Completed | SimulationState::Error)
        };
        if !already_done {
            if let Err(err) = self.bus.on_broadcast(Event::new(ENV, ALL, EventKind::End { reason: "external".into() })).await
            {
                warn!(%err, "external stop broadcast failed");
            }
            tokio::time::sleep(self.shutdown_grace).await;
            let mut fsm = self.fsm.lock().await;
            if fsm.state() != SimulationState::Error {
                fsm.transition(SimulationState::Terminated)?;
            }
        }
        self.bus.stop_token().cancel();
        self.finish(TerminationReason::ExternalStop).await
    }

    /// Pause: forwards to the bus and the clock so the idle timeout and
    /// tick interval exclude paused time. Idempotent.
    pub async fn pause(&self) -> Result<(), EnvError> {
        let mut fsm = self.fsm.lock().await;
        if fsm.state() == SimulationState::Paused {
            return Ok(());
        }
        fsm.transition(SimulationState::Paused)?;
        drop(fsm);
        self.bus.pause();
        self.clock.pause();
        Ok(())
    }

    pub async fn resume(&self) -> Result<(), EnvError> {
        let mut fsm = self.fsm.lock().await;
        if fsm.state() == SimulationState::Running {
            return Ok(());
        }
        fsm.transition(SimulationState::Running)?;
        drop(fsm);
        self.clock.resume();
        self.bus.resume();
        self.bus.reset_idle_clock().await;
        Ok(())
    }

    /// Called when a worker is declared dead: its orphaned agents can no
    /// longer ack, and if one was an `end_targets` agent the round can
    /// never close, so the run is forced into `ERROR`.
    pub async fn handle_peer_death(&self, orphaned_agent_ids: &[String]) -> Result<(), EnvError> {
        {
            let mut pending = self.pending_acks.lock().await;
            for id in orphaned_agent_ids {
                pending.remove(id);
            }
        }
        for id in orphaned_agent_ids {
            self.bus.fail_peer(id).await;
        }
        if orphaned_agent_ids.iter().any(|id| self.end_targets.contains(id)) {
            let mut fsm = self.fsm.lock().await;
            if fsm.state() != SimulationState::Error {
                fsm.transition(SimulationState::Error)?;
            }
            warn!(?orphaned_agent_ids, "peer death orphaned an end-target agent, run can no longer complete");
        }
        Ok(())
    }

    /// Top-level orchestration: runs `start()` then the mode-specific main
    /// loop until the run reaches a terminal state.
    pub async fn run(&self) -> Result<RunOutcome, EnvError> {
        self.start().await?;
        match self.config.mode {
            Mode::Round => self.run_round_mode().await,
            Mode::Tick => self.run_tick_mode().await,
        }
    }

    async fn run_round_mode(&self) -> Result<RunOutcome, EnvError> {
        let idle_timeout = Duration::from_secs_f64(self.config.bus_idle_timeout.max(0.001));
        let mut env_inbox = match self.env_inbox.lock().await.take() {
            Some(rx) => rx,
            None => {
                warn!("run() called while another run() is already active");
                return self.finish(TerminationReason::Error("run() called twice".into())).await;
            }
        };
        loop {
            if let Some(outcome) = self.check_terminal().await? {
                return Ok(outcome);
            }
            tokio::select! {
                _ = self.bus.stop_token().cancelled() => {
                    return self.finish(TerminationReason::ExternalStop).await;
                }
                maybe_event = env_inbox.recv() => {
                    match maybe_event {
                        Some(event) => {
                            self.handle_incoming(event).await;
                            if self.pending_acks.lock().await.is_empty() {
                                if let Some(outcome) = self.advance_round().await? {
                                    return Ok(outcome);
                                }
                            }
                        }
                        None => return Err(EnvError::InboxClosed),
                    }
                }
                _ = tokio::time::sleep(idle_timeout) => {
                    if self.state().await != SimulationState::Paused {
                        let stragglers: Vec<String> = self.pending_acks.lock().await.iter().cloned().collect();
                        if !stragglers.is_empty() {
                            warn!(step = self.step(), ?stragglers, "bus idle timeout elapsed, force-closing round");
                        }
                        if let Some(outcome) = self.advance_round().await? {
                            return Ok(outcome);
                        }
                    }
                }
            }
        }
    }

    async fn run_tick_mode(&self) -> Result<RunOutcome, EnvError> {
        let idle_timeout = Duration::from_secs_f64(self.config.bus_idle_timeout.max(0.001));
        let interval_dur = Duration::from_secs_f64(self.config.interval.max(0.001));
        let mut env_inbox = match self.env_inbox.lock().await.take() {
            Some(rx) => rx,
            None => {
                warn!("run() called while another run() is already active");
                return self.finish(TerminationReason::Error("run() called twice".into())).await;
            }
        };
        let mut ticker = tokio::time::interval(interval_dur);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await; // first tick fires immediately; discard it

        loop {
            if let Some(outcome) = self.check_terminal().await? {
                return Ok(outcome);
            }
            tokio::select! {
                _ = self.bus.stop_token().cancelled() => {
                    return self.finish(TerminationReason::ExternalStop).await;
                }
                maybe_event = env_inbox.recv() => {
                    match maybe_event {
                        Some(event) => self.handle_incoming(event).await,
                        None => return Err(EnvError::InboxClosed),
                    }
                }
                _ = ticker.tick() => {
                    if self.state().await != SimulationState::Paused {
                        if let Some(outcome) = self.advance_tick().await? {
                            return Ok(outcome);
                        }
                    }
                }
                _ = tokio::time::sleep(idle_timeout) => {
                    if self.state().await != SimulationState::Paused {
                        warn!(step = self.step(), "bus idle during tick mode, treating as a livelock");
                        let mut fsm = self.fsm.lock().await;
                        fsm.transition(SimulationState::Error)?;
                        drop(fsm);
                        return self.finish(TerminationReason::Error("tick mode idle timeout".into())).await;
                    }
                }
            }
        }
    }

    async fn check_terminal(&self) -> Result<Option<RunOutcome>, EnvError> {
        let state = self.state().await;
        match state {
            SimulationState::Completed => Ok(Some(self.finish(TerminationReason::Completed).await?)),
            SimulationState::Terminated => Ok(Some(self.finish(TerminationReason::ExternalStop).await?)),
            SimulationState::Error => Ok(Some(self.finish(TerminationReason::Error("run entered ERROR".into())).await?)),
            _ => Ok(None),
        }
    }

    /// Close out the current round: clear any remaining `pending_acks`
    /// (stragglers force-dropped by the idle-timeout path), advance the
    /// step counter, persist the step snapshot, and either seed the next
    /// round or complete the run at `max_steps`.
    async fn advance_round(&self) -> Result<Option<RunOutcome>, EnvError> {
        self.pending_acks.lock().await.clear();
        let step = self.clock.advance();
        self.step.store(step, Ordering::Release);
        self.persist_step().await?;

        if step >= self.config.max_steps {
            let mut fsm = self.fsm.lock().await;
            fsm.transition(SimulationState::Completed)?;
            drop(fsm);
            return Ok(Some(self.finish(TerminationReason::Completed).await?));
        }
        self.seed_start_targets().await?;
        Ok(None)
    }

    async fn advance_tick(&self) -> Result<Option<RunOutcome>, EnvError> {
        let step = self.clock.advance();
        self.step.store(step, Ordering::Release);
        if let Err(err) = self.bus.on_broadcast(Event::new(ENV, ALL, EventKind::Tick { step })).await {
            warn!(%err, "tick broadcast failed");
        }
        self.persist_step().await?;

        if step >= self.config.max_steps {
            let mut fsm = self.fsm.lock().await;
            fsm.transition(SimulationState::Completed)?;
            drop(fsm);
            return Ok(Some(self.finish(TerminationReason::Completed).await?));
        }
        Ok(None)
    }

    async fn seed_start_targets(&self) -> Result<(), EnvError> {
        *self.pending_acks.lock().await = self.end_targets.iter().cloned().collect();
        for target in &self.start_targets {
            self.bus.dispatch(Event::new(ENV, target.clone(), EventKind::Start)).await?;
        }
        Ok(())
    }

    async fn handle_incoming(&self, event: Event) {
        match &event.kind {
            EventKind::DataGet { key, default, .. } => {
                self.handle_data_get(&event, key.clone(), default.clone()).await;
            }
            EventKind::DataSet { key, value, .. } => {
                self.handle_data_set(&event, key.clone(), value.clone()).await;
            }
            EventKind::End { reason } if reason == "round_done" => {
                self.handle_round_done(&event).await;
            }
            other => {
                warn!(from = %event.from_id, kind = other.label(), "ENV received an event with no handler");
            }
        }
    }

    async fn handle_round_done(&self, event: &Event) {
        if self.config.mode != Mode::Round {
            // Tick mode counts ticks, not round acks; a stray round-done
            // ack from an agent written against round-mode semantics is
            // simply ignored.
            return;
        }
        self.pending_acks.lock().await.remove(&event.from_id);
    }

    async fn handle_data_get(&self, request: &Event, key: String, default: Option<Value>) {
        let value = self.env_state.read().await.get(&key).cloned().or(default);
        let response =
            Event::response_to(request, EventKind::DataGetResponse { request_id: request.event_id.clone(), key, value, ok: true, err: None });
        if let Err(err) = self.bus.dispatch(response).await {
            warn!(%err, "failed to dispatch data_get response");
        }
    }

    /// `DataSet` is serialized through the lock service: acquire, mutate,
    /// release. `DataGet` stays lock-free, so a concurrent reader may
    /// observe state at most one in-flight write stale.
    async fn handle_data_set(&self, request: &Event, key: String, value: Value) {
        const LEASE_TTL: Duration = Duration::from_secs(5);
        const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

        let (ok, err) = match self.lock.acquire(&key, &request.from_id, LEASE_TTL, ACQUIRE_TIMEOUT).await {
            Ok(lease) => {
                self.env_state.write().await.insert(key.clone(), value);
                self.lock.release(&key, &request.from_id, lease.fence_token).await;
                (true, None)
            }
            Err(err) => (false, Some(err.to_string())),
        };
        let response = Event::response_to(request, EventKind::DataSetResponse { request_id: request.event_id.clone(), key, ok, err });
        if let Err(err) = self.bus.dispatch(response).await {
            warn!(%err, "failed to dispatch data_set response");
        }
    }

    async fn persist_step(&self) -> Result<(), EnvError> {
        let Some(tx) = self.snapshot_tx.lock().await.clone() else { return Ok(()) };
        let snapshot = StepSnapshot {
            step: self.step(),
            env_state: serde_json::to_value(&*self.env_state.read().await).unwrap_or(Value::Null),
            agent_states: Vec::new(),
            events: Vec::new(),
            decisions: Vec::new(),
            metrics: Vec::new(),
        };
        if tx.send(snapshot).await.is_err() {
            warn!("snapshot writer task is gone, dropping step snapshot");
        }
        Ok(())
    }

    /// Idempotent: the first caller flushes the snapshot writer and exports
    /// the event flow graph; later callers (e.g. both `run()`'s own
    /// terminal check and an externally-issued `stop()` racing it) just get
    /// the same [`RunOutcome`] back.
    async fn finish(&self, termination: TerminationReason) -> Result<RunOutcome, EnvError> {
        let final_state = self.state().await;
        if self.finished.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_ok() {
            if let Some(tx) = self.snapshot_tx.lock().await.take() {
                drop(tx);
            }
            if let Some(task) = self.snapshot_task.lock().await.take() {
                let _ = task.await;
            }
            if let Some(writer) = &self.snapshot {
                match self.bus.flow_recorder().export_json().await {
                    Ok(flows) => {
                        if let Err(err) = writer.write_event_flows(&flows).await {
                            warn!(%err, "failed to write event flow export");
                        }
                    }
                    Err(err) => warn!(%err, "failed to serialize event flow export"),
                }
            }
            info!(final_state = ?final_state, steps = self.step(), ?termination, "environment driver finished");
        }
        Ok(RunOutcome { final_state, steps_completed: self.step(), termination })
    }
}

/// Lets the metrics scheduler read shared environment state directly.
/// Agent-typed field reads would fan out over the registry via `DataGet`
/// requests the same way a peer agent does; out of scope until a concrete
/// agent-state schema exists, so this always returns an empty batch.
#[async_trait::async_trait]
impl crate::metrics::MetricsBackend for EnvironmentDriver {
    async fn read_env(&self, key: &str) -> Option<Value> {
        self.env_state.read().await.get(key).cloned()
    }

    async fn read_agent_field(&self, _agent_type: Option<&str>, _field: &str) -> Vec<Value> {
        Vec::new()
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
