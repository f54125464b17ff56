// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Top-level node orchestration: wires [`Config`] into a registry, an
//! event bus, the role-specific cluster control plane, and (where this
//! node owns one) the environment driver, then drives it to completion.
//! `run(config)` is the one-shot convenience the binary calls;
//! `prepare(config)` returns the assembled [`PreparedNode`] for a caller
//! (or the integration-test crate) that wants to interact with it before
//! driving it to completion.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::bus::EventBus;
use crate::cluster::{Master, Worker};
use crate::config::{Config, Role, SimulationConfig};
use crate::env::{EnvironmentDriver, RunOutcome, SnapshotWriter};
use crate::registry::Registry;
use crate::transport::grpc::client::AgoraClient;
use crate::transport::grpc::AgoraGrpc;
use crate::transport::{CircuitBreakerConfig, ConnectionPool};

/// Exit code `run()` maps straight through in `main`. `3` and `4` mirror
/// the Node CLI surface's cluster-join-failure and fatal-runtime-error
/// codes; `0` is success.
pub struct NodeOutcome {
    pub exit_code: i32,
    /// Only present on a node that owns an environment driver (`Single`
    /// or `Master`); a `Worker` only ever hosts agents and forwards.
    pub simulation: Option<RunOutcome>,
}

impl NodeOutcome {
    fn ok(simulation: Option<RunOutcome>) -> Self {
        Self { exit_code: 0, simulation }
    }

    fn cluster_join_failure() -> Self {
        Self { exit_code: 3, simulation: None }
    }
}

/// Initialize tracing from `--log-level` / `RUST_LOG`, defaulting to
/// `"info"`. Uses `try_init` so repeated calls (e.g. from tests) are
/// harmless.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Everything assembled for one node, before it's driven to completion.
/// Exposed for callers (tests, the Control API's process) that need to
/// reach the driver or cluster handle directly instead of going through
/// `run()`'s single `await`.
pub enum PreparedNode {
    Single { driver: Arc<EnvironmentDriver>, shutdown: CancellationToken },
    Master { master: Arc<Master>, driver: Arc<EnvironmentDriver>, shutdown: CancellationToken },
    Worker { worker: Arc<Worker>, bus: Arc<EventBus>, shutdown: CancellationToken },
}

impl PreparedNode {
    pub fn shutdown_token(&self) -> CancellationToken {
        match self {
            Self::Single { shutdown, .. } => shutdown.clone(),
            Self::Master { shutdown, .. } => shutdown.clone(),
            Self::Worker { shutdown, .. } => shutdown.clone(),
        }
    }

    /// Drive this node to completion: for `Single`/`Master`, run the
    /// environment driver until it terminates or `shutdown` fires; for
    /// `Worker`, serve the control plane until `shutdown` fires (a worker
    /// has no simulation of its own to complete).
    pub async fn run(self) -> anyhow::Result<NodeOutcome> {
        match self {
            PreparedNode::Single { driver, shutdown } => {
                let outcome = run_driver_until_shutdown(driver, shutdown).await?;
                Ok(NodeOutcome::ok(Some(outcome)))
            }
            PreparedNode::Master { driver, shutdown, .. } => {
                let outcome = run_driver_until_shutdown(driver, shutdown).await?;
                Ok(NodeOutcome::ok(Some(outcome)))
            }
            PreparedNode::Worker { shutdown, .. } => {
                shutdown.cancelled().await;
                info!("worker shutting down");
                Ok(NodeOutcome::ok(None))
            }
        }
    }
}

async fn run_driver_until_shutdown(driver: Arc<EnvironmentDriver>, shutdown: CancellationToken) -> anyhow::Result<RunOutcome> {
    tokio::select! {
        result = driver.run() => Ok(result?),
        _ = shutdown.cancelled() => Ok(driver.stop().await?),
    }
}

/// Run one node to completion: the full production codepath a CLI
/// invocation takes.
pub async fn run(config: Config) -> anyhow::Result<NodeOutcome> {
    match prepare(config).await? {
        Ok(node) => node.run().await,
        Err(outcome) => Ok(outcome),
    }
}

/// Assemble a node's substrate per its configured role. Returns
/// `Ok(Err(outcome))` (not an `Err`) for an orderly non-zero exit such as
/// a worker failing to join its master — that's an expected outcome of
/// node bring-up, not an unexpected failure in this function itself.
pub async fn prepare(config: Config) -> anyhow::Result<Result<PreparedNode, NodeOutcome>> {
    let node_id = config.resolve_node_id();
    let simulation_config = config.load_simulation_config().context("loading simulation config")?;
    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    info!(node_id, role = ?config.role, "starting node");

    match config.role {
        Role::Single => {
            let registry = Arc::new(Registry::new());
            let (env_tx, env_rx) = mpsc::channel(crate::bus::DEFAULT_QUEUE_CAPACITY);
            let bus = Arc::new(EventBus::new(
                Arc::clone(&registry),
                env_tx,
                None,
                Duration::from_secs_f64(simulation_config.bus_idle_timeout),
            ));
            spawn_bus(Arc::clone(&bus));

            let snapshot = build_snapshot_writer(&simulation_config).await?;
            let (start_targets, end_targets) = scenario_targets(&simulation_config);
            let driver = Arc::new(EnvironmentDriver::new(bus, simulation_config, env_rx, start_targets, end_targets, snapshot));
            Ok(Ok(PreparedNode::Single { driver, shutdown }))
        }
        Role::Master => {
            let registry = Arc::new(Registry::new());
            let (env_tx, env_rx) = mpsc::channel(crate::bus::DEFAULT_QUEUE_CAPACITY);
            let heartbeat_interval = Duration::from_secs(config.heartbeat_interval);
            let master = Arc::new(Master::new(
                Arc::clone(&registry),
                env_tx.clone(),
                heartbeat_interval,
                Some(Duration::from_secs(config.effective_worker_timeout())),
            ));

            let listen_port = config.listen_port.context("--role master requires --listen-port")?;
            spawn_grpc_server(Arc::clone(&master), &config.listen_address, listen_port, shutdown.clone())?;
            spawn_reaper(Arc::clone(&master), heartbeat_interval, shutdown.clone());

            let bridge = Arc::clone(&master) as Arc<dyn crate::bus::ClusterBridge>;
            let bus = Arc::new(EventBus::new(
                Arc::clone(&registry),
                env_tx,
                Some(bridge),
                Duration::from_secs_f64(simulation_config.bus_idle_timeout),
            ));
            spawn_bus(Arc::clone(&bus));

            let snapshot = build_snapshot_writer(&simulation_config).await?;
            let (start_targets, end_targets) = scenario_targets(&simulation_config);
            let driver = Arc::new(EnvironmentDriver::new(bus, simulation_config, env_rx, start_targets, end_targets, snapshot));
            Ok(Ok(PreparedNode::Master { master, driver, shutdown }))
        }
        Role::Worker => {
            let master_address = config.master_address.clone().context("--role worker requires --master-address")?;
            let master_port = config.master_port.context("--role worker requires --master-port")?;
            let pool = Arc::new(ConnectionPool::new(crate::transport::DEFAULT_POOL_IDLE_TTL));
            let master_client = AgoraClient::new(format!("http://{master_address}:{master_port}"), pool, CircuitBreakerConfig::default());

            let registry = Arc::new(Registry::new());
            let worker = Arc::new(Worker::new(node_id.clone(), Arc::clone(&registry), master_client, shutdown.clone()));

            let listen_port = config.listen_port.unwrap_or(0);
            let advertise = format!("http://{}:{listen_port}", config.listen_address);
            match worker.register(&advertise, registry_capacity()).await {
                Ok(directory_version) => info!(directory_version, "registered with master"),
                Err(err) => {
                    error!(%err, "failed to register with master");
                    return Ok(Err(NodeOutcome::cluster_join_failure()));
                }
            }

            spawn_grpc_server(Arc::clone(&worker), &config.listen_address, listen_port, shutdown.clone())?;
            spawn_heartbeat_sender(Arc::clone(&worker), heartbeat_interval_from(&config));

            // A worker never owns an `EnvironmentDriver`, so its bus's
            // `env_inbox` side doesn't feed a driver — it feeds the
            // forwarder below, which relays every ENV-addressed event
            // on to the master the way a local agent's non-ENV event
            // already does through the `ClusterBridge`.
            let (env_tx, mut env_rx) = mpsc::channel(crate::bus::DEFAULT_QUEUE_CAPACITY);
            let bridge = Arc::clone(&worker) as Arc<dyn crate::bus::ClusterBridge>;
            let bus = Arc::new(EventBus::new(
                Arc::clone(&registry),
                env_tx,
                Some(bridge),
                Duration::from_secs_f64(simulation_config.bus_idle_timeout),
            ));
            spawn_bus(Arc::clone(&bus));

            let worker_for_forward = Arc::clone(&worker);
            tokio::spawn(async move {
                while let Some(event) = env_rx.recv().await {
                    if let Err(err) = worker_for_forward.forward_to_master(&event).await {
                        warn!(%err, "failed to forward env-addressed event to master");
                    }
                }
            });

            Ok(Ok(PreparedNode::Worker { worker, bus, shutdown }))
        }
    }
}

/// Placeholder agent capacity a worker advertises on registration until
/// the scenario-authoring collaborator can report real slot counts.
fn registry_capacity() -> u32 {
    100
}

fn heartbeat_interval_from(config: &Config) -> Duration {
    Duration::from_secs(config.heartbeat_interval)
}

fn spawn_bus(bus: Arc<EventBus>) {
    tokio::spawn(async move { bus.run().await });
}

fn spawn_reaper(master: Arc<Master>, interval: Duration, shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = ticker.tick() => {
                    let orphaned = master.reap_dead_workers().await;
                    if !orphaned.is_empty() {
                        warn!(?orphaned, "purged agents hosted on a dead worker");
                    }
                }
            }
        }
    });
}

fn spawn_heartbeat_sender(worker: Arc<Worker>, interval: Duration) {
    tokio::spawn(async move {
        let shutdown = worker.shutdown_token();
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = ticker.tick() => {
                    if let Err(err) = worker.send_heartbeat(crate::clock::now_ms()).await {
                        warn!(%err, "heartbeat to master failed");
                    }
                }
            }
        }
    });
}

fn spawn_grpc_server<H: crate::transport::grpc::ClusterHandler + 'static>(
    handler: Arc<H>,
    listen_address: &str,
    listen_port: u16,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{listen_address}:{listen_port}").parse().context("parsing listen address")?;
    let router = AgoraGrpc::new(handler).into_router();
    tokio::spawn(async move {
        if let Err(err) = router.serve_with_shutdown(addr, shutdown.cancelled_owned()).await {
            error!(%err, "grpc server exited with an error");
        }
    });
    Ok(())
}

async fn build_snapshot_writer(simulation_config: &SimulationConfig) -> anyhow::Result<Option<Arc<SnapshotWriter>>> {
    if !simulation_config.export_event_data && !simulation_config.export_training_data {
        return Ok(None);
    }
    let root = std::path::PathBuf::from("trails").join(crate::clock::new_id());
    let writer = SnapshotWriter::new(&root).await.context("initializing the trail snapshot writer")?;
    writer.write_config(simulation_config).await.context("writing trail config.json")?;
    info!(root = %root.display(), "writing simulation trail");
    Ok(Some(Arc::new(writer)))
}

/// `start_targets`/`end_targets` are properties of the scenario being run,
/// not of this runtime, so they aren't in `SimulationConfig`'s typed
/// fields; they ride in the schema-free `extra` bag the scenario-authoring
/// collaborator (out of scope here) populates.
fn scenario_targets(simulation_config: &SimulationConfig) -> (Vec<String>, Vec<String>) {
    let read = |key: &str| -> Vec<String> {
        simulation_config
            .extra
            .get(key)
            .and_then(|value: &Value| serde_json::from_value(value.clone()).ok())
            .unwrap_or_default()
    };
    (read("start_targets"), read("end_targets"))
}

fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).ok();
        let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt()).ok();

        tokio::select! {
            _ = async { if let Some(s) = sigterm.as_mut() { s.recv().await } else { std::future::pending().await } } => {
                info!("received SIGTERM");
            }
            _ = async { if let Some(s) = sigint.as_mut() { s.recv().await } else { std::future::pending().await } } => {
                info!("received SIGINT");
            }
        }
        shutdown.cancel();
    });
}

#[cfg(test)]
#[path = "run_tests.rs"]
mod tests;
