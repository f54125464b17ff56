// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The master node: accepts worker registration, is the sole lock and
//! shared-environment-state authority, runs allocation, and tracks worker
//! liveness.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, RwLock};
use tonic::transport::Channel;
use tracing::{info, warn};

use super::allocation::{allocate, AgentNode, WorkerCapacity};
use super::directory::Directory;
use super::heartbeat::{HeartbeatTracker, WorkerStatus};
use crate::error::ErrorCode;
use crate::event::Event;
use crate::lock::local::LocalLockService;
use crate::lock::{FenceToken, Lease, LockError, LockService};
use crate::registry::Registry;
use crate::transport::grpc::client::AgoraClient;
use crate::transport::grpc::ClusterHandler;
use crate::transport::{CircuitBreakerConfig, ConnectionPool};

struct RegisteredWorker {
    address: String,
    capacity: u32,
}

/// Cluster control-plane state owned by the master. Implements
/// [`ClusterHandler`] for the RPCs workers call on it
/// (`RegisterWorker`, `Heartbeat`, `DispatchEvent`, `LockRequest`,
/// `LockRelease`, `DataGet`, `DataSet`); the RPCs the master pushes to
/// workers (`AssignAgents`, `ForwardBroadcast`, `Shutdown`) are issued via
/// [`Self::client_for`] rather than served here.
pub struct Master {
    directory: Directory,
    heartbeat: HeartbeatTracker,
    lock: LocalLockService,
    registry: Arc<Registry>,
    env_inbox: mpsc::Sender<Event>,
    env_state: RwLock<HashMap<String, Value>>,
    workers: RwLock<HashMap<String, RegisteredWorker>>,
    client_pool: Arc<ConnectionPool<Channel>>,
    breaker_config: CircuitBreakerConfig,
    /// Per (from_node_id, to_node_id) forward queues backing
    /// `StreamForwards`, the single multiplexed stream preserving FIFO
    /// across a node pair.
    forward_subscriptions: RwLock<HashMap<(String, String), mpsc::Sender<Event>>>,
}

impl Master {
    pub fn new(
        registry: Arc<Registry>,
        env_inbox: mpsc::Sender<Event>,
        heartbeat_interval: Duration,
        worker_timeout: Option<Duration>,
    ) -> Self {
        Self {
            directory: Directory::new(),
            heartbeat: HeartbeatTracker::new(heartbeat_interval, worker_timeout),
            lock: LocalLockService::new(),
            registry,
            env_inbox,
            env_state: RwLock::new(HashMap::new()),
            workers: RwLock::new(HashMap::new()),
            client_pool: Arc::new(ConnectionPool::new(crate::transport::DEFAULT_POOL_IDLE_TTL)),
            breaker_config: CircuitBreakerConfig::default(),
            forward_subscriptions: RwLock::new(HashMap::new()),
        }
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    /// Push `event` onto the forward queue from `from_node_id` to
    /// `to_node_id`, delivered in order to whichever side is reading the
    /// corresponding `StreamForwards` stream. A no-op if nothing has
    /// subscribed to that pair yet.
    pub async fn forward_to(&self, from_node_id: &str, to_node_id: &str, event: Event) -> bool {
        let subscriptions = self.forward_subscriptions.read().await;
        match subscriptions.get(&(from_node_id.to_owned(), to_node_id.to_owned())) {
            Some(sender) => sender.try_send(event).is_ok(),
            None => false,
        }
    }

    pub async fn client_for(&self, worker_id: &str) -> Option<AgoraClient> {
        let workers = self.workers.read().await;
        let worker = workers.get(worker_id)?;
        Some(AgoraClient::new(worker.address.clone(), Arc::clone(&self.client_pool), self.breaker_config.clone()))
    }

    pub async fn worker_ids(&self) -> Vec<String> {
        self.workers.read().await.keys().cloned().collect()
    }

    /// Run the allocation algorithm over `agents` and push the resulting
    /// slices to every worker via `AssignAgents`. Workers that fail to
    /// accept the push are logged and skipped; the directory still
    /// reflects the intended assignment.
    pub async fn reallocate(&self, agents: &[AgentNode]) -> HashMap<String, String> {
        let worker_capacities: Vec<WorkerCapacity> = {
            let workers = self.workers.read().await;
            workers.iter().map(|(id, w)| WorkerCapacity { worker_id: id.clone(), capacity: w.capacity, current_load: 0 }).collect()
        };

        let assignment = allocate(agents, &worker_capacities, 0, 20);
        let directory_version = self.directory.replace(assignment.clone()).await;

        let mut by_worker: HashMap<String, Vec<String>> = HashMap::new();
        for (agent_id, worker_id) in &assignment {
            by_worker.entry(worker_id.clone()).or_default().push(agent_id.clone());
        }

        for (worker_id, agent_ids) in by_worker {
            let Some(client) = self.client_for(&worker_id).await else { continue };
            if let Err(err) = client.assign_agents(&worker_id, agent_ids, directory_version).await {
                warn!(worker_id, %err, "assign_agents push failed");
            }
        }

        assignment
    }

    /// Purge a worker the heartbeat tracker has classified `Dead`: drop its
    /// directory entries and forget it. Returns the agent ids that were
    /// hosted there, which the caller (environment driver) may need to
    /// fail with `PeerGone`.
    pub async fn reap_dead_workers(&self) -> Vec<String> {
        let dead = self.heartbeat.dead_workers().await;
        let mut orphaned = Vec::new();
        for worker_id in dead {
            info!(worker_id, "worker declared dead, purging directory");
            orphaned.extend(self.directory.purge_worker(&worker_id).await);
            self.workers.write().await.remove(&worker_id);
            self.heartbeat.forget(&worker_id).await;
        }
        orphaned
    }

    pub async fn worker_status(&self, worker_id: &str) -> Option<WorkerStatus> {
        self.heartbeat.status(worker_id).await
    }
}

#[async_trait::async_trait]
impl ClusterHandler for Master {
    async fn register_worker(&self, worker_id: String, address: String, capacity: u32) -> Result<u64, ErrorCode> {
        self.workers.write().await.insert(worker_id.clone(), RegisteredWorker { address, capacity });
        self.heartbeat.record_heartbeat(&worker_id).await;
        info!(worker_id, capacity, "worker registered");
        Ok(self.directory.version())
    }

    async fn heartbeat(&self, worker_id: String, _timestamp_ms: u64, _local_agent_count: u32) -> Result<u64, ErrorCode> {
        self.heartbeat.record_heartbeat(&worker_id).await;
        Ok(self.directory.version())
    }

    async fn assign_agents(&self, _worker_id: String, _agent_ids: Vec<String>, _directory_version: u64) -> Result<(), ErrorCode> {
        Err(ErrorCode::InvalidRequest)
    }

    /// Re-applies the delivery algorithm a worker forwarding this event
    /// couldn't finish locally: env, then the master's own registry (agents
    /// hosted directly on the master), then a directory-routed hop to
    /// whichever worker actually hosts `to_id`.
    async fn dispatch_event(&self, event: Event) -> Result<(), ErrorCode> {
        if event.is_for_env() {
            return self.env_inbox.send(event).await.map_err(|_| ErrorCode::BusStopped);
        }
        if let Some(handle) = self.registry.get(&event.to_id).await {
            return handle.try_push(event).map_err(|_| ErrorCode::Internal);
        }
        let worker_id = self.directory.lookup(&event.to_id).await.ok_or(ErrorCode::PeerGone)?;
        let client = self.client_for(&worker_id).await.ok_or(ErrorCode::PeerGone)?;
        client.dispatch_event(&event).await
    }

    async fn forward_broadcast(&self, _event: Event) -> Result<u32, ErrorCode> {
        Err(ErrorCode::InvalidRequest)
    }

    async fn subscribe_forwards(&self, from_node_id: String, to_node_id: String) -> mpsc::Receiver<Event> {
        let (tx, rx) = mpsc::channel(crate::registry::DEFAULT_INBOX_CAPACITY);
        self.forward_subscriptions.write().await.insert((from_node_id, to_node_id), tx);
        rx
    }

    async fn lock_request(
        &self,
        key: String,
        requester_id: String,
        lease_ttl: Duration,
        timeout: Duration,
    ) -> Result<Lease, LockError> {
        self.lock.acquire(&key, &requester_id, lease_ttl, timeout).await
    }

    async fn lock_release(&self, key: String, requester_id: String, fence_token: FenceToken) {
        self.lock.release(&key, &requester_id, fence_token).await;
    }

    async fn data_get(
        &self,
        _source_kind: String,
        _target_kind: String,
        key: String,
        default: Option<Value>,
    ) -> Result<Option<Value>, ErrorCode> {
        let state = self.env_state.read().await;
        Ok(state.get(&key).cloned().or(default))
    }

    async fn data_set(
        &self,
        _source_kind: String,
        _target_kind: String,
        key: String,
        value: Value,
        fence_token: FenceToken,
    ) -> Result<(), ErrorCode> {
        self.lock.check_fence(&key, fence_token).await.map_err(|_| ErrorCode::InvalidRequest)?;
        self.env_state.write().await.insert(key, value);
        Ok(())
    }

    async fn shutdown(&self, _reason: String, _grace_period: Duration) -> Result<(), ErrorCode> {
        Err(ErrorCode::InvalidRequest)
    }
}

#[cfg(test)]
#[path = "master_tests.rs"]
mod tests;
