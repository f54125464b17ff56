// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The worker node: registers with the master, hosts a slice of agents
//! locally, forwards events addressed to non-local agents, and serves the
//! RPCs the master pushes to it (`AssignAgents`, `ForwardBroadcast`,
//! `DispatchEvent`, `Shutdown`).

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::ErrorCode;
use crate::event::Event;
use crate::lock::{FenceToken, Lease, LockError};
use crate::registry::Registry;
use crate::transport::grpc::client::AgoraClient;
use crate::transport::grpc::ClusterHandler;

pub struct Worker {
    worker_id: String,
    registry: Arc<Registry>,
    master: AgoraClient,
    shutdown: CancellationToken,
    assigned: RwLock<HashSet<String>>,
}

impl Worker {
    pub fn new(worker_id: impl Into<String>, registry: Arc<Registry>, master: AgoraClient, shutdown: CancellationToken) -> Self {
        Self { worker_id: worker_id.into(), registry, master, shutdown, assigned: RwLock::new(HashSet::new()) }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Register with the master; called once at startup.
    pub async fn register(&self, address: &str, capacity: u32) -> Result<u64, ErrorCode> {
        self.master.register_worker_rpc(&self.worker_id, address, capacity).await
    }

    /// Send one heartbeat; called on a fixed interval by a task the
    /// caller spawns.
    pub async fn send_heartbeat(&self, timestamp_ms: u64) -> Result<u64, ErrorCode> {
        let local_agent_count = self.registry.len().await as u32;
        self.master.heartbeat(&self.worker_id, timestamp_ms, local_agent_count).await
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub async fn assigned_agents(&self) -> Vec<String> {
        self.assigned.read().await.iter().cloned().collect()
    }

    /// Forward an event this worker cannot deliver locally to the master,
    /// which re-applies the full delivery algorithm.
    pub async fn forward_to_master(&self, event: &Event) -> Result<(), ErrorCode> {
        self.master.dispatch_event(event).await
    }
}

#[async_trait::async_trait]
impl ClusterHandler for Worker {
    async fn register_worker(&self, _worker_id: String, _address: String, _capacity: u32) -> Result<u64, ErrorCode> {
        Err(ErrorCode::InvalidRequest)
    }

    async fn heartbeat(&self, _worker_id: String, _timestamp_ms: u64, _local_agent_count: u32) -> Result<u64, ErrorCode> {
        Err(ErrorCode::InvalidRequest)
    }

    async fn assign_agents(&self, worker_id: String, agent_ids: Vec<String>, _directory_version: u64) -> Result<(), ErrorCode> {
        if worker_id != self.worker_id {
            return Err(ErrorCode::InvalidRequest);
        }
        let mut assigned = self.assigned.write().await;
        for agent_id in agent_ids {
            assigned.insert(agent_id);
        }
        info!(worker_id = %self.worker_id, count = assigned.len(), "agents assigned");
        Ok(())
    }

    async fn dispatch_event(&self, event: Event) -> Result<(), ErrorCode> {
        match self.registry.get(&event.to_id).await {
            Some(handle) => handle.try_push(event).map_err(|_| ErrorCode::Internal),
            None => Err(ErrorCode::PeerGone),
        }
    }

    async fn forward_broadcast(&self, event: Event) -> Result<u32, ErrorCode> {
        let handles = self.registry.all().await;
        let mut delivered = 0u32;
        for handle in handles {
            if handle.try_push(event.clone()).is_ok() {
                delivered += 1;
            }
        }
        Ok(delivered)
    }

    async fn subscribe_forwards(&self, _from_node_id: String, _to_node_id: String) -> mpsc::Receiver<Event> {
        let (_tx, rx) = mpsc::channel(1);
        rx
    }

    async fn lock_request(
        &self,
        _key: String,
        _requester_id: String,
        _lease_ttl: Duration,
        _timeout: Duration,
    ) -> Result<Lease, LockError> {
        Err(LockError::AuthorityUnreachable)
    }

    async fn lock_release(&self, _key: String, _requester_id: String, _fence_token: FenceToken) {}

    async fn data_get(
        &self,
        _source_kind: String,
        _target_kind: String,
        _key: String,
        _default: Option<Value>,
    ) -> Result<Option<Value>, ErrorCode> {
        Err(ErrorCode::InvalidRequest)
    }

    async fn data_set(
        &self,
        _source_kind: String,
        _target_kind: String,
        _key: String,
        _value: Value,
        _fence_token: FenceToken,
    ) -> Result<(), ErrorCode> {
        Err(ErrorCode::InvalidRequest)
    }

    async fn shutdown(&self, reason: String, _grace_period: Duration) -> Result<(), ErrorCode> {
        info!(worker_id = %self.worker_id, reason, "shutdown requested by master");
        self.shutdown.cancel();
        Ok(())
    }
}

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;
