// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scenario-test harness for the runtime, exercised in-process rather
//! than against a spawned binary: the only external surface a node
//! exposes is inter-node gRPC, so standing up real `EventBus`/`Master`
//! instances behind an in-process `tonic` server gives the same coverage
//! a subprocess harness would, without the process-spawn overhead.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use agora::bus::EventBus;
use agora::event::Event;
use agora::registry::Registry;
use agora::transport::{AgoraClient, AgoraGrpc, CircuitBreakerConfig, ClusterHandler, ConnectionPool};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_stream::wrappers::TcpListenerStream;

/// A freshly wired single-node bus: registry, the bus itself (already
/// running its drain loop), and the receiver side an [`agora::env::EnvironmentDriver`]
/// would otherwise own.
pub struct BusHarness {
    pub registry: Arc<Registry>,
    pub bus: Arc<EventBus>,
    pub env_rx: mpsc::Receiver<Event>,
}

/// Build a single-node bus (no `ClusterBridge`) and spawn its drain loop.
pub fn spawn_single_bus(idle_timeout: Duration) -> BusHarness {
    let registry = Arc::new(Registry::new());
    let (env_tx, env_rx) = mpsc::channel(agora::bus::DEFAULT_QUEUE_CAPACITY);
    let bus = Arc::new(EventBus::new(Arc::clone(&registry), env_tx, None, idle_timeout));
    let bus_for_run = Arc::clone(&bus);
    tokio::spawn(async move { bus_for_run.run().await });
    BusHarness { registry, bus, env_rx }
}

/// Serve `handler` over an in-process `tonic` server bound to an
/// ephemeral loopback port, returning the address once the listener is
/// accepting connections.
pub async fn spawn_grpc_server<H: ClusterHandler + 'static>(handler: Arc<H>) -> anyhow::Result<SocketAddr> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let svc = AgoraGrpc::new(handler);
    tokio::spawn(async move {
        let _ = svc.into_router().serve_with_incoming(TcpListenerStream::new(listener)).await;
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    Ok(addr)
}

/// A client bound to a server started by [`spawn_grpc_server`], with a
/// circuit breaker permissive enough not to interfere with tests that
/// aren't specifically exercising it.
pub fn client_for(addr: SocketAddr) -> AgoraClient {
    client_for_with_breaker(addr, CircuitBreakerConfig::default())
}

pub fn client_for_with_breaker(addr: SocketAddr, breaker: CircuitBreakerConfig) -> AgoraClient {
    let pool = Arc::new(ConnectionPool::new(Duration::from_secs(60)));
    AgoraClient::new(format!("http://{addr}"), pool, breaker)
}

/// A minimal [`ClusterHandler`] standing in for a worker node: accepts
/// whatever's pushed to it and otherwise answers with defaults. Used to
/// give a real peer address for directory-routed forwards to land on.
#[derive(Default)]
pub struct StubWorkerHandler;

#[async_trait::async_trait]
impl ClusterHandler for StubWorkerHandler {
    async fn register_worker(&self, _worker_id: String, _address: String, _capacity: u32) -> Result<u64, agora::error::ErrorCode> {
        Ok(0)
    }

    async fn heartbeat(&self, _worker_id: String, _timestamp_ms: u64, _local_agent_count: u32) -> Result<u64, agora::error::ErrorCode> {
        Ok(0)
    }

    async fn assign_agents(&self, _worker_id: String, _agent_ids: Vec<String>, _directory_version: u64) -> Result<(), agora::error::ErrorCode> {
        Ok(())
    }

    async fn dispatch_event(&self, _event: Event) -> Result<(), agora::error::ErrorCode> {
        Ok(())
    }

    async fn forward_broadcast(&self, _event: Event) -> Result<u32, agora::error::ErrorCode> {
        Ok(0)
    }

    async fn subscribe_forwards(&self, _from_node_id: String, _to_node_id: String) -> mpsc::Receiver<Event> {
        let (_tx, rx) = mpsc::channel(1);
        rx
    }

    async fn lock_request(
        &self,
        key: String,
        _requester_id: String,
        _lease_ttl: Duration,
        timeout: Duration,
    ) -> Result<agora::lock::Lease, agora::lock::LockError> {
        Err(agora::lock::LockError::Timeout { key, timeout_ms: timeout.as_millis() as u64 })
    }

    async fn lock_release(&self, _key: String, _requester_id: String, _fence_token: agora::lock::FenceToken) {}

    async fn data_get(
        &self,
        _source_kind: String,
        _target_kind: String,
        _key: String,
        default: Option<serde_json::Value>,
    ) -> Result<Option<serde_json::Value>, agora::error::ErrorCode> {
        Ok(default)
    }

    async fn data_set(
        &self,
        _source_kind: String,
        _target_kind: String,
        _key: String,
        _value: serde_json::Value,
        _fence_token: agora::lock::FenceToken,
    ) -> Result<(), agora::error::ErrorCode> {
        Ok(())
    }

    async fn shutdown(&self, _reason: String, _grace_period: Duration) -> Result<(), agora::error::ErrorCode> {
        Ok(())
    }
}
