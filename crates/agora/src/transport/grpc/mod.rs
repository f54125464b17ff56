// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! gRPC transport implementing the `agora.v1.Agora` service: the wire
//! protocol between master and worker nodes.

pub mod client;
pub mod convert;
mod service;

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tonic::Status;

use crate::error::ErrorCode;
use crate::event::Event;
use crate::lock::{FenceToken, Lease, LockError};

/// Generated protobuf types for the `agora.v1` package.
pub mod proto {
    tonic::include_proto!("agora.v1");
}

/// What the gRPC service layer needs from whatever owns cluster state
/// (master or worker) to answer an RPC. Kept independent of concrete
/// `cluster` types so `transport` has no dependency on `cluster`, matching
/// the direction of [`crate::lock::distributed::LockTransport`].
#[async_trait::async_trait]
pub trait ClusterHandler: Send + Sync {
    async fn register_worker(
        &self,
        worker_id: String,
        address: String,
        capacity: u32,
    ) -> Result<u64, ErrorCode>;

    async fn heartbeat(
        &self,
        worker_id: String,
        timestamp_ms: u64,
        local_agent_count: u32,
    ) -> Result<u64, ErrorCode>;

    async fn assign_agents(
        &self,
        worker_id: String,
        agent_ids: Vec<String>,
        directory_version: u64,
    ) -> Result<(), ErrorCode>;

    async fn dispatch_event(&self, event: Event) -> Result<(), ErrorCode>;

    async fn forward_broadcast(&self, event: Event) -> Result<u32, ErrorCode>;

    /// Register interest in forwarded events flowing from `from_node_id` to
    /// `to_node_id` and return the receiving half of the per-pair FIFO
    /// channel feeding [`proto::agora_server::Agora::StreamForwardsStream`].
    async fn subscribe_forwards(
        &self,
        from_node_id: String,
        to_node_id: String,
    ) -> tokio::sync::mpsc::Receiver<Event>;

    async fn lock_request(
        &self,
        key: String,
        requester_id: String,
        lease_ttl: Duration,
        timeout: Duration,
    ) -> Result<Lease, LockError>;

    async fn lock_release(&self, key: String, requester_id: String, fence_token: FenceToken);

    async fn data_get(
        &self,
        source_kind: String,
        target_kind: String,
        key: String,
        default: Option<Value>,
    ) -> Result<Option<Value>, ErrorCode>;

    async fn data_set(
        &self,
        source_kind: String,
        target_kind: String,
        key: String,
        value: Value,
        fence_token: FenceToken,
    ) -> Result<(), ErrorCode>;

    async fn shutdown(&self, reason: String, grace_period: Duration) -> Result<(), ErrorCode>;
}

/// gRPC implementation of the `agora.v1.Agora` service, generic over
/// whatever owns cluster state.
pub struct AgoraGrpc<H: ClusterHandler + 'static> {
    handler: Arc<H>,
}

impl<H: ClusterHandler + 'static> AgoraGrpc<H> {
    pub fn new(handler: Arc<H>) -> Self {
        Self { handler }
    }

    /// Build a [`tonic`] router serving this implementation.
    pub fn into_router(self) -> tonic::transport::server::Router {
        tonic::transport::Server::builder().add_service(proto::agora_server::AgoraServer::new(self))
    }
}

type GrpcStream<T> = Pin<Box<dyn tokio_stream::Stream<Item = Result<T, Status>> + Send + 'static>>;
