// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Outbound gRPC client: a pooled, circuit-breaker-guarded wrapper around
//! the generated `agora.v1.Agora` client, used by workers to reach the
//! master and by the master to reach workers.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tonic::transport::Channel;

use super::convert::event_to_envelope;
use super::proto;
use crate::error::ErrorCode;
use crate::event::Event;
use crate::lock::distributed::LockTransport;
use crate::lock::{FenceToken, Lease, LockError};
use crate::transport::circuit::{CircuitBreaker, CircuitBreakerConfig};
use crate::transport::pool::ConnectionPool;

/// A client bound to one peer endpoint, pooling its channel and guarding
/// calls with a circuit breaker so a dead peer fails fast instead of
/// stalling every caller on a fresh dial.
pub struct AgoraClient {
    endpoint: String,
    pool: Arc<ConnectionPool<Channel>>,
    breaker: CircuitBreaker,
}

impl AgoraClient {
    pub fn new(endpoint: impl Into<String>, pool: Arc<ConnectionPool<Channel>>, config: CircuitBreakerConfig) -> Self {
        Self { endpoint: endpoint.into(), pool, breaker: CircuitBreaker::new(config) }
    }

    async fn client(&self) -> Result<proto::agora_client::AgoraClient<Channel>, ErrorCode> {
        self.breaker.before_call()?;
        let endpoint = self.endpoint.clone();
        match self
            .pool
            .get_or_connect(&self.endpoint, move |endpoint| async move {
                Channel::from_shared(endpoint)
                    .map_err(|_| ErrorCode::InvalidRequest)?
                    .connect()
                    .await
                    .map_err(|_| ErrorCode::PeerGone)
            })
            .await
        {
            Ok(channel) => {
                self.breaker.record_result(true);
                Ok(proto::agora_client::AgoraClient::new(channel))
            }
            Err(code) => {
                self.breaker.record_result(false);
                self.pool.invalidate(&endpoint).await;
                Err(code)
            }
        }
    }

    pub async fn register_worker_rpc(&self, worker_id: &str, address: &str, capacity: u32) -> Result<u64, ErrorCode> {
        let mut client = self.client().await?;
        let result = client
            .register_worker(proto::RegisterWorkerRequest {
                worker_id: worker_id.to_owned(),
                address: address.to_owned(),
                capacity,
            })
            .await;
        self.breaker.record_result(result.is_ok());
        let resp = result.map_err(|_| ErrorCode::PeerGone)?.into_inner();
        if resp.accepted { Ok(resp.directory_version) } else { Err(ErrorCode::InvalidRequest) }
    }

    pub async fn dispatch_event(&self, event: &Event) -> Result<(), ErrorCode> {
        let mut client = self.client().await?;
        let envelope = event_to_envelope(event).map_err(|_| ErrorCode::InvalidRequest)?;
        let result = client.dispatch_event(proto::DispatchEventRequest { event: Some(envelope) }).await;
        self.breaker.record_result(result.is_ok());
        let resp = result.map_err(|_| ErrorCode::PeerGone)?.into_inner();
        if resp.accepted { Ok(()) } else { Err(ErrorCode::InvalidRequest) }
    }

    pub async fn forward_broadcast(&self, event: &Event) -> Result<u32, ErrorCode> {
        let mut client = self.client().await?;
        let envelope = event_to_envelope(event).map_err(|_| ErrorCode::InvalidRequest)?;
        let result = client.forward_broadcast(proto::ForwardBroadcastRequest { event: Some(envelope) }).await;
        self.breaker.record_result(result.is_ok());
        Ok(result.map_err(|_| ErrorCode::PeerGone)?.into_inner().delivered_count)
    }

    pub async fn assign_agents(&self, worker_id: &str, agent_ids: Vec<String>, directory_version: u64) -> Result<(), ErrorCode> {
        let mut client = self.client().await?;
        let result = client
            .assign_agents(proto::AssignAgentsRequest {
                worker_id: worker_id.to_owned(),
                agent_ids,
                directory_version,
            })
            .await;
        self.breaker.record_result(result.is_ok());
        let resp = result.map_err(|_| ErrorCode::PeerGone)?.into_inner();
        if resp.accepted { Ok(()) } else { Err(ErrorCode::InvalidRequest) }
    }

    pub async fn shutdown(&self, reason: &str, grace_period: Duration) -> Result<(), ErrorCode> {
        let mut client = self.client().await?;
        let result = client
            .shutdown(proto::ShutdownRequest { reason: reason.to_owned(), grace_period_ms: grace_period.as_millis() as u64 })
            .await;
        self.breaker.record_result(result.is_ok());
        result.map_err(|_| ErrorCode::PeerGone)?;
        Ok(())
    }

    /// Remote, lock-free read of shared state. Pair with [`Self::data_set`]
    /// under a held [`LockTransport::lock_request`] lease for a
    /// read-modify-write that another node's concurrent write can't clobber.
    pub async fn data_get(
        &self,
        source_kind: &str,
        target_kind: &str,
        key: &str,
        default: Option<&Value>,
    ) -> Result<Option<Value>, ErrorCode> {
        let mut client = self.client().await?;
        let default_json = default.map(|v| v.to_string());
        let result = client
            .data_get(proto::DataGetRequest {
                source_kind: source_kind.to_owned(),
                target_kind: target_kind.to_owned(),
                key: key.to_owned(),
                default_json,
            })
            .await;
        self.breaker.record_result(result.is_ok());
        let resp = result.map_err(|_| ErrorCode::PeerGone)?.into_inner();
        if !resp.ok {
            return Err(ErrorCode::InvalidRequest);
        }
        match resp.value_json {
            Some(json) => serde_json::from_str(&json).map_err(|_| ErrorCode::InvalidRequest),
            None => Ok(None),
        }
    }

    /// Remote write, accepted only if `fence_token` is still current for
    /// `key` — see [`LockTransport::lock_request`].
    pub async fn data_set(
        &self,
        source_kind: &str,
        target_kind: &str,
        key: &str,
        value: &Value,
        fence_token: FenceToken,
    ) -> Result<(), ErrorCode> {
        let mut client = self.client().await?;
        let result = client
            .data_set(proto::DataSetRequest {
                source_kind: source_kind.to_owned(),
                target_kind: target_kind.to_owned(),
                key: key.to_owned(),
                value_json: value.to_string(),
                fence_token,
            })
            .await;
        self.breaker.record_result(result.is_ok());
        let resp = result.map_err(|_| ErrorCode::PeerGone)?.into_inner();
        if resp.ok { Ok(()) } else { Err(ErrorCode::InvalidRequest) }
    }

    pub async fn heartbeat(&self, worker_id: &str, timestamp_ms: u64, local_agent_count: u32) -> Result<u64, ErrorCode> {
        let mut client = self.client().await?;
        let result = client
            .heartbeat(proto::HeartbeatRequest {
                worker_id: worker_id.to_owned(),
                timestamp_ms,
                local_agent_count,
            })
            .await;
        self.breaker.record_result(result.is_ok());
        Ok(result.map_err(|_| ErrorCode::PeerGone)?.into_inner().directory_version)
    }
}

/// This client's [`ConnectionPool`] holds a connected channel keyed by
/// endpoint; a dedicated pool instance belongs to the node (master or
/// worker) wiring up its set of peers.
pub type ClientPool = ConnectionPool<Channel>;

#[async_trait::async_trait]
impl LockTransport for AgoraClient {
    async fn lock_request(
        &self,
        key: &str,
        requester_id: &str,
        lease_ttl: Duration,
        timeout: Duration,
    ) -> Result<Lease, LockError> {
        let mut client = self.client().await.map_err(|_| LockError::AuthorityUnreachable)?;
        let result = client
            .lock_request(proto::LockRequestMessage {
                key: key.to_owned(),
                requester_id: requester_id.to_owned(),
                lease_ttl_ms: lease_ttl.as_millis() as u64,
                timeout_ms: timeout.as_millis() as u64,
            })
            .await;
        self.breaker.record_result(result.is_ok());
        let resp = result.map_err(|_| LockError::AuthorityUnreachable)?.into_inner();
        if resp.granted {
            Ok(Lease { fence_token: resp.fence_token })
        } else {
            Err(LockError::Timeout { key: key.to_owned(), timeout_ms: timeout.as_millis() as u64 })
        }
    }

    async fn lock_release(&self, key: &str, requester_id: &str, fence_token: FenceToken) {
        if let Ok(mut client) = self.client().await {
            let _ = client
                .lock_release(proto::LockReleaseMessage {
                    key: key.to_owned(),
                    requester_id: requester_id.to_owned(),
                    fence_token,
                })
                .await;
        }
    }

    /// The master validates a write's fence token against its
    /// `fence_high_water` at the point of the `DataSet` RPC itself (the
    /// request carries `fence_token`); there is no separate wire check.
    async fn check_fence(&self, _key: &str, _fence_token: FenceToken) -> Result<(), LockError> {
        Ok(())
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
