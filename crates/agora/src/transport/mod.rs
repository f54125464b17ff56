// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cross-node transport: the gRPC wire protocol, per-peer circuit breakers,
//! and the connection pool backing outbound clients.

pub mod circuit;
pub mod grpc;
pub mod pool;

use std::time::Duration;

pub use circuit::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use grpc::client::{AgoraClient, ClientPool};
pub use grpc::{AgoraGrpc, ClusterHandler};
pub use pool::ConnectionPool;

use crate::error::ErrorCode;

/// Component-local transport error, convertible into the shared
/// [`ErrorCode`] surface.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("circuit open for endpoint {endpoint}")]
    CircuitOpen { endpoint: String },
    #[error("peer {endpoint} unreachable: {source}")]
    Dial { endpoint: String, #[source] source: tonic::transport::Error },
    #[error("rpc to {endpoint} failed: {status}")]
    Rpc { endpoint: String, status: tonic::Status },
}

impl TransportError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::CircuitOpen { .. } => ErrorCode::CircuitOpen,
            Self::Dial { .. } => ErrorCode::PeerGone,
            Self::Rpc { .. } => ErrorCode::PeerGone,
        }
    }
}

/// Default idle eviction window for pooled outbound channels.
pub const DEFAULT_POOL_IDLE_TTL: Duration = Duration::from_secs(300);
