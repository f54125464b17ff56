// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Unified error surface shared across the bus, transport, lock service, and
//! environment driver. Component-local errors (`bus::BusError`,
//! `lock::LockError`, `transport::TransportError`, `env::EnvError`) each
//! convert into an [`ErrorCode`] so the control-API event stream can surface
//! structured failures without leaking implementation detail.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Cross-cutting error codes, surfaced over the wire and in structured
/// error events. Mirrors the error taxonomy of the runtime's design: each
/// variant is either retryable by the caller, fatal, or a programming
/// error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    /// The bus has been stopped; no further dispatch is accepted.
    BusStopped,
    /// An operation exceeded its deadline.
    Timeout,
    /// The peer (worker or agent) is gone; pending interactions fail fast.
    PeerGone,
    /// The circuit to a remote endpoint is open; requests are rejected
    /// without attempting the network call.
    CircuitOpen,
    /// A lock acquisition deadline elapsed without a grant.
    LockTimeout,
    /// A simulation state transition was attempted that is not legal from
    /// the current state.
    InvalidTransition,
    /// A programming error: bad key, unknown agent type, malformed
    /// request. Not retryable.
    InvalidRequest,
    /// A fatal subsystem failure (lock master unreachable, persistence
    /// storage down with export required). The simulation transitions to
    /// `ERROR`.
    Internal,
}

impl ErrorCode {
    /// The equivalent [`tonic::Code`] for this error, used by gRPC handlers
    /// that need to translate an internal error into a `Status`.
    pub fn grpc_code(&self) -> tonic::Code {
        match self {
            Self::BusStopped => tonic::Code::Unavailable,
            Self::Timeout => tonic::Code::DeadlineExceeded,
            Self::PeerGone => tonic::Code::NotFound,
            Self::CircuitOpen => tonic::Code::Unavailable,
            Self::LockTimeout => tonic::Code::ResourceExhausted,
            Self::InvalidTransition => tonic::Code::FailedPrecondition,
            Self::InvalidRequest => tonic::Code::InvalidArgument,
            Self::Internal => tonic::Code::Internal,
        }
    }

    pub fn to_grpc_status(&self, message: impl Into<String>) -> tonic::Status {
        tonic::Status::new(self.grpc_code(), message)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BusStopped => "BUS_STOPPED",
            Self::Timeout => "TIMEOUT",
            Self::PeerGone => "PEER_GONE",
            Self::CircuitOpen => "CIRCUIT_OPEN",
            Self::LockTimeout => "LOCK_TIMEOUT",
            Self::InvalidTransition => "INVALID_TRANSITION",
            Self::InvalidRequest => "INVALID_REQUEST",
            Self::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A structured error event, surfaced through the control-API event stream
/// in place of an opaque stack trace (see the runtime's error-handling
/// design: user-visible failures are never raw panics).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredError {
    pub code: ErrorCode,
    pub message: String,
    /// Where the error originated: `"bus"`, `"lock"`, `"transport"`,
    /// `"cluster"`, `"env"`.
    pub scope: String,
    /// Simulation step at the time of the error, if known.
    pub step: Option<u64>,
}

impl StructuredError {
    pub fn new(code: ErrorCode, scope: impl Into<String>, message: impl Into<String>) -> Self {
        Self { code, message: message.into(), scope: scope.into(), step: None }
    }

    pub fn with_step(mut self, step: u64) -> Self {
        self.step = Some(step);
        self
    }
}

impl fmt::Display for StructuredError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.scope, self.code, self.message)?;
        if let Some(step) = self.step {
            write!(f, " (step={step})")?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
