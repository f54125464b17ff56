// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Distributed lock service: per-key leased locks serializing mutation of
//! shared agent and environment state, in single-node and cross-node
//! modes.
//!
//! Every `DataSet` against a remote agent or remote env path wraps its
//! round-trip in `acquire -> read -> mutate -> write -> release`. `DataGet`
//! stays lock-free; reads may be stale by at most one in-flight write.

pub mod distributed;
pub mod local;

use std::time::Duration;

use thiserror::Error;

/// Monotonic per-key counter returned on grant, preventing a resurrected
/// stale holder (one whose lease already expired) from completing a write
/// after a newer holder has taken the key.
pub type FenceToken = u64;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LockError {
    #[error("lock acquisition for {key} timed out after {timeout_ms}ms")]
    Timeout { key: String, timeout_ms: u64 },
    #[error("lock authority unreachable (master down)")]
    AuthorityUnreachable,
    #[error("fence token {given} is stale; last observed token for {key} is {last_observed}")]
    StaleFenceToken { key: String, given: FenceToken, last_observed: FenceToken },
}

/// A granted lease: the key it covers and the fencing token the holder
/// must present on every write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lease {
    pub fence_token: FenceToken,
}

/// Common interface for both the single-node and distributed lock
/// services. `acquire` blocks up to `timeout`; `release` is idempotent and
/// safe to call after a crash recovery (the lease will otherwise expire on
/// its own).
#[async_trait::async_trait]
pub trait LockService: Send + Sync {
    async fn acquire(&self, key: &str, requester_id: &str, lease_ttl: Duration, timeout: Duration)
        -> Result<Lease, LockError>;

    async fn release(&self, key: &str, requester_id: &str, fence_token: FenceToken);

    /// Validate a write's fence token against the last-observed token for
    /// `key`. Authoritative stores call this before accepting a write.
    async fn check_fence(&self, key: &str, fence_token: FenceToken) -> Result<(), LockError>;
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
