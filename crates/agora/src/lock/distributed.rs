// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Distributed mode: the master is the sole lock authority (it runs a
//! [`super::local::LocalLockService`] internally). Workers reach it through
//! any type implementing [`LockTransport`] — in production that's the gRPC
//! client in [`crate::transport`], in tests it can be an in-process stub.

use std::time::Duration;

use super::{FenceToken, Lease, LockError, LockService};

/// What a worker needs from the wire to reach the master's lock authority.
/// Kept independent of the concrete RPC stack so the lock service doesn't
/// have to depend on `tonic` types directly.
#[async_trait::async_trait]
pub trait LockTransport: Send + Sync {
    async fn lock_request(
        &self,
        key: &str,
        requester_id: &str,
        lease_ttl: Duration,
        timeout: Duration,
    ) -> Result<Lease, LockError>;

    async fn lock_release(&self, key: &str, requester_id: &str, fence_token: FenceToken);

    async fn check_fence(&self, key: &str, fence_token: FenceToken) -> Result<(), LockError>;
}

/// Worker-side [`LockService`] that forwards every call across the wire to
/// the master's authoritative lock state.
pub struct DistributedLockService<T: LockTransport> {
    transport: T,
}

impl<T: LockTransport> DistributedLockService<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }
}

#[async_trait::async_trait]
impl<T: LockTransport> LockService for DistributedLockService<T> {
    async fn acquire(
        &self,
        key: &str,
        requester_id: &str,
        lease_ttl: Duration,
        timeout: Duration,
    ) -> Result<Lease, LockError> {
        self.transport.lock_request(key, requester_id, lease_ttl, timeout).await
    }

    async fn release(&self, key: &str, requester_id: &str, fence_token: FenceToken) {
        self.transport.lock_release(key, requester_id, fence_token).await;
    }

    async fn check_fence(&self, key: &str, fence_token: FenceToken) -> Result<(), LockError> {
        self.transport.check_fence(key, fence_token).await
    }
}

#[cfg(test)]
#[path = "distributed_tests.rs"]
mod tests;
