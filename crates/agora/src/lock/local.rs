// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Single-node lock service: a process-local keyed mutex map. Acquisition
//! blocks up to a timeout and is cancellation-safe; leases auto-expire so a
//! crashed holder never wedges a key forever.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, Notify, RwLock};

use super::{FenceToken, Lease, LockError, LockService};

struct KeyState {
    holder: Option<String>,
    fence_token: FenceToken,
    lease_deadline: Option<Instant>,
}

struct KeySlot {
    state: Mutex<KeyState>,
    notify: Notify,
    fence_high_water: AtomicU64,
}

impl KeySlot {
    fn new() -> Self {
        Self {
            state: Mutex::new(KeyState { holder: None, fence_token: 0, lease_deadline: None }),
            notify: Notify::new(),
            fence_high_water: AtomicU64::new(0),
        }
    }
}

/// Process-local keyed mutex map backing [`LockService`] in single-node
/// mode.
#[derive(Default)]
pub struct LocalLockService {
    keys: RwLock<HashMap<String, Arc<KeySlot>>>,
}

impl LocalLockService {
    pub fn new() -> Self {
        Self::default()
    }

    async fn slot_for(&self, key: &str) -> Arc<KeySlot> {
        if let Some(slot) = self.keys.read().await.get(key) {
            return Arc::clone(slot);
        }
        let mut keys = self.keys.write().await;
        Arc::clone(keys.entry(key.to_owned()).or_insert_with(|| Arc::new(KeySlot::new())))
    }
}

#[async_trait::async_trait]
impl LockService for LocalLockService {
    async fn acquire(
        &self,
        key: &str,
        requester_id: &str,
        lease_ttl: Duration,
        timeout: Duration,
    ) -> Result<Lease, LockError> {
        let slot = self.slot_for(key).await;
        let deadline = Instant::now() + timeout;
        // Expired leases are only noticed when something re-checks the key;
        // cap each wait slice so a waiter discovers an expiry promptly
        // instead of sleeping past it until its own deadline fires.
        const POLL_SLICE: Duration = Duration::from_millis(25);

        loop {
            // Arm the notification before re-checking state so a
            // notify_waiters() racing with this check is never missed.
            let notified = slot.notify.notified();
            {
                let mut state = slot.state.lock().await;
                let expired = state.lease_deadline.is_some_and(|d| Instant::now() >= d);
                if state.holder.is_none() || expired {
                    state.holder = Some(requester_id.to_owned());
                    state.fence_token += 1;
                    state.lease_deadline = Some(Instant::now() + lease_ttl);
                    slot.fence_high_water.store(state.fence_token, Ordering::SeqCst);
                    return Ok(Lease { fence_token: state.fence_token });
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(LockError::Timeout { key: key.to_owned(), timeout_ms: timeout.as_millis() as u64 });
            }
            let _ = tokio::time::timeout(remaining.min(POLL_SLICE), notified).await;
        }
    }

    async fn release(&self, key: &str, requester_id: &str, fence_token: FenceToken) {
        let slot = self.slot_for(key).await;
        {
            let mut state = slot.state.lock().await;
            if state.holder.as_deref() == Some(requester_id) && state.fence_token == fence_token {
                state.holder = None;
                state.lease_deadline = None;
            }
        }
        slot.notify.notify_waiters();
    }

    async fn check_fence(&self, key: &str, fence_token: FenceToken) -> Result<(), LockError> {
        let slot = self.slot_for(key).await;
        let last_observed = slot.fence_high_water.load(Ordering::SeqCst);
        if fence_token < last_observed {
            return Err(LockError::StaleFenceToken { key: key.to_owned(), given: fence_token, last_observed });
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "local_tests.rs"]
mod tests;
