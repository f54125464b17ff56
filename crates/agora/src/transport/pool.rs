// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Keyed pool of reusable outbound connections, one per remote endpoint.
//!
//! Each entry is created lazily on first use via a caller-supplied async
//! factory and kept alive across calls so RPCs reuse the same `tonic`
//! channel instead of redialing. Entries idle past `idle_ttl` are dropped
//! by [`ConnectionPool::evict_idle`], which callers run on a timer.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

struct Entry<C> {
    client: C,
    last_used: Instant,
}

/// A pool of `C` (typically a cheaply-cloneable gRPC client) keyed by
/// endpoint address.
pub struct ConnectionPool<C: Clone> {
    idle_ttl: Duration,
    entries: Mutex<HashMap<String, Entry<C>>>,
}

impl<C: Clone> ConnectionPool<C> {
    pub fn new(idle_ttl: Duration) -> Self {
        Self { idle_ttl, entries: Mutex::new(HashMap::new()) }
    }

    /// Return the pooled client for `endpoint`, creating it via `connect`
    /// if absent or if the previous connection attempt failed.
    pub async fn get_or_connect<F, Fut, E>(&self, endpoint: &str, connect: F) -> Result<C, E>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<C, E>>,
    {
        {
            let mut entries = self.entries.lock().await;
            if let Some(entry) = entries.get_mut(endpoint) {
                entry.last_used = Instant::now();
                return Ok(entry.client.clone());
            }
        }

        let client = connect(endpoint.to_owned()).await?;
        let mut entries = self.entries.lock().await;
        let entry = entries
            .entry(endpoint.to_owned())
            .or_insert_with(|| Entry { client: client.clone(), last_used: Instant::now() });
        entry.last_used = Instant::now();
        Ok(entry.client.clone())
    }

    /// Drop any connection whose last use predates `idle_ttl`. Returns the
    /// number of entries evicted.
    pub async fn evict_idle(&self) -> usize {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        let idle_ttl = self.idle_ttl;
        entries.retain(|_, entry| entry.last_used.elapsed() < idle_ttl);
        before - entries.len()
    }

    /// Force the next `get_or_connect` for `endpoint` to reconnect, e.g.
    /// after a circuit breaker trips on it.
    pub async fn invalidate(&self, endpoint: &str) {
        self.entries.lock().await.remove(endpoint);
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

/// Convenience alias for the pool shared across a node's outbound RPCs.
pub type SharedConnectionPool<C> = Arc<ConnectionPool<C>>;

#[cfg(test)]
#[path = "pool_tests.rs"]
mod tests;
