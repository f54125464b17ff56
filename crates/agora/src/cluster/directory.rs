// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The master-held `agent_id -> worker_id` directory. Versioned so workers
//! can cheaply detect a stale local copy after a reallocation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::RwLock;

#[derive(Default)]
pub struct Directory {
    entries: RwLock<HashMap<String, String>>,
    version: AtomicU64,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Replace the entire directory with a fresh allocation, bumping the
    /// version. Used after a full re-allocation run.
    pub async fn replace(&self, assignment: HashMap<String, String>) -> u64 {
        *self.entries.write().await = assignment;
        self.version.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Assign or move a single agent, bumping the version.
    pub async fn assign(&self, agent_id: impl Into<String>, worker_id: impl Into<String>) -> u64 {
        self.entries.write().await.insert(agent_id.into(), worker_id.into());
        self.version.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub async fn lookup(&self, agent_id: &str) -> Option<String> {
        self.entries.read().await.get(agent_id).cloned()
    }

    /// Remove every agent hosted on `worker_id`, e.g. after it's declared
    /// dead. Returns the removed agent ids.
    pub async fn purge_worker(&self, worker_id: &str) -> Vec<String> {
        let mut entries = self.entries.write().await;
        let removed: Vec<String> =
            entries.iter().filter(|(_, w)| w.as_str() == worker_id).map(|(a, _)| a.clone()).collect();
        for agent_id in &removed {
            entries.remove(agent_id);
        }
        if !removed.is_empty() {
            self.version.fetch_add(1, Ordering::AcqRel);
        }
        removed
    }

    pub async fn snapshot(&self) -> HashMap<String, String> {
        self.entries.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[cfg(test)]
#[path = "directory_tests.rs"]
mod tests;
