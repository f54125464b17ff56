// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker liveness tracking on the master side. A worker is `Alive` while
//! heartbeats keep arriving, `Suspect` after `2H` missed, and `Dead` after
//! `5H` (or an explicit `worker_timeout` override).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    Alive,
    Suspect,
    Dead,
}

struct WorkerLiveness {
    last_heartbeat: Instant,
}

/// Tracks last-heartbeat times and classifies worker status against a
/// configured `heartbeat_interval`.
pub struct HeartbeatTracker {
    heartbeat_interval: Duration,
    dead_after: Duration,
    workers: RwLock<HashMap<String, WorkerLiveness>>,
}

impl HeartbeatTracker {
    /// `worker_timeout`, if given, overrides the default `5H` dead
    /// threshold.
    pub fn new(heartbeat_interval: Duration, worker_timeout: Option<Duration>) -> Self {
        Self {
            heartbeat_interval,
            dead_after: worker_timeout.unwrap_or(heartbeat_interval * 5),
            workers: RwLock::new(HashMap::new()),
        }
    }

    pub async fn record_heartbeat(&self, worker_id: &str) {
        self.workers
            .write()
            .await
            .insert(worker_id.to_owned(), WorkerLiveness { last_heartbeat: Instant::now() });
    }

    pub async fn forget(&self, worker_id: &str) {
        self.workers.write().await.remove(worker_id);
    }

    pub async fn status(&self, worker_id: &str) -> Option<WorkerStatus> {
        let workers = self.workers.read().await;
        let liveness = workers.get(worker_id)?;
        let since = liveness.last_heartbeat.elapsed();
        Some(self.classify(since))
    }

    fn classify(&self, since: Duration) -> WorkerStatus {
        if since >= self.dead_after {
            WorkerStatus::Dead
        } else if since >= self.heartbeat_interval * 2 {
            WorkerStatus::Suspect
        } else {
            WorkerStatus::Alive
        }
    }

    /// Return every worker currently classified `Dead`, for the caller to
    /// purge from the directory and fail in-flight RPCs.
    pub async fn dead_workers(&self) -> Vec<String> {
        let workers = self.workers.read().await;
        workers
            .iter()
            .filter(|(_, liveness)| self.classify(liveness.last_heartbeat.elapsed()) == WorkerStatus::Dead)
            .map(|(id, _)| id.clone())
            .collect()
    }
}

#[cfg(test)]
#[path = "heartbeat_tests.rs"]
mod tests;
