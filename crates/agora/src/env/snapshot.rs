// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The trail persistence writer: newline-delimited JSON under a per-run
//! directory, written asynchronously so a step boundary never blocks the
//! next round. Enforces the step-ordering invariant — no snapshot for
//! step `n+1` is written before the snapshot for step `n`.

use std::path::PathBuf;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::config::SimulationConfig;
use crate::event::Event;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("io error writing {path}: {source}")]
    Io { path: PathBuf, #[source] source: std::io::Error },
    #[error("failed to serialize snapshot data: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("step {step} written out of order: last written step was {last:?}")]
    OutOfOrder { step: u64, last: Option<u64> },
}

/// Everything persisted at one step boundary.
#[derive(Debug, Clone, Default)]
pub struct StepSnapshot {
    pub step: u64,
    pub env_state: Value,
    pub agent_states: Vec<(String, Value)>,
    pub events: Vec<Event>,
    pub decisions: Vec<Value>,
    pub metrics: Vec<(String, Value)>,
}

/// Writes the `trail_id/` layout: `config.json`, `env_states/step_{n}.json`,
/// `agents/{agent_id}/{step}.json`, `events/step_{n}.jsonl`,
/// `decisions/step_{n}.jsonl`, `metrics/{name}.jsonl`, `event_flows.json`.
pub struct SnapshotWriter {
    root: PathBuf,
    last_written_step: Mutex<Option<u64>>,
}

impl SnapshotWriter {
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self, SnapshotError> {
        let root = root.into();
        for sub in ["env_states", "agents", "events", "decisions", "metrics"] {
            let dir = root.join(sub);
            tokio::fs::create_dir_all(&dir).await.map_err(|source| SnapshotError::Io { path: dir, source })?;
        }
        Ok(Self { root, last_written_step: Mutex::new(None) })
    }

    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    pub async fn write_config(&self, config: &SimulationConfig) -> Result<(), SnapshotError> {
        self.write_json(self.root.join("config.json"), config).await
    }

    /// Write one step's artifacts. Rejects a step at or before the last
    /// one written instead of silently reordering the trail.
    pub async fn write_step(&self, snapshot: &StepSnapshot) -> Result<(), SnapshotError> {
        {
            let mut last = self.last_written_step.lock().await;
            if let Some(prev) = *last {
                if snapshot.step <= prev {
                    return Err(SnapshotError::OutOfOrder { step: snapshot.step, last: Some(prev) });
                }
            }
            *last = Some(snapshot.step);
        }

        self.write_json(self.env_state_path(snapshot.step), &snapshot.env_state).await?;

        for (agent_id, state) in &snapshot.agent_states {
            let dir = self.root.join("agents").join(agent_id);
            tokio::fs::create_dir_all(&dir).await.map_err(|source| SnapshotError::Io { path: dir.clone(), source })?;
            self.write_json(dir.join(format!("{}.json", snapshot.step)), state).await?;
        }

        self.append_ndjson(self.root.join("events").join(format!("step_{}.jsonl", snapshot.step)), &snapshot.events)
            .await?;
        self.append_ndjson(
            self.root.join("decisions").join(format!("step_{}.jsonl", snapshot.step)),
            &snapshot.decisions,
        )
        .await?;

        for (name, value) in &snapshot.metrics {
            self.append_ndjson(self.root.join("metrics").join(format!("{name}.jsonl")), std::slice::from_ref(value))
                .await?;
        }

        Ok(())
    }

    pub async fn write_event_flows(&self, flows_json: &str) -> Result<(), SnapshotError> {
        let path = self.root.join("event_flows.json");
        tokio::fs::write(&path, flows_json).await.map_err(|source| SnapshotError::Io { path, source })
    }

    pub async fn last_written_step(&self) -> Option<u64> {
        *self.last_written_step.lock().await
    }

    fn env_state_path(&self, step: u64) -> PathBuf {
        self.root.join("env_states").join(format!("step_{step}.json"))
    }

    async fn write_json<T: Serialize>(&self, path: PathBuf, value: &T) -> Result<(), SnapshotError> {
        let bytes = serde_json::to_vec_pretty(value)?;
        tokio::fs::write(&path, bytes).await.map_err(|source| SnapshotError::Io { path, source })
    }

    async fn append_ndjson<T: Serialize>(&self, path: PathBuf, values: &[T]) -> Result<(), SnapshotError> {
        if values.is_empty() {
            return Ok(());
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|source| SnapshotError::Io { path: path.clone(), source })?;
        for value in values {
            let mut line = serde_json::to_vec(value)?;
            line.push(b'\n');
            file.write_all(&line).await.map_err(|source| SnapshotError::Io { path: path.clone(), source })?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "snapshot_tests.rs"]
mod tests;
