// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process-local mapping of agent identity to agent handle. Read-mostly:
//! lookups happen on every dispatch, registration/unregistration happen
//! only at setup, teardown, or agent-stop time, so a single
//! `tokio::sync::RwLock` around the map is the right tradeoff.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};

use crate::event::Event;

/// Inbox capacity for a newly created agent. Bounded per the runtime's
/// no-unbounded-queues rule; the bus drop policy in [`crate::bus`] decides
/// what happens when this fills.
pub const DEFAULT_INBOX_CAPACITY: usize = 256;

/// A process-local handle to a registered agent: its inbox sender and a
/// liveness flag. The owning worker task holds the paired receiver.
pub struct AgentHandle {
    pub agent_id: String,
    pub agent_type: String,
    inbox: mpsc::Sender<Event>,
    stopped: AtomicBool,
}

impl AgentHandle {
    pub fn new(agent_id: impl Into<String>, agent_type: impl Into<String>, inbox: mpsc::Sender<Event>) -> Self {
        Self { agent_id: agent_id.into(), agent_type: agent_type.into(), inbox, stopped: AtomicBool::new(false) }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    pub fn mark_stopped(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    /// Try to push an event into the inbox without blocking. Used by the
    /// bus's non-blocking fast path.
    pub fn try_push(&self, event: Event) -> Result<(), mpsc::error::TrySendError<Event>> {
        self.inbox.try_send(event)
    }

    /// Push an event into the inbox, blocking up to `timeout`. Used by the
    /// bus when the fast path finds the inbox full.
    pub async fn push_with_timeout(
        &self,
        event: Event,
        timeout: std::time::Duration,
    ) -> Result<(), mpsc::error::SendTimeoutError<Event>> {
        self.inbox.send_timeout(event, timeout).await
    }

    /// Push an event, blocking indefinitely until there is room. Used only
    /// for response events, which the bus's drop policy never discards.
    pub async fn push_blocking(&self, event: Event) -> Result<(), mpsc::error::SendError<Event>> {
        self.inbox.send(event).await
    }
}

/// Process-local `agent_id -> AgentHandle` map.
#[derive(Default)]
pub struct Registry {
    agents: RwLock<HashMap<String, Arc<AgentHandle>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new agent handle. Returns the previous handle if one was
    /// already registered under this ID (callers typically treat this as a
    /// programming error).
    pub async fn register(&self, handle: Arc<AgentHandle>) -> Option<Arc<AgentHandle>> {
        self.agents.write().await.insert(handle.agent_id.clone(), handle)
    }

    /// Remove an agent from the registry. Returns the removed handle, if
    /// any — idempotent, matching the testable property that
    /// register-then-unregister leaves the registry unchanged.
    pub async fn unregister(&self, agent_id: &str) -> Option<Arc<AgentHandle>> {
        self.agents.write().await.remove(agent_id)
    }

    pub async fn get(&self, agent_id: &str) -> Option<Arc<AgentHandle>> {
        self.agents.read().await.get(agent_id).cloned()
    }

    pub async fn contains(&self, agent_id: &str) -> bool {
        self.agents.read().await.contains_key(agent_id)
    }

    pub async fn len(&self) -> usize {
        self.agents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.agents.read().await.is_empty()
    }

    /// Snapshot of every registered agent handle, for broadcast fan-out.
    pub async fn all(&self) -> Vec<Arc<AgentHandle>> {
        self.agents.read().await.values().cloned().collect()
    }

    /// Snapshot of every registered agent ID.
    pub async fn agent_ids(&self) -> Vec<String> {
        self.agents.read().await.keys().cloned().collect()
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
