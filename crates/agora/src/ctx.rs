// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The agent API: the handle an agent implementation is built against.
//! `AgentContext` wraps the bus with the request/response bookkeeping an
//! agent shouldn't have to reimplement, and [`EventHandler`] is the
//! statically declared `{event_kind -> handler}` table an agent registers
//! at construction time, replacing dynamic hook registration.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::bus::{BusError, EventBus};
use crate::error::ErrorCode;
use crate::event::{Event, EventKind, ENV};
use crate::registry::AgentHandle;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum CtxError {
    #[error(transparent)]
    Bus(#[from] BusError),
    #[error("request to {to_id} for {key} was rejected: {message}")]
    Rejected { to_id: String, key: String, message: String },
    #[error("peer responded with an event that doesn't match the request kind")]
    UnexpectedResponse,
}

impl CtxError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Bus(err) => err.code(),
            Self::Rejected { .. } => ErrorCode::InvalidRequest,
            Self::UnexpectedResponse => ErrorCode::Internal,
        }
    }
}

/// Handles one incoming event kind for an agent. Registered by label (see
/// [`EventKind::label`]) in the agent's handler table.
#[async_trait::async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: Event, ctx: Arc<AgentContext>);
}

/// What an agent implementation is built against: identity, the bus, its
/// own inbox handle, and its statically declared handler table. Not
/// `Clone` — an agent task owns exactly one; share it across spawned
/// sub-tasks via `Arc`.
pub struct AgentContext {
    agent_id: String,
    agent_type: String,
    bus: Arc<EventBus>,
    handle: Arc<AgentHandle>,
    handlers: RwLock<HashMap<String, Arc<dyn EventHandler>>>,
    request_timeout: Duration,
}

impl AgentContext {
    pub fn new(bus: Arc<EventBus>, handle: Arc<AgentHandle>) -> Self {
        Self {
            agent_id: handle.agent_id.clone(),
            agent_type: handle.agent_type.clone(),
            bus,
            handle,
            handlers: RwLock::new(HashMap::new()),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn agent_type(&self) -> &str {
        &self.agent_type
    }

    /// Register a handler for `event_kind`'s label, called during agent
    /// construction before the agent is registered with the bus.
    pub async fn register_handler(&self, event_kind: &str, handler: Arc<dyn EventHandler>) {
        self.handlers.write().await.insert(event_kind.to_owned(), handler);
    }

    /// Drain this agent's inbox, dispatching each event to its registered
    /// handler, until the inbox closes or this agent is marked stopped.
    /// The per-agent task loop every agent implementation runs inside.
    pub async fn run(self: &Arc<Self>, mut inbox: tokio::sync::mpsc::Receiver<Event>) {
        while let Some(event) = inbox.recv().await {
            if self.handle.is_stopped() {
                break;
            }
            let label = event.kind.label().to_owned();
            let handler = self.handlers.read().await.get(&label).cloned();
            match handler {
                Some(handler) => handler.handle(event, Arc::clone(self)).await,
                None => debug!(agent_id = %self.agent_id, kind = %label, "no handler registered, event dropped"),
            }
        }
    }

    /// Dispatch an outbound event without waiting for a response.
    pub async fn emit(&self, event: Event) -> Result<(), CtxError> {
        Ok(self.bus.dispatch(event).await?)
    }

    /// Dispatch `event` and wait for its correlated response, failing with
    /// `Timeout` if none arrives within `timeout`.
    pub async fn request(&self, event: Event, timeout: Duration) -> Result<Event, CtxError> {
        Ok(self.bus.request(event, timeout).await?)
    }

    /// Read `key` from shared environment state, falling back to `default`
    /// if unset.
    pub async fn get_env(&self, key: impl Into<String>, default: Option<Value>) -> Result<Option<Value>, CtxError> {
        let key = key.into();
        let request = Event::new(
            self.agent_id.clone(),
            ENV,
            EventKind::DataGet { source_kind: "agent".into(), target_kind: "env".into(), key: key.clone(), default: default.clone() },
        );
        let response = self.bus.request(request, self.request_timeout).await?;
        match response.kind {
            EventKind::DataGetResponse { ok, value, err, .. } => {
                if ok { Ok(value) } else { Err(CtxError::Rejected { to_id: ENV.into(), key, message: err.unwrap_or_default() }) }
            }
            _ => Err(CtxError::UnexpectedResponse),
        }
    }

    /// Write `key` in shared environment state, serialized by the
    /// environment driver's lock.
    pub async fn set_env(&self, key: impl Into<String>, value: Value) -> Result<(), CtxError> {
        let key = key.into();
        let request = Event::new(
            self.agent_id.clone(),
            ENV,
            EventKind::DataSet { source_kind: "agent".into(), target_kind: "env".into(), key: key.clone(), value },
        );
        let response = self.bus.request(request, self.request_timeout).await?;
        match response.kind {
            EventKind::DataSetResponse { ok, err, .. } => {
                if ok { Ok(()) } else { Err(CtxError::Rejected { to_id: ENV.into(), key, message: err.unwrap_or_default() }) }
            }
            _ => Err(CtxError::UnexpectedResponse),
        }
    }

    /// Read `key` from a specific peer agent's own state. The peer must
    /// have a `DataGet` handler registered to answer.
    pub async fn get_peer(
        &self,
        agent_id: impl Into<String>,
        key: impl Into<String>,
        default: Option<Value>,
    ) -> Result<Option<Value>, CtxError> {
        let agent_id = agent_id.into();
        let key = key.into();
        let request = Event::new(
            self.agent_id.clone(),
            agent_id.clone(),
            EventKind::DataGet { source_kind: "agent".into(), target_kind: "agent".into(), key: key.clone(), default: default.clone() },
        );
        let response = self.bus.request(request, self.request_timeout).await?;
        match response.kind {
            EventKind::DataGetResponse { ok, value, err, .. } => {
                if ok { Ok(value) } else { Err(CtxError::Rejected { to_id: agent_id, key, message: err.unwrap_or_default() }) }
            }
            _ => Err(CtxError::UnexpectedResponse),
        }
    }

    /// Write `key` on a specific peer agent. The peer must have a
    /// `DataSet` handler registered to accept it.
    pub async fn set_peer(&self, agent_id: impl Into<String>, key: impl Into<String>, value: Value) -> Result<(), CtxError> {
        let agent_id = agent_id.into();
        let key = key.into();
        let request = Event::new(
            self.agent_id.clone(),
            agent_id.clone(),
            EventKind::DataSet { source_kind: "agent".into(), target_kind: "agent".into(), key: key.clone(), value },
        );
        let response = self.bus.request(request, self.request_timeout).await?;
        match response.kind {
            EventKind::DataSetResponse { ok, err, .. } => {
                if ok { Ok(()) } else { Err(CtxError::Rejected { to_id: agent_id, key, message: err.unwrap_or_default() }) }
            }
            _ => Err(CtxError::UnexpectedResponse),
        }
    }

    /// Terminate this agent: mark it stopped (so `run`'s drain loop exits
    /// once its inbox next empties) and tell the environment it's gone.
    pub async fn stop_self(&self, reason: impl Into<String>) -> Result<(), CtxError> {
        self.handle.mark_stopped();
        let reason = reason.into();
        warn!(agent_id = %self.agent_id, reason, "agent stopping itself");
        self.emit(Event::new(self.agent_id.clone(), ENV, EventKind::End { reason })).await
    }
}

#[cfg(test)]
#[path = "ctx_tests.rs"]
mod tests;
