// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The immutable event envelope — the sole inter-agent communication
//! primitive. Every event carries an addressee (`to_id`), a source
//! (`from_id`), and an opaque, kind-specific payload.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::clock::{new_id, now_ms};

/// Reserved addressee for the environment itself.
pub const ENV: &str = "ENV";
/// Reserved addressee meaning "every locally registered agent" (and, in
/// distributed mode, every agent on every worker).
pub const ALL: &str = "ALL";

/// The kind-specific payload carried by an event. Kinds the runtime itself
/// interprets are modeled as variants; anything else is a user-defined kind
/// with an opaque JSON payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventKind {
    Start,
    End { reason: String },
    Pause,
    Resume,
    Tick { step: u64 },
    DataGet { source_kind: String, target_kind: String, key: String, default: Option<Value> },
    DataGetResponse { request_id: String, key: String, value: Option<Value>, ok: bool, err: Option<String> },
    DataSet { source_kind: String, target_kind: String, key: String, value: Value },
    DataSetResponse { request_id: String, key: String, ok: bool, err: Option<String> },
    /// A user-defined event kind with an opaque payload, e.g. agent-level
    /// messages the runtime never interprets.
    Custom { name: String, payload: Value },
}

impl EventKind {
    /// True for the `*Response` kinds, which the bus never drops under
    /// inbox backpressure (see [`crate::bus`]'s drop policy).
    pub fn is_response(&self) -> bool {
        matches!(self, Self::DataGetResponse { .. } | Self::DataSetResponse { .. })
    }

    /// The `request_id` this response resolves, if this is a response
    /// kind.
    pub fn response_request_id(&self) -> Option<&str> {
        match self {
            Self::DataGetResponse { request_id, .. } | Self::DataSetResponse { request_id, .. } => {
                Some(request_id)
            }
            _ => None,
        }
    }

    /// A short label for logging and flow export.
    pub fn label(&self) -> &str {
        match self {
            Self::Start => "start",
            Self::End { .. } => "end",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Tick { .. } => "tick",
            Self::DataGet { .. } => "data_get",
            Self::DataGetResponse { .. } => "data_get_response",
            Self::DataSet { .. } => "data_set",
            Self::DataSetResponse { .. } => "data_set_response",
            Self::Custom { name, .. } => name,
        }
    }
}

/// An immutable, addressed message. Constructed once via [`Event::new`] and
/// never mutated afterward; `parent_event_id` links it into a flow for
/// export (see [`crate::bus::flow`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub event_id: String,
    pub from_id: String,
    pub to_id: String,
    pub timestamp: u64,
    pub parent_event_id: Option<String>,
    pub kind: EventKind,
}

impl Event {
    /// Build a new event, stamping a fresh ID and the current wall-clock
    /// timestamp.
    pub fn new(from_id: impl Into<String>, to_id: impl Into<String>, kind: EventKind) -> Self {
        Self {
            event_id: new_id(),
            from_id: from_id.into(),
            to_id: to_id.into(),
            timestamp: now_ms(),
            parent_event_id: None,
            kind,
        }
    }

    /// Build an event that is causally linked to `parent`, for flow
    /// tracking.
    pub fn child_of(parent: &Event, from_id: impl Into<String>, to_id: impl Into<String>, kind: EventKind) -> Self {
        let mut event = Self::new(from_id, to_id, kind);
        event.parent_event_id = Some(parent.event_id.clone());
        event
    }

    /// Build a response event correlated to `request_id`, addressed back to
    /// the original requester.
    pub fn response_to(request: &Event, kind: EventKind) -> Self {
        Self::child_of(request, request.to_id.clone(), request.from_id.clone(), kind)
    }

    pub fn is_broadcast(&self) -> bool {
        self.to_id == ALL
    }

    pub fn is_for_env(&self) -> bool {
        self.to_id == ENV
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
