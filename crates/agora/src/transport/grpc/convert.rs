// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Conversions between domain [`Event`] and wire [`proto::EventEnvelope`].
//! The kind-specific payload crosses the wire as opaque JSON so the proto
//! schema doesn't have to track every [`EventKind`] variant.

use super::proto;
use crate::event::{Event, EventKind};

#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    #[error("malformed event payload: {0}")]
    Payload(#[from] serde_json::Error),
}

pub fn event_to_envelope(event: &Event) -> Result<proto::EventEnvelope, ConvertError> {
    Ok(proto::EventEnvelope {
        event_id: event.event_id.clone(),
        event_kind: event.kind.label().to_owned(),
        from_id: event.from_id.clone(),
        to_id: event.to_id.clone(),
        timestamp_ms: event.timestamp,
        parent_event_id: event.parent_event_id.clone(),
        payload_json: serde_json::to_string(&event.kind)?,
    })
}

pub fn envelope_to_event(envelope: proto::EventEnvelope) -> Result<Event, ConvertError> {
    let kind: EventKind = serde_json::from_str(&envelope.payload_json)?;
    Ok(Event {
        event_id: envelope.event_id,
        from_id: envelope.from_id,
        to_id: envelope.to_id,
        timestamp: envelope.timestamp_ms,
        parent_event_id: envelope.parent_event_id,
        kind,
    })
}

#[cfg(test)]
#[path = "convert_tests.rs"]
mod tests;
