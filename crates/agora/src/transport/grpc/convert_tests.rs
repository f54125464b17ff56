// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::event::EventKind;

#[test]
fn round_trips_a_custom_event_through_the_envelope() {
    let event = Event::new("agent.1", "agent.2", EventKind::Custom {
        name: "greet".to_owned(),
        payload: serde_json::json!({ "text": "hi" }),
    });

    let envelope = event_to_envelope(&event).unwrap();
    assert_eq!(envelope.event_kind, "greet");
    assert_eq!(envelope.from_id, "agent.1");
    assert_eq!(envelope.to_id, "agent.2");

    let back = envelope_to_event(envelope).unwrap();
    assert_eq!(back, event);
}

#[test]
fn round_trips_parent_event_id() {
    let parent = Event::new("agent.1", "ENV", EventKind::Start);
    let child = Event::child_of(&parent, "ENV", "agent.1", EventKind::Resume);

    let envelope = event_to_envelope(&child).unwrap();
    assert_eq!(envelope.parent_event_id.as_deref(), Some(parent.event_id.as_str()));

    let back = envelope_to_event(envelope).unwrap();
    assert_eq!(back.parent_event_id, Some(parent.event_id));
}

#[test]
fn malformed_payload_json_is_rejected() {
    let envelope = proto::EventEnvelope {
        event_id: "e1".to_owned(),
        event_kind: "start".to_owned(),
        from_id: "a".to_owned(),
        to_id: "b".to_owned(),
        timestamp_ms: 0,
        parent_event_id: None,
        payload_json: "not json".to_owned(),
    };
    assert!(matches!(envelope_to_event(envelope), Err(ConvertError::Payload(_))));
}
