// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Append-only record of every dispatched event's causal link, exportable
//! as the `event_flows.json` artifact. A flow is the transitive closure
//! over `parent_event_id`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::event::Event;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FlowRecord {
    pub event_id: String,
    pub parent_event_id: Option<String>,
    pub from_id: String,
    pub to_id: String,
    pub kind: String,
    pub timestamp: u64,
}

impl FlowRecord {
    pub fn from_event(event: &Event) -> Self {
        Self {
            event_id: event.event_id.clone(),
            parent_event_id: event.parent_event_id.clone(),
            from_id: event.from_id.clone(),
            to_id: event.to_id.clone(),
            kind: event.kind.label().to_owned(),
            timestamp: event.timestamp,
        }
    }
}

#[derive(Default)]
pub struct FlowRecorder {
    records: RwLock<Vec<FlowRecord>>,
}

impl FlowRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, event: &Event) {
        self.records.write().await.push(FlowRecord::from_event(event));
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// The transitive closure of every record reachable from `root_event_id`
    /// by following `parent_event_id` links in either direction.
    pub async fn flow_of(&self, root_event_id: &str) -> Vec<FlowRecord> {
        let records = self.records.read().await;
        let by_id: HashMap<&str, &FlowRecord> = records.iter().map(|r| (r.event_id.as_str(), r)).collect();
        let children: HashMap<&str, Vec<&FlowRecord>> = records.iter().fold(HashMap::new(), |mut acc, r| {
            if let Some(parent) = &r.parent_event_id {
                acc.entry(parent.as_str()).or_default().push(r);
            }
            acc
        });

        let Some(&root) = by_id.get(root_event_id) else { return Vec::new() };
        let mut result = vec![root.clone()];
        let mut stack = vec![root_event_id];
        while let Some(id) = stack.pop() {
            if let Some(kids) = children.get(id) {
                for kid in kids {
                    result.push((*kid).clone());
                    stack.push(kid.event_id.as_str());
                }
            }
        }
        result
    }

    /// Every recorded flow, grouped by root (an event with no recorded
    /// parent, or whose parent was never itself recorded).
    pub async fn export_json(&self) -> Result<String, serde_json::Error> {
        let records = self.records.read().await;
        serde_json::to_string_pretty(&*records)
    }
}

#[cfg(test)]
#[path = "flow_tests.rs"]
mod tests;
