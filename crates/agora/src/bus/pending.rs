// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The request/response correlation map: one entry per outstanding
//! `request()` call, resolved by a matching response event's
//! `request_id` or failed by the periodic sweep / a peer's death.

use std::collections::HashMap;
use std::time::Instant;

use tokio::sync::{oneshot, Mutex};

use super::BusError;
use crate::event::Event;

struct PendingEntry {
    to_id: String,
    responder: oneshot::Sender<Result<Event, BusError>>,
    deadline: Instant,
}

#[derive(Default)]
pub struct PendingRequests {
    inner: Mutex<HashMap<String, PendingEntry>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register interest in the response to `request_id`, addressed
    /// originally to `to_id`. Returns the receiving half; the sender side
    /// is resolved by [`Self::resolve`], [`Self::sweep_expired`], or
    /// [`Self::fail_addressed_to`].
    pub async fn register(
        &self,
        request_id: impl Into<String>,
        to_id: impl Into<String>,
        deadline: Instant,
    ) -> oneshot::Receiver<Result<Event, BusError>> {
        let (tx, rx) = oneshot::channel();
        self.inner
            .lock()
            .await
            .insert(request_id.into(), PendingEntry { to_id: to_id.into(), responder: tx, deadline });
        rx
    }

    /// Resolve the pending request matching `event`'s response kind, if
    /// any. Returns `true` if a pending entry was resolved (in which case
    /// the caller should not also deliver `event` to a local inbox —
    /// responses are consumed by the requester's `request()` future, not
    /// its own inbox).
    pub async fn resolve(&self, event: &Event) -> bool {
        let Some(request_id) = event.kind.response_request_id() else { return false };
        let mut inner = self.inner.lock().await;
        match inner.remove(request_id) {
            Some(entry) => {
                let _ = entry.responder.send(Ok(event.clone()));
                true
            }
            None => false,
        }
    }

    /// Remove and fail every entry whose deadline has passed. Returns the
    /// number of entries failed.
    pub async fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut inner = self.inner.lock().await;
        let expired: Vec<String> = inner.iter().filter(|(_, e)| e.deadline <= now).map(|(id, _)| id.clone()).collect();
        for id in &expired {
            if let Some(entry) = inner.remove(id) {
                let _ = entry.responder.send(Err(BusError::Timeout { request_id: id.clone() }));
            }
        }
        expired.len()
    }

    /// Fail every pending request addressed to `to_id` with `PeerGone`,
    /// used when the worker hosting `to_id` is declared dead.
    pub async fn fail_addressed_to(&self, to_id: &str) -> usize {
        let mut inner = self.inner.lock().await;
        let matching: Vec<String> = inner.iter().filter(|(_, e)| e.to_id == to_id).map(|(id, _)| id.clone()).collect();
        for id in &matching {
            if let Some(entry) = inner.remove(id) {
                let _ = entry.responder.send(Err(BusError::PeerGone { peer: to_id.to_owned() }));
            }
        }
        matching.len()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }
}

#[cfg(test)]
#[path = "pending_tests.rs"]
mod tests;
