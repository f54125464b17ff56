// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The seam between the event bus and cross-node delivery. The bus only
//! needs to forward an event it cannot deliver locally, and fan a
//! broadcast out to every other node; [`ClusterBridge`] is the minimal
//! surface for that, implemented here for [`Master`] and [`Worker`] so
//! `bus` depends on `cluster` rather than the other way around.

use tracing::warn;

use crate::cluster::{Master, Worker};
use crate::error::ErrorCode;
use crate::event::Event;

#[async_trait::async_trait]
pub trait ClusterBridge: Send + Sync {
    fn is_master(&self) -> bool;

    /// Forward a non-broadcast event this node could not deliver to a
    /// locally registered agent. A master resolves `to_id` in its
    /// directory and forwards directly to the hosting worker; a worker
    /// forwards to the master, which re-applies the full delivery
    /// algorithm.
    async fn forward(&self, event: Event) -> Result<(), ErrorCode>;

    /// Fan a broadcast out to every other node. A no-op for a worker —
    /// only the master RPCs `ForwardBroadcast` to every worker.
    async fn broadcast_to_others(&self, event: Event) -> Result<(), ErrorCode>;
}

#[async_trait::async_trait]
impl ClusterBridge for Master {
    fn is_master(&self) -> bool {
        true
    }

    async fn forward(&self, event: Event) -> Result<(), ErrorCode> {
        let Some(worker_id) = self.directory().lookup(&event.to_id).await else {
            return Err(ErrorCode::PeerGone);
        };
        let client = self.client_for(&worker_id).await.ok_or(ErrorCode::PeerGone)?;
        client.dispatch_event(&event).await
    }

    async fn broadcast_to_others(&self, event: Event) -> Result<(), ErrorCode> {
        let mut last_err = None;
        for worker_id in self.worker_ids().await {
            let Some(client) = self.client_for(&worker_id).await else { continue };
            if let Err(err) = client.forward_broadcast(&event).await {
                warn!(worker_id, %err, "broadcast forward to worker failed");
                last_err = Some(err);
            }
        }
        match last_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait::async_trait]
impl ClusterBridge for Worker {
    fn is_master(&self) -> bool {
        false
    }

    async fn forward(&self, event: Event) -> Result<(), ErrorCode> {
        self.forward_to_master(&event).await
    }

    async fn broadcast_to_others(&self, _event: Event) -> Result<(), ErrorCode> {
        Ok(())
    }
}

#[cfg(test)]
#[path = "bridge_tests.rs"]
mod tests;
