// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The event bus: the single drain loop that owns delivery order,
//! broadcast fan-out, request/response correlation, and (optionally)
//! cross-node forwarding via a [`ClusterBridge`].
//!
//! Delivery is a fixed five-step algorithm: broadcast fan-out, then
//! environment delivery, then local registry delivery, then a remote
//! forward through the bridge, and finally an unknown-addressee count —
//! see [`EventBus::deliver`].

pub mod bridge;
pub mod flow;
pub mod pending;

pub use bridge::ClusterBridge;
pub use flow::{FlowRecord, FlowRecorder};
pub use pending::PendingRequests;

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::ErrorCode;
use crate::event::Event;
use crate::registry::{AgentHandle, Registry};

/// Capacity of the bus's internal dispatch queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;
/// How many recently seen broadcast `event_id`s are remembered, to
/// de-duplicate a broadcast a worker receives both directly and via a
/// peer's re-forward.
const BROADCAST_DEDUP_CAPACITY: usize = 4096;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BusError {
    #[error("bus has been stopped")]
    BusStopped,
    #[error("request {request_id} timed out")]
    Timeout { request_id: String },
    #[error("peer {peer} is gone")]
    PeerGone { peer: String },
}

impl BusError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::BusStopped => ErrorCode::BusStopped,
            Self::Timeout { .. } => ErrorCode::Timeout,
            Self::PeerGone { .. } => ErrorCode::PeerGone,
        }
    }
}

/// A small fixed-capacity seen-set, oldest-evicted, used to de-duplicate
/// broadcasts by `event_id`.
struct DedupCache {
    capacity: usize,
    order: VecDeque<String>,
    seen: HashSet<String>,
}

impl DedupCache {
    fn new(capacity: usize) -> Self {
        Self { capacity, order: VecDeque::with_capacity(capacity), seen: HashSet::with_capacity(capacity) }
    }

    /// Returns `true` if `id` had not been seen before (and is now
    /// recorded).
    fn insert(&mut self, id: &str) -> bool {
        if !self.seen.insert(id.to_owned()) {
            return false;
        }
        self.order.push_back(id.to_owned());
        if self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        true
    }
}

/// The event bus: enqueue, drain, deliver. One [`EventBus::run`] loop
/// should ever be active at a time per instance; the caller owns that
/// invariant (by spawning exactly one task).
pub struct EventBus {
    registry: Arc<Registry>,
    env_inbox: mpsc::Sender<Event>,
    bridge: Option<Arc<dyn ClusterBridge>>,
    queue_tx: mpsc::Sender<Event>,
    queue_rx: Mutex<Option<mpsc::Receiver<Event>>>,
    pending: PendingRequests,
    flow: FlowRecorder,
    paused: AtomicBool,
    resume_notify: Notify,
    stop_token: CancellationToken,
    last_activity: Mutex<Instant>,
    /// Half of `bus_idle_timeout`'s quarter — inboxes get this long to
    /// drain before the dispatcher gives up and drops (non-response) or
    /// blocks (response) per the runtime's drop policy.
    push_timeout: Duration,
    unknown_addressee_count: AtomicU64,
    dropped_count: AtomicU64,
    dedup: Mutex<DedupCache>,
}

impl EventBus {
    pub fn new(
        registry: Arc<Registry>,
        env_inbox: mpsc::Sender<Event>,
        bridge: Option<Arc<dyn ClusterBridge>>,
        bus_idle_timeout: Duration,
    ) -> Self {
        let (queue_tx, queue_rx) = mpsc::channel(DEFAULT_QUEUE_CAPACITY);
        Self {
            registry,
            env_inbox,
            bridge,
            queue_tx,
            queue_rx: Mutex::new(Some(queue_rx)),
            pending: PendingRequests::new(),
            flow: FlowRecorder::new(),
            paused: AtomicBool::new(false),
            resume_notify: Notify::new(),
            stop_token: CancellationToken::new(),
            last_activity: Mutex::new(Instant::now()),
            push_timeout: bus_idle_timeout / 4,
            unknown_addressee_count: AtomicU64::new(0),
            dropped_count: AtomicU64::new(0),
            dedup: Mutex::new(DedupCache::new(BROADCAST_DEDUP_CAPACITY)),
        }
    }

    pub fn flow_recorder(&self) -> &FlowRecorder {
        &self.flow
    }

    pub fn pending_requests(&self) -> &PendingRequests {
        &self.pending
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    pub fn is_stopped(&self) -> bool {
        self.stop_token.is_cancelled()
    }

    pub fn stop_token(&self) -> CancellationToken {
        self.stop_token.clone()
    }

    pub async fn last_activity(&self) -> Instant {
        *self.last_activity.lock().await
    }

    /// Reset the idle clock to now. Called by the environment driver on
    /// `resume()` so a long pause doesn't immediately read as bus idleness.
    pub async fn reset_idle_clock(&self) {
        self.touch_activity().await;
    }

    pub fn unknown_addressee_count(&self) -> u64 {
        self.unknown_addressee_count.load(Ordering::Relaxed)
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped_count.load(Ordering::Relaxed)
    }

    pub async fn register_agent(&self, handle: Arc<AgentHandle>) {
        self.registry.register(handle).await;
    }

    pub async fn unregister_agent(&self, agent_id: &str) {
        self.registry.unregister(agent_id).await;
    }

    /// Non-blocking enqueue. Fails only if the bus has been stopped;
    /// while paused, enqueues are still accepted, just not drained.
    pub async fn dispatch(&self, event: Event) -> Result<(), BusError> {
        if self.is_stopped() {
            return Err(BusError::BusStopped);
        }
        self.flow.record(&event).await;
        self.queue_tx.send(event).await.map_err(|_| BusError::BusStopped)
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::Release);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::Release);
        self.resume_notify.notify_waiters();
    }

    /// Idempotent: a second call is a no-op beyond re-cancelling an
    /// already-cancelled token.
    pub fn stop(&self) {
        self.stop_token.cancel();
        self.resume_notify.notify_waiters();
    }

    /// Dispatch `event`, then await the response correlated by its
    /// `event_id`, failing with `Timeout` if none arrives within
    /// `deadline`.
    pub async fn request(&self, event: Event, deadline: Duration) -> Result<Event, BusError> {
        let request_id = event.event_id.clone();
        let rx = self.pending.register(request_id.clone(), event.to_id.clone(), Instant::now() + deadline).await;
        self.dispatch(event).await?;
        match timeout(deadline, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) | Err(_) => Err(BusError::Timeout { request_id }),
        }
    }

    /// Addressee `ALL`: fan out to every locally registered agent, then
    /// (master only, via the bridge) RPC every worker so its locals get
    /// the same broadcast. De-duplicated by `event_id` so a broadcast a
    /// worker receives both directly and via re-forward is only delivered
    /// once.
    pub async fn on_broadcast(&self, event: Event) -> Result<(), ErrorCode> {
        if !self.dedup.lock().await.insert(&event.event_id) {
            debug!(event_id = %event.event_id, "duplicate broadcast, already delivered");
            return Ok(());
        }
        for handle in self.registry.all().await {
            self.push_to_handle(&handle, event.clone()).await;
        }
        if let Some(bridge) = &self.bridge {
            if bridge.is_master() {
                return bridge.broadcast_to_others(event).await;
            }
        }
        Ok(())
    }

    /// Fail a worker's pending requests and bus-hosted correlations when
    /// it's declared dead. Returns the number of requests failed.
    pub async fn fail_peer(&self, peer_id: &str) -> usize {
        self.pending.fail_addressed_to(peer_id).await
    }

    /// Periodic maintenance: sweep expired pending requests. Intended to
    /// be called on a fixed interval by a task the caller owns.
    pub async fn sweep_pending(&self) -> usize {
        self.pending.sweep_expired().await
    }

    /// The drain loop. Delivers queued events until [`Self::stop`]. Only
    /// one call should be outstanding at a time per bus instance.
    pub async fn run(&self) {
        let mut rx = match self.queue_rx.lock().await.take() {
            Some(rx) => rx,
            None => {
                warn!("bus run() called while another run() is already active");
                return;
            }
        };
        loop {
            tokio::select! {
                _ = self.stop_token.cancelled() => break,
                maybe_event = rx.recv() => {
                    let Some(event) = maybe_event else { break };
                    if self.is_paused() {
                        tokio::select! {
                            _ = self.resume_notify.notified() => {}
                            _ = self.stop_token.cancelled() => break,
                        }
                    }
                    if self.is_stopped() {
                        break;
                    }
                    self.deliver(event).await;
                }
            }
        }
        *self.queue_rx.lock().await = Some(rx);
    }

    async fn touch_activity(&self) {
        *self.last_activity.lock().await = Instant::now();
    }

    /// The five-step delivery algorithm.
    async fn deliver(&self, event: Event) {
        self.touch_activity().await;

        // Step 0, ahead of the five numbered steps below: a response event
        // resolves its correlated request instead of being delivered
        // anywhere else.
        if self.pending.resolve(&event).await {
            return;
        }

        if event.is_broadcast() {
            if let Err(err) = self.on_broadcast(event).await {
                warn!(%err, "broadcast fan-out to other nodes failed");
            }
        } else if event.is_for_env() {
            self.deliver_to_env(event).await;
        } else if let Some(handle) = self.registry.get(&event.to_id).await {
            self.push_to_handle(&handle, event).await;
        } else if let Some(bridge) = &self.bridge {
            let to_id = event.to_id.clone();
            if let Err(err) = bridge.forward(event).await {
                warn!(to_id, %err, "forward to remote peer failed");
            }
        } else {
            self.unknown_addressee_count.fetch_add(1, Ordering::Relaxed);
            warn!(to_id = %event.to_id, from_id = %event.from_id, "dispatch to unknown addressee");
        }
    }

    async fn deliver_to_env(&self, event: Event) {
        if self.env_inbox.try_send(event.clone()).is_ok() {
            return;
        }
        match timeout(self.push_timeout, self.env_inbox.send(event)).await {
            Ok(Ok(())) => {}
            _ => {
                self.dropped_count.fetch_add(1, Ordering::Relaxed);
                warn!("environment inbox saturated past push timeout, dropping event");
            }
        }
    }

    /// Push into a local agent's inbox. Non-blocking fast path first; on a
    /// full inbox, blocks up to `push_timeout`. Response events are never
    /// dropped — past the timeout, the push blocks until delivered rather
    /// than discarding it; non-response events are dropped with a warning.
    async fn push_to_handle(&self, handle: &Arc<AgentHandle>, event: Event) {
        if handle.try_push(event.clone()).is_ok() {
            return;
        }
        let is_response = event.kind.is_response();
        match handle.push_with_timeout(event, self.push_timeout).await {
            Ok(()) => {}
            Err(mpsc::error::SendTimeoutError::Closed(_)) => {}
            Err(mpsc::error::SendTimeoutError::Timeout(event)) => {
                if is_response {
                    warn!(to_id = %handle.agent_id, "response inbox saturated past push timeout, blocking until delivered");
                    let _ = handle.push_blocking(event).await;
                } else {
                    self.dropped_count.fetch_add(1, Ordering::Relaxed);
                    warn!(to_id = %handle.agent_id, "inbox full past push timeout, dropping event");
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
