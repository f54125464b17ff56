// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Monotonic step/tick counters, wall timestamps for logs, and globally
//! unique event/request IDs.
//!
//! A single [`Clock`] is shared (via `Arc`) between the bus, the
//! environment driver, and the metrics scheduler so that pause/resume
//! accounting stays consistent: wall-clock reads always go through
//! [`Clock::now_ms`], and paused duration is excluded from every interval
//! measured against [`Clock::elapsed_since`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use uuid::Uuid;

/// Generates a fresh globally-unique ID for events, requests, and locks.
///
/// IDs are opaque strings per the data model; UUIDv4 satisfies uniqueness
/// without requiring coordination across nodes.
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Current wall-clock time in milliseconds since the Unix epoch, used for
/// log timestamps and event envelopes.
pub fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// Tracks the simulation's step/tick counter and pause accounting.
///
/// While paused, [`Clock::elapsed_since`] subtracts the paused interval so
/// that `bus_idle_timeout` and tick `interval` measured across a pause are
/// not tripped by wall-clock time the simulation was not actually running
/// (testable property: "if simulation time is paused for `d` seconds,
/// `bus_idle_timeout` measured between two events straddling that pause is
/// greater by at least `d`").
pub struct Clock {
    step: AtomicU64,
    paused_at: Mutex<Option<Instant>>,
    total_paused: Mutex<Duration>,
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock {
    pub fn new() -> Self {
        Self { step: AtomicU64::new(0), paused_at: Mutex::new(None), total_paused: Mutex::new(Duration::ZERO) }
    }

    /// Current step/tick counter.
    pub fn step(&self) -> u64 {
        self.step.load(Ordering::SeqCst)
    }

    /// Advance the step counter by one and return the new value.
    pub fn advance(&self) -> u64 {
        self.step.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Mark the clock as paused. Idempotent — a second call while already
    /// paused is a no-op.
    pub fn pause(&self) {
        let mut paused_at = self.paused_at.lock().unwrap_or_else(|e| e.into_inner());
        if paused_at.is_none() {
            *paused_at = Some(Instant::now());
        }
    }

    /// Resume after a pause, folding the paused interval into the running
    /// total excluded from future elapsed-time calculations. Idempotent.
    pub fn resume(&self) {
        let mut paused_at = self.paused_at.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(since) = paused_at.take() {
            let mut total = self.total_paused.lock().unwrap_or_else(|e| e.into_inner());
            *total += since.elapsed();
        }
    }

    /// Total wall-clock duration the clock has spent paused so far,
    /// including the in-progress interval if currently paused.
    ///
    /// Callers measuring an interval against a deadline (bus idle timeout,
    /// tick interval) snapshot this value at the start of the interval and
    /// subtract the delta from their raw elapsed time, so time spent paused
    /// never counts against the deadline.
    pub fn total_paused(&self) -> Duration {
        let mut paused = *self.total_paused.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(since) = *self.paused_at.lock().unwrap_or_else(|e| e.into_inner()) {
            paused += since.elapsed();
        }
        paused
    }

    /// Elapsed wall-clock duration since `start`, excluding any paused time
    /// accumulated since `baseline` (a prior [`Clock::total_paused`]
    /// reading taken at `start`).
    pub fn elapsed_excluding_pauses(&self, start: Instant, baseline: Duration) -> Duration {
        let raw = start.elapsed();
        let paused_delta = self.total_paused().saturating_sub(baseline);
        raw.saturating_sub(paused_delta)
    }
}

#[cfg(test)]
#[path = "clock_tests.rs"]
mod tests;
