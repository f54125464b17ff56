// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-endpoint circuit breaker. `CLOSED` lets requests through and counts
//! consecutive failures; `OPEN` rejects immediately until `recovery_timeout`
//! elapses; `HALF_OPEN` probes with a single in-flight request and closes
//! again after `half_open_success` consecutive successes.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::error::ErrorCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
    pub half_open_success: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self { failure_threshold: 5, recovery_timeout: Duration::from_secs(30), half_open_success: 2 }
    }
}

/// Circuit breaker guarding RPCs to a single remote endpoint.
///
/// `HALF_OPEN` admits exactly one probe at a time: a prior probe that
/// hasn't resolved yet keeps subsequent callers rejected, preventing a
/// thundering herd of probes from re-opening the circuit immediately.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: Mutex<CircuitState>,
    consecutive_failures: AtomicU32,
    half_open_successes: AtomicU32,
    opened_at: Mutex<Option<Instant>>,
    probe_in_flight: Mutex<bool>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: Mutex::new(CircuitState::Closed),
            consecutive_failures: AtomicU32::new(0),
            half_open_successes: AtomicU32::new(0),
            opened_at: Mutex::new(None),
            probe_in_flight: Mutex::new(false),
        }
    }

    pub fn state(&self) -> CircuitState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Called before issuing an RPC. Returns `Err(CircuitOpen)` if the
    /// circuit should reject immediately, flipping `OPEN -> HALF_OPEN` (and
    /// admitting this call as the probe) once `recovery_timeout` has
    /// elapsed.
    pub fn before_call(&self) -> Result<(), ErrorCode> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match *state {
            CircuitState::Closed => Ok(()),
            CircuitState::HalfOpen => {
                let mut in_flight = self.probe_in_flight.lock().unwrap_or_else(|e| e.into_inner());
                if *in_flight {
                    Err(ErrorCode::CircuitOpen)
                } else {
                    *in_flight = true;
                    Ok(())
                }
            }
            CircuitState::Open => {
                let opened_at = *self.opened_at.lock().unwrap_or_else(|e| e.into_inner());
                let recovered = opened_at.is_some_and(|t| t.elapsed() >= self.config.recovery_timeout);
                if recovered {
                    *state = CircuitState::HalfOpen;
                    self.half_open_successes.store(0, Ordering::SeqCst);
                    *self.probe_in_flight.lock().unwrap_or_else(|e| e.into_inner()) = true;
                    Ok(())
                } else {
                    Err(ErrorCode::CircuitOpen)
                }
            }
        }
    }

    /// Record the outcome of a call admitted by [`Self::before_call`].
    pub fn record_result(&self, success: bool) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if *state == CircuitState::HalfOpen {
            *self.probe_in_flight.lock().unwrap_or_else(|e| e.into_inner()) = false;
        }
        if success {
            self.consecutive_failures.store(0, Ordering::SeqCst);
            match *state {
                CircuitState::Closed => {}
                CircuitState::HalfOpen => {
                    let successes = self.half_open_successes.fetch_add(1, Ordering::SeqCst) + 1;
                    if successes >= self.config.half_open_success {
                        *state = CircuitState::Closed;
                    }
                }
                CircuitState::Open => {}
            }
        } else {
            match *state {
                CircuitState::Closed => {
                    let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
                    if failures >= self.config.failure_threshold {
                        *state = CircuitState::Open;
                        *self.opened_at.lock().unwrap_or_else(|e| e.into_inner()) = Some(Instant::now());
                    }
                }
                CircuitState::HalfOpen => {
                    *state = CircuitState::Open;
                    *self.opened_at.lock().unwrap_or_else(|e| e.into_inner()) = Some(Instant::now());
                }
                CircuitState::Open => {}
            }
        }
    }

    /// Run `f` through the breaker: reject fast if open, otherwise call and
    /// record the outcome. `idempotent` callers may be retried elsewhere
    /// with backoff; non-idempotent callers (e.g. `DataSet`) should not be.
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, ErrorCode>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        self.before_call()?;
        match f().await {
            Ok(value) => {
                self.record_result(true);
                Ok(value)
            }
            Err(_) => {
                self.record_result(false);
                Err(ErrorCode::Internal)
            }
        }
    }
}

#[cfg(test)]
#[path = "circuit_tests.rs"]
mod tests;
