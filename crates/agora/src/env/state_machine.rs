// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The simulation lifecycle FSM. `transition` is the sole mutator;
//! illegal transitions are rejected rather than silently applied.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulationState {
    Initialized,
    Running,
    Paused,
    Completed,
    Terminated,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("cannot transition from {from:?} to {to:?}")]
pub struct FsmError {
    pub from: SimulationState,
    pub to: SimulationState,
}

impl SimulationState {
    /// Whether `to` is a legal transition from `self`.
    pub fn can_transition(&self, to: SimulationState) -> bool {
        use SimulationState::*;
        match (self, to) {
            (_, Error) => true,
            (Initialized, Running) => true,
            (Running, Paused) | (Paused, Running) => true,
            (Running | Paused, Completed) => true,
            (Running | Paused, Terminated) => true,
            _ => false,
        }
    }
}

/// Owns the current [`SimulationState`] and guards every mutation through
/// [`Self::transition`].
#[derive(Debug, Clone, Copy)]
pub struct StateMachine {
    state: SimulationState,
}

impl StateMachine {
    pub fn new() -> Self {
        Self { state: SimulationState::Initialized }
    }

    pub fn state(&self) -> SimulationState {
        self.state
    }

    pub fn transition(&mut self, to: SimulationState) -> Result<(), FsmError> {
        if !self.state.can_transition(to) {
            return Err(FsmError { from: self.state, to });
        }
        self.state = to;
        Ok(())
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "state_machine_tests.rs"]
mod tests;
