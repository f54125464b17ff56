// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::SimulationState::*;
use super::*;
use yare::parameterized;

#[test]
fn starts_initialized() {
    assert_eq!(StateMachine::new().state(), Initialized);
}

#[parameterized(
    initialized_to_running = { Initialized, Running, true },
    initialized_to_paused = { Initialized, Paused, false },
    initialized_to_completed = { Initialized, Completed, false },
    initialized_to_terminated = { Initialized, Terminated, false },
    initialized_to_error = { Initialized, Error, true },
    initialized_to_initialized = { Initialized, Initialized, false },
    running_to_paused = { Running, Paused, true },
    running_to_running = { Running, Running, false },
    running_to_completed = { Running, Completed, true },
    running_to_terminated = { Running, Terminated, true },
    running_to_initialized = { Running, Initialized, false },
    running_to_error = { Running, Error, true },
    paused_to_running = { Paused, Running, true },
    paused_to_completed = { Paused, Completed, true },
    paused_to_terminated = { Paused, Terminated, true },
    paused_to_paused = { Paused, Paused, false },
    paused_to_initialized = { Paused, Initialized, false },
    paused_to_error = { Paused, Error, true },
    completed_to_running = { Completed, Running, false },
    completed_to_paused = { Completed, Paused, false },
    completed_to_terminated = { Completed, Terminated, false },
    completed_to_completed = { Completed, Completed, false },
    completed_to_error = { Completed, Error, true },
    terminated_to_running = { Terminated, Running, false },
    terminated_to_paused = { Terminated, Paused, false },
    terminated_to_completed = { Terminated, Completed, false },
    terminated_to_terminated = { Terminated, Terminated, false },
    terminated_to_error = { Terminated, Error, true },
    error_to_running = { Error, Running, false },
    error_to_paused = { Error, Paused, false },
    error_to_completed = { Error, Completed, false },
    error_to_terminated = { Error, Terminated, false },
    error_to_error = { Error, Error, true },
)]
fn transition_table(from: SimulationState, to: SimulationState, legal: bool) {
    assert_eq!(from.can_transition(to), legal);

    let mut fsm = StateMachine { state: from };
    let result = fsm.transition(to);
    assert_eq!(result.is_ok(), legal);
    if legal {
        assert_eq!(fsm.state(), to);
    } else {
        assert_eq!(fsm.state(), from, "illegal transition must not mutate state");
    }
}

#[test]
fn illegal_transition_reports_from_and_to() {
    let mut fsm = StateMachine::new();
    fsm.transition(Running).unwrap();
    fsm.transition(Completed).unwrap();
    let err = fsm.transition(Running).unwrap_err();
    assert_eq!(err, FsmError { from: Completed, to: Running });
}

#[test]
fn a_full_round_trip_reaches_completed() {
    let mut fsm = StateMachine::new();
    fsm.transition(Running).unwrap();
    fsm.transition(Paused).unwrap();
    fsm.transition(Running).unwrap();
    fsm.transition(Completed).unwrap();
    assert_eq!(fsm.state(), Completed);
}
