// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tick mode: the driver advances on a fixed interval regardless of
//! agent activity. A silent agent that never acks anything must not trip
//! the idle-timeout livelock guard as long as `bus_idle_timeout` comfortably
//! exceeds the tick `interval`.

use std::time::Duration;

use agora::config::{Mode, SimulationConfig};
use agora::env::{EnvironmentDriver, RunOutcome, SimulationState, TerminationReason};
use agora_specs::spawn_single_bus;

#[tokio::test]
async fn silent_agent_does_not_trip_the_idle_timeout() -> anyhow::Result<()> {
    let harness = spawn_single_bus(Duration::from_secs(2));

    let config = SimulationConfig {
        mode: Mode::Tick,
        max_steps: 3,
        interval: 0.05,
        bus_idle_timeout: 2.0,
        ..Default::default()
    };
    let driver = EnvironmentDriver::new(std::sync::Arc::clone(&harness.bus), config, harness.env_rx, vec![], vec![], None);

    let outcome = tokio::time::timeout(Duration::from_secs(5), driver.run()).await??;
    assert_eq!(
        outcome,
        RunOutcome { final_state: SimulationState::Completed, steps_completed: 3, termination: TerminationReason::Completed }
    );
    Ok(())
}
