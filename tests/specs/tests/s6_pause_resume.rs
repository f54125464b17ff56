// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pause/resume: while paused, the bus stops delivering even
//! already-queued events, so a round cannot silently advance during the
//! pause window; resuming lets it proceed exactly as if no pause had
//! happened.

use std::sync::Arc;
use std::time::Duration;

use agora::config::{Mode, SimulationConfig};
use agora::ctx::{AgentContext, EventHandler};
use agora::env::{EnvironmentDriver, RunOutcome, SimulationState, TerminationReason};
use agora::event::Event;
use agora::registry::AgentHandle;
use agora_specs::spawn_single_bus;

const ACK_DELAY: Duration = Duration::from_millis(150);

/// Sleeps past the test's pause window before acking, so the pause is
/// guaranteed to land before the round-done event is even emitted.
struct HoldThenAck;

#[async_trait::async_trait]
impl EventHandler for HoldThenAck {
    async fn handle(&self, _event: Event, ctx: Arc<AgentContext>) {
        tokio::time::sleep(ACK_DELAY).await;
        let _ = ctx.emit(Event::new(ctx.agent_id().to_string(), agora::event::ENV, agora::event::EventKind::End { reason: "round_done".into() }))
            .await;
    }
}

#[tokio::test]
async fn round_does_not_advance_while_paused() -> anyhow::Result<()> {
    let harness = spawn_single_bus(Duration::from_secs(5));

    let (inbox_tx, inbox_rx) = tokio::sync::mpsc::channel(16);
    let handle = Arc::new(AgentHandle::new("a1", "holder", inbox_tx));
    harness.registry.register(Arc::clone(&handle)).await;
    let ctx = Arc::new(AgentContext::new(Arc::clone(&harness.bus), handle));
    ctx.register_handler("start", Arc::new(HoldThenAck)).await;
    tokio::spawn(async move { ctx.run(inbox_rx).await });

    let config = SimulationConfig { mode: Mode::Round, max_steps: 2, bus_idle_timeout: 5.0, ..Default::default() };
    let driver = Arc::new(EnvironmentDriver::new(
        Arc::clone(&harness.bus),
        config,
        harness.env_rx,
        vec!["a1".to_string()],
        vec!["a1".to_string()],
        None,
    ));

    let driver_for_run = Arc::clone(&driver);
    let run_handle = tokio::spawn(async move { driver_for_run.run().await });

    // Well before the agent's own ACK_DELAY elapses, so the round cannot
    // have completed yet no matter how this task got scheduled.
    tokio::time::sleep(Duration::from_millis(30)).await;
    driver.pause().await?;
    assert_eq!(driver.state().await, SimulationState::Paused);

    // Long enough for the agent to have emitted its ack, which must sit
    // undelivered in the paused bus rather than advancing the round.
    tokio::time::sleep(ACK_DELAY + Duration::from_millis(200)).await;
    assert_eq!(driver.step(), 0, "a paused bus must not deliver the queued round-done ack");

    driver.resume().await?;
    assert_eq!(driver.state().await, SimulationState::Running);

    let outcome = tokio::time::timeout(Duration::from_secs(5), run_handle).await???;
    assert_eq!(
        outcome,
        RunOutcome { final_state: SimulationState::Completed, steps_completed: 2, termination: TerminationReason::Completed }
    );
    Ok(())
}
