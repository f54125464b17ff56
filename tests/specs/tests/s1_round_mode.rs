// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Round mode, single node: every `end_targets` agent must ack
//! `End(reason="round_done")` before the step counter advances, and the
//! run completes at `max_steps`.

use std::sync::Arc;
use std::time::Duration;

use agora::config::{Mode, SimulationConfig};
use agora::ctx::{AgentContext, EventHandler};
use agora::env::{EnvironmentDriver, RunOutcome, TerminationReason};
use agora::event::Event;
use agora::registry::AgentHandle;
use agora_specs::spawn_single_bus;

/// Acks every `Start` it receives with `End(reason="round_done")`.
struct AckOnStart;

#[async_trait::async_trait]
impl EventHandler for AckOnStart {
    async fn handle(&self, _event: Event, ctx: Arc<AgentContext>) {
        let _ = ctx.stop_self("round_done").await;
    }
}

async fn spawn_agent(registry: &Arc<agora::registry::Registry>, bus: &Arc<agora::bus::EventBus>, agent_id: &str) {
    let (inbox_tx, inbox_rx) = tokio::sync::mpsc::channel(16);
    let handle = Arc::new(AgentHandle::new(agent_id, "echo", inbox_tx));
    registry.register(Arc::clone(&handle)).await;
    let ctx = Arc::new(AgentContext::new(Arc::clone(bus), handle));
    ctx.register_handler("start", Arc::new(AckOnStart)).await;
    tokio::spawn(async move { ctx.run(inbox_rx).await });
}

#[tokio::test]
async fn three_agents_complete_three_rounds() -> anyhow::Result<()> {
    let harness = spawn_single_bus(Duration::from_secs(5));
    let agents = vec!["a1".to_string(), "a2".to_string(), "a3".to_string()];
    for agent_id in &agents {
        spawn_agent(&harness.registry, &harness.bus, agent_id).await;
    }

    let config = SimulationConfig { mode: Mode::Round, max_steps: 3, bus_idle_timeout: 5.0, ..Default::default() };
    let driver = EnvironmentDriver::new(Arc::clone(&harness.bus), config, harness.env_rx, agents.clone(), agents, None);

    let outcome = tokio::time::timeout(Duration::from_secs(10), driver.run()).await??;
    assert_eq!(
        outcome,
        RunOutcome {
            final_state: agora::env::SimulationState::Completed,
            steps_completed: 3,
            termination: TerminationReason::Completed,
        }
    );
    Ok(())
}
