// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker failure: once a worker stops heartbeating past its dead
//! threshold, the master's reaper purges its directory entries, and any
//! further event addressed to an agent it hosted fails fast with
//! `PeerGone` instead of hanging.

use std::sync::Arc;
use std::time::Duration;

use agora::cluster::{Master, WorkerStatus};
use agora::error::ErrorCode;
use agora::event::{Event, EventKind};
use agora::registry::Registry;
use agora::transport::ClusterHandler;
use agora_specs::{spawn_grpc_server, StubWorkerHandler};
use tokio::sync::mpsc;

/// Short enough that a worker is declared dead within this test's
/// lifetime; `HeartbeatTracker` runs on real wall-clock time, not a
/// mockable one, so this needs a real (if brief) sleep.
const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(20);

#[tokio::test]
async fn dead_workers_orphan_their_agents_and_stop_routing() -> anyhow::Result<()> {
    let (env_tx, _env_rx) = mpsc::channel(1);
    let master = Arc::new(Master::new(Arc::new(Registry::new()), env_tx, HEARTBEAT_INTERVAL, None));

    let w1_addr = spawn_grpc_server(Arc::new(StubWorkerHandler)).await?;
    let w2_addr = spawn_grpc_server(Arc::new(StubWorkerHandler)).await?;
    master.register_worker("w1".into(), format!("http://{w1_addr}"), 10).await?;
    master.register_worker("w2".into(), format!("http://{w2_addr}"), 10).await?;
    master.directory().assign("a1", "w1").await;
    master.directory().assign("a2", "w2").await;

    // a2, hosted on w2, is still reachable while w2 is alive.
    let ping = Event::new("tester", "a2", EventKind::Custom { name: "ping".into(), payload: serde_json::Value::Null });
    master.dispatch_event(ping.clone()).await?;

    // Only w1 keeps heartbeating; w2 goes silent and ages past `dead_after`
    // (5 * HEARTBEAT_INTERVAL by default).
    for _ in 0..10 {
        tokio::time::sleep(HEARTBEAT_INTERVAL).await;
        master.heartbeat("w1".into(), 0, 1).await?;
    }

    assert_eq!(master.worker_status("w2").await, Some(WorkerStatus::Dead));
    let orphaned = master.reap_dead_workers().await;
    assert_eq!(orphaned, vec!["a2".to_string()]);
    assert_eq!(master.worker_status("w2").await, None);

    let result = master.dispatch_event(ping).await;
    assert_eq!(result, Err(ErrorCode::PeerGone));

    // w1's agent is unaffected.
    assert_eq!(master.directory().lookup("a1").await, Some("w1".to_string()));
    Ok(())
}
