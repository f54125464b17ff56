// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Distributed shared-state race: two simulated workers each run 100
//! `acquire -> read -> increment -> write -> release` cycles against the
//! same master-held counter over real gRPC. No increment may be lost —
//! the bus-level `DataGet`/`DataSet` path (lock-free reads, a write only
//! briefly locked around its own insert) cannot make this guarantee, so
//! this exercises the fenced lock + data RPC pair instead.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use agora::cluster::Master;
use agora::lock::distributed::LockTransport;
use agora::registry::Registry;
use agora_specs::{client_for, spawn_grpc_server};
use serde_json::json;
use tokio::sync::mpsc;

const ITERATIONS_PER_WORKER: i64 = 100;
const KEY: &str = "counter";

async fn increment_loop(addr: std::net::SocketAddr, requester_id: &str) -> anyhow::Result<()> {
    let client = client_for(addr);
    for _ in 0..ITERATIONS_PER_WORKER {
        let lease = client
            .lock_request(KEY, requester_id, Duration::from_secs(5), Duration::from_secs(5))
            .await
            .map_err(|e| anyhow::anyhow!("{e}"))?;
        let current = client
            .data_get("agent", "env", KEY, Some(&json!(0)))
            .await
            .map_err(|e| anyhow::anyhow!("{e}"))?
            .and_then(|v| v.as_i64())
            .unwrap_or(0);
        client
            .data_set("agent", "env", KEY, &json!(current + 1), lease.fence_token)
            .await
            .map_err(|e| anyhow::anyhow!("{e}"))?;
        client.lock_release(KEY, requester_id, lease.fence_token).await;
    }
    Ok(())
}

#[tokio::test]
async fn two_hundred_concurrent_increments_lose_none() -> anyhow::Result<()> {
    let (env_tx, _env_rx) = mpsc::channel(1);
    let master = Arc::new(Master::new(Arc::new(Registry::new()), env_tx, Duration::from_secs(300), None));
    let addr = spawn_grpc_server(Arc::clone(&master)).await?;

    let (r1, r2) = tokio::join!(increment_loop(addr, "w1-a1"), increment_loop(addr, "w2-a2"));
    r1?;
    r2?;

    let client = client_for(addr);
    let final_value =
        client.data_get("agent", "env", KEY, Some(&json!(0))).await.map_err(|e| anyhow::anyhow!("{e}"))?.and_then(|v| v.as_i64());
    assert_eq!(final_value, Some(2 * ITERATIONS_PER_WORKER));
    Ok(())
}

/// Sanity check that the directory entries two different workers would
/// have held for this key's agents don't interfere with fencing, which is
/// keyed purely by `key`, not by the caller.
#[tokio::test]
async fn directory_snapshot_is_unaffected_by_lock_contention() -> anyhow::Result<()> {
    let (env_tx, _env_rx) = mpsc::channel(1);
    let master = Arc::new(Master::new(Arc::new(Registry::new()), env_tx, Duration::from_secs(300), None));
    master.directory().assign("a1", "w1").await;
    master.directory().assign("a2", "w2").await;
    let snapshot = master.directory().snapshot().await;
    assert_eq!(snapshot, HashMap::from([("a1".to_string(), "w1".to_string()), ("a2".to_string(), "w2".to_string())]));
    Ok(())
}
