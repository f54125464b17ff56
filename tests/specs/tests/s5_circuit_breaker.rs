// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Circuit breaker, exercised through the real client against a dead
//! endpoint: `failure_threshold` consecutive RPC failures open the
//! circuit, after which further calls fail fast with `CircuitOpen`
//! instead of attempting a new connection, and a later call past
//! `recovery_timeout` is allowed through as a half-open probe.

use std::sync::Arc;
use std::time::Duration;

use agora::error::ErrorCode;
use agora::event::{Event, EventKind};
use agora::transport::{AgoraClient, CircuitBreakerConfig, ConnectionPool};

fn dead_client(config: CircuitBreakerConfig) -> AgoraClient {
    // Nothing listens on this loopback port; every dial fails.
    let pool = Arc::new(ConnectionPool::new(Duration::from_secs(60)));
    AgoraClient::new("http://127.0.0.1:1", pool, config)
}

fn ping() -> Event {
    Event::new("tester", "peer", EventKind::Custom { name: "ping".into(), payload: serde_json::Value::Null })
}

#[tokio::test]
async fn opens_after_threshold_and_fails_fast() {
    let client = dead_client(CircuitBreakerConfig {
        failure_threshold: 5,
        recovery_timeout: Duration::from_secs(30),
        half_open_success: 2,
    });

    for _ in 0..5 {
        let result = client.dispatch_event(&ping()).await;
        assert_eq!(result, Err(ErrorCode::PeerGone), "dials to a dead peer fail with PeerGone, not CircuitOpen, until the breaker trips");
    }

    let sixth = client.dispatch_event(&ping()).await;
    assert_eq!(sixth, Err(ErrorCode::CircuitOpen), "the 6th call should fail fast without attempting a connection");
}

#[tokio::test]
async fn half_open_probe_is_allowed_after_recovery_timeout() {
    let client = dead_client(CircuitBreakerConfig {
        failure_threshold: 2,
        recovery_timeout: Duration::from_millis(50),
        half_open_success: 1,
    });

    let _ = client.dispatch_event(&ping()).await;
    let _ = client.dispatch_event(&ping()).await;
    assert_eq!(client.dispatch_event(&ping()).await, Err(ErrorCode::CircuitOpen));

    tokio::time::sleep(Duration::from_millis(60)).await;

    // Past recovery_timeout the breaker lets one probe through; against
    // a still-dead peer it fails with PeerGone again (not CircuitOpen),
    // proving the call was actually attempted.
    let probe = client.dispatch_event(&ping()).await;
    assert_eq!(probe, Err(ErrorCode::PeerGone));
}
