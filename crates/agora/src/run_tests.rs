// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use super::*;
use crate::config::Role;

fn base_config(role: Role) -> Config {
    Config {
        role,
        node_id: Some("test-node".into()),
        master_address: None,
        master_port: None,
        listen_address: "127.0.0.1".into(),
        listen_port: None,
        expected_workers: None,
        heartbeat_interval: 300,
        worker_timeout: None,
        config: None,
        scenario: None,
    }
}

#[test]
fn cluster_join_failure_maps_to_exit_code_three() {
    let outcome = NodeOutcome::cluster_join_failure();
    assert_eq!(outcome.exit_code, 3);
    assert!(outcome.simulation.is_none());
}

#[tokio::test]
async fn prepare_worker_without_master_address_is_a_fatal_config_error() {
    let config = base_config(Role::Worker);
    let result = prepare(config).await;
    assert!(result.is_err(), "missing --master-address should fail prepare() itself, not return an orderly NodeOutcome");
}

#[tokio::test]
async fn prepare_master_without_listen_port_is_a_fatal_config_error() {
    let mut config = base_config(Role::Master);
    config.master_address = None;
    let result = prepare(config).await;
    assert!(result.is_err(), "missing --listen-port should fail prepare() itself");
}

#[tokio::test]
async fn prepare_single_assembles_a_driver_and_an_uncancelled_shutdown_token() {
    let config = base_config(Role::Single);
    let prepared = prepare(config).await.unwrap().unwrap();
    let token = prepared.shutdown_token();
    assert!(!token.is_cancelled());
    match prepared {
        PreparedNode::Single { .. } => {}
        _ => panic!("expected PreparedNode::Single"),
    }
}

#[tokio::test]
async fn single_node_run_stops_promptly_once_shutdown_is_cancelled() {
    let mut config = base_config(Role::Single);
    config.config = None;
    let prepared = prepare(config).await.unwrap().unwrap();
    let shutdown = prepared.shutdown_token();
    shutdown.cancel();

    let outcome = tokio::time::timeout(Duration::from_secs(10), prepared.run()).await.unwrap().unwrap();
    assert_eq!(outcome.exit_code, 0);
    assert!(outcome.simulation.is_some());
}

#[test]
fn scenario_targets_reads_string_arrays_out_of_the_extra_bag() {
    let mut simulation_config = SimulationConfig::default();
    simulation_config.extra.insert("start_targets".into(), serde_json::json!(["seed_agent"]));
    simulation_config.extra.insert("end_targets".into(), serde_json::json!(["seed_agent", "other"]));

    let (start, end) = scenario_targets(&simulation_config);
    assert_eq!(start, vec!["seed_agent".to_string()]);
    assert_eq!(end, vec!["seed_agent".to_string(), "other".to_string()]);
}

#[test]
fn scenario_targets_defaults_to_empty_when_extra_is_unset() {
    let simulation_config = SimulationConfig::default();
    let (start, end) = scenario_targets(&simulation_config);
    assert!(start.is_empty());
    assert!(end.is_empty());
}
