// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn base_config(role: Role) -> Config {
    Config {
        role,
        node_id: None,
        master_address: None,
        master_port: None,
        listen_address: "0.0.0.0".into(),
        listen_port: None,
        expected_workers: None,
        heartbeat_interval: 300,
        worker_timeout: None,
        config: None,
        scenario: None,
    }
}

#[test]
fn single_role_needs_no_extra_flags() {
    assert!(base_config(Role::Single).validate().is_ok());
}

#[test]
fn worker_role_requires_master_address_and_port() {
    let mut config = base_config(Role::Worker);
    assert!(matches!(config.validate(), Err(ConfigError::MissingMasterAddress)));

    config.master_address = Some("10.0.0.1".into());
    assert!(matches!(config.validate(), Err(ConfigError::MissingMasterPort)));

    config.master_port = Some(7000);
    assert!(config.validate().is_ok());
}

#[test]
fn master_role_requires_expected_workers() {
    let mut config = base_config(Role::Master);
    assert!(matches!(config.validate(), Err(ConfigError::MissingExpectedWorkers)));
    config.expected_workers = Some(2);
    assert!(config.validate().is_ok());
}

#[test]
fn effective_worker_timeout_defaults_to_five_heartbeats() {
    let config = base_config(Role::Single);
    assert_eq!(config.effective_worker_timeout(), 1500);
}

#[test]
fn effective_worker_timeout_honors_explicit_override() {
    let mut config = base_config(Role::Single);
    config.worker_timeout = Some(42);
    assert_eq!(config.effective_worker_timeout(), 42);
}

#[test]
fn missing_config_file_falls_back_to_defaults() {
    let config = base_config(Role::Single);
    let sim = config.load_simulation_config().expect("default config");
    assert_eq!(sim.mode, Mode::Round);
    assert_eq!(sim.max_steps, 100);
}

#[test]
fn loads_simulation_config_from_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("sim.json");
    std::fs::write(&path, r#"{"mode": "TICK", "max_steps": 10, "interval": 1.0, "bus_idle_timeout": 2.0}"#)
        .expect("write");

    let mut config = base_config(Role::Single);
    config.config = Some(path);
    let sim = config.load_simulation_config().expect("parsed config");
    assert_eq!(sim.mode, Mode::Tick);
    assert_eq!(sim.max_steps, 10);
    assert!((sim.interval - 1.0).abs() < f64::EPSILON);
}

#[test]
fn resolve_node_id_generates_when_unset() {
    let config = base_config(Role::Single);
    assert!(!config.resolve_node_id().is_empty());
}
