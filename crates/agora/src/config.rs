// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Node CLI surface and simulation configuration.
//!
//! [`Config`] is the `clap::Parser` struct parsed in `main`, with env-var
//! fallbacks via `#[arg(long, env = "...")]` on every flag.
//! [`SimulationConfig`] is the environment's `{mode, max_steps, interval,
//! ...}` record, loadable from the JSON file named by `--config` and
//! validated before the driver starts.

use std::collections::HashMap;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// The role a node plays in the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Role {
    /// Single-process simulation: no transport, no cluster control plane.
    Single,
    /// Master: owns the agent-location directory, the lock authority, and
    /// the authoritative environment state.
    Master,
    /// Worker: hosts a shard of agents, forwards non-local events to the
    /// master.
    Worker,
}

/// Scheduling mode for the environment driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Mode {
    Round,
    Tick,
}

/// Node CLI surface (§6 of the runtime's design).
#[derive(Debug, Clone, Parser)]
#[command(name = "agora", version, about = "Distributed agent execution runtime.")]
pub struct Config {
    /// Role this node plays in the cluster.
    #[arg(long, env = "AGORA_ROLE", value_enum, default_value_t = Role::Single)]
    pub role: Role,

    /// This node's own identifier. Defaults to a fresh UUID if unset.
    #[arg(long, env = "AGORA_NODE_ID")]
    pub node_id: Option<String>,

    /// Master's address, required when `--role worker`.
    #[arg(long, env = "AGORA_MASTER_ADDRESS")]
    pub master_address: Option<String>,

    /// Master's RPC port, required when `--role worker`.
    #[arg(long, env = "AGORA_MASTER_PORT")]
    pub master_port: Option<u16>,

    /// Address this node's own RPC server listens on.
    #[arg(long, env = "AGORA_LISTEN_ADDRESS", default_value = "0.0.0.0")]
    pub listen_address: String,

    /// Port this node's own RPC server listens on.
    #[arg(long, env = "AGORA_LISTEN_PORT")]
    pub listen_port: Option<u16>,

    /// Number of workers the master should wait for before allocating
    /// agents, required when `--role master`.
    #[arg(long, env = "AGORA_EXPECTED_WORKERS")]
    pub expected_workers: Option<u32>,

    /// Seconds between worker heartbeats.
    #[arg(long, env = "AGORA_HEARTBEAT_INTERVAL", default_value_t = 300)]
    pub heartbeat_interval: u64,

    /// Seconds of missed heartbeats before a worker is declared dead.
    /// Defaults to `5 * heartbeat_interval` when unset.
    #[arg(long, env = "AGORA_WORKER_TIMEOUT")]
    pub worker_timeout: Option<u64>,

    /// Path to a `SimulationConfig` JSON file.
    #[arg(long, env = "AGORA_CONFIG")]
    pub config: Option<PathBuf>,

    /// Scenario name, passed through to the scenario-authoring collaborator
    /// (out of scope here — recorded for logging only).
    #[arg(long, env = "AGORA_SCENARIO")]
    pub scenario: Option<String>,
}

/// Errors raised validating [`Config`] before the driver starts. Maps to
/// exit code `2` in `main`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("--role worker requires --master-address")]
    MissingMasterAddress,
    #[error("--role worker requires --master-port")]
    MissingMasterPort,
    #[error("--role master requires --expected-workers")]
    MissingExpectedWorkers,
    #[error("failed to read config file {path}: {source}")]
    ReadFile { path: PathBuf, #[source] source: std::io::Error },
    #[error("failed to parse config file {path}: {source}")]
    ParseFile { path: PathBuf, #[source] source: serde_json::Error },
}

impl Config {
    /// Validate role-specific requirements before `run()` is called.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.role {
            Role::Worker => {
                if self.master_address.is_none() {
                    return Err(ConfigError::MissingMasterAddress);
                }
                if self.master_port.is_none() {
                    return Err(ConfigError::MissingMasterPort);
                }
            }
            Role::Master => {
                if self.expected_workers.is_none() {
                    return Err(ConfigError::MissingExpectedWorkers);
                }
            }
            Role::Single => {}
        }
        Ok(())
    }

    /// The effective worker-death timeout: the explicit override, or
    /// `5 * heartbeat_interval` per the runtime's liveness design.
    pub fn effective_worker_timeout(&self) -> u64 {
        self.worker_timeout.unwrap_or(self.heartbeat_interval * 5)
    }

    /// Resolve the node ID, generating one if the caller didn't supply one.
    pub fn resolve_node_id(&self) -> String {
        self.node_id.clone().unwrap_or_else(crate::clock::new_id)
    }

    /// Load the [`SimulationConfig`] named by `--config`, or fall back to
    /// defaults if unset.
    pub fn load_simulation_config(&self) -> Result<SimulationConfig, ConfigError> {
        let Some(path) = &self.config else {
            return Ok(SimulationConfig::default());
        };
        let contents = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::ReadFile { path: path.clone(), source })?;
        serde_json::from_str(&contents).map_err(|source| ConfigError::ParseFile { path: path.clone(), source })
    }
}

/// The environment's simulation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub mode: Mode,
    pub max_steps: u64,
    /// Tick interval in seconds, used only when `mode == Tick`.
    pub interval: f64,
    pub bus_idle_timeout: f64,
    pub export_training_data: bool,
    pub export_event_data: bool,
    pub collection_interval: f64,
    pub extra: HashMap<String, Value>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            mode: Mode::Round,
            max_steps: 100,
            interval: 1.0,
            bus_idle_timeout: 30.0,
            export_training_data: false,
            export_event_data: false,
            collection_interval: 10.0,
            extra: HashMap::new(),
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
