// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The metrics scheduler: periodic, cancellable sampling of named metrics
//! over environment keys and agent-typed fields, aggregated and stored as
//! bounded time series. Mirrors the heartbeat tracker's periodic-interval
//! shape (`cluster::heartbeat`) but samples values instead of classifying
//! liveness, and fans a copy of each sample out to subscribers the way the
//! bus's [`crate::bus::flow::FlowRecorder`] accumulates a record stream.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{broadcast, RwLock};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// A value a metric can be computed over: either a read of shared
/// environment state, or a fan-out field read across every agent of a
/// given type (or every agent, if `agent_type` is `None`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MetricSource {
    EnvKey(String),
    AgentField { agent_type: Option<String>, field: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Aggregator {
    Sum,
    Avg,
    Count,
    Histogram,
    Categorical,
}

impl Aggregator {
    /// Reduce a batch of gathered values (already stripped of the sources
    /// that errored or timed out) into one reported value.
    fn apply(self, values: &[Value]) -> Value {
        match self {
            Aggregator::Count => Value::from(values.len()),
            Aggregator::Sum => Value::from(values.iter().filter_map(Value::as_f64).sum::<f64>()),
            Aggregator::Avg => {
                let numeric: Vec<f64> = values.iter().filter_map(Value::as_f64).collect();
                if numeric.is_empty() {
                    Value::Null
                } else {
                    Value::from(numeric.iter().sum::<f64>() / numeric.len() as f64)
                }
            }
            Aggregator::Histogram | Aggregator::Categorical => {
                let mut tally: HashMap<String, u64> = HashMap::new();
                for value in values {
                    let bucket = match value {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    *tally.entry(bucket).or_insert(0) += 1;
                }
                serde_json::to_value(tally).unwrap_or(Value::Null)
            }
        }
    }
}

/// A registered metric: what to sample, and how to collapse the batch into
/// one reported value each collection interval.
#[derive(Debug, Clone)]
pub struct MetricDefinition {
    pub name: String,
    pub sources: Vec<MetricSource>,
    pub aggregator: Aggregator,
}

/// One aggregated reading, timestamped by simulation step.
#[derive(Debug, Clone, Serialize)]
pub struct MetricSample {
    pub name: String,
    pub step: u64,
    pub value: Value,
}

/// What the scheduler reads through to gather source values. The
/// environment driver and (on the master) the cluster directory both
/// implement this; kept as a trait so the scheduler has no direct
/// dependency on either.
#[async_trait::async_trait]
pub trait MetricsBackend: Send + Sync {
    async fn read_env(&self, key: &str) -> Option<Value>;

    /// Read `field` from every agent matching `agent_type` (or every agent
    /// if `None`), fanned out in parallel. A per-agent read that errors or
    /// times out is simply absent from the returned vec.
    async fn read_agent_field(&self, agent_type: Option<&str>, field: &str) -> Vec<Value>;
}

const DEFAULT_SOURCE_TIMEOUT: Duration = Duration::from_secs(2);
const DEFAULT_SERIES_CAPACITY: usize = 1_000;

/// Periodically samples every registered [`MetricDefinition`], fails soft
/// per metric, and keeps a bounded time series per name.
pub struct MetricsScheduler {
    backend: std::sync::Arc<dyn MetricsBackend>,
    definitions: RwLock<Vec<MetricDefinition>>,
    series: RwLock<HashMap<String, VecDeque<MetricSample>>>,
    series_capacity: usize,
    source_timeout: Duration,
    subscribers: broadcast::Sender<MetricSample>,
}

impl MetricsScheduler {
    pub fn new(backend: std::sync::Arc<dyn MetricsBackend>) -> Self {
        let (subscribers, _) = broadcast::channel(256);
        Self {
            backend,
            definitions: RwLock::new(Vec::new()),
            series: RwLock::new(HashMap::new()),
            series_capacity: DEFAULT_SERIES_CAPACITY,
            source_timeout: DEFAULT_SOURCE_TIMEOUT,
            subscribers,
        }
    }

    pub fn with_source_timeout(mut self, timeout: Duration) -> Self {
        self.source_timeout = timeout;
        self
    }

    pub async fn register(&self, definition: MetricDefinition) {
        self.definitions.write().await.push(definition);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MetricSample> {
        self.subscribers.subscribe()
    }

    pub async fn history(&self, name: &str) -> Vec<MetricSample> {
        self.series.read().await.get(name).map(|series| series.iter().cloned().collect()).unwrap_or_default()
    }

    /// Run the collection loop until `shutdown` is cancelled. `interval`
    /// comes from `SimulationConfig::collection_interval`; `current_step`
    /// is polled fresh on every tick so samples carry the step they were
    /// actually taken at, not the step at scheduler construction.
    pub async fn run(&self, interval: Duration, current_step: impl Fn() -> u64, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("metrics scheduler stopping");
                    return;
                }
                _ = ticker.tick() => {
                    self.collect_once(current_step()).await;
                }
            }
        }
    }

    /// Sample every registered metric once. Exposed directly so callers
    /// (and tests) can force a collection without waiting on the interval.
    pub async fn collect_once(&self, step: u64) {
        let definitions = self.definitions.read().await.clone();
        for definition in definitions {
            match self.sample(&definition).await {
                Ok(value) => {
                    let sample = MetricSample { name: definition.name.clone(), step, value };
                    self.store(sample.clone()).await;
                    let _ = self.subscribers.send(sample);
                }
                Err(err) => {
                    warn!(metric = %definition.name, %err, "metric sample failed, skipping");
                }
            }
        }
    }

    async fn sample(&self, definition: &MetricDefinition) -> Result<Value, String> {
        let mut gathered = Vec::new();
        for source in &definition.sources {
            match source {
                MetricSource::EnvKey(key) => {
                    match timeout(self.source_timeout, self.backend.read_env(key)).await {
                        Ok(Some(value)) => gathered.push(value),
                        Ok(None) => {}
                        Err(_) => return Err(format!("env read of {key} timed out")),
                    }
                }
                MetricSource::AgentField { agent_type, field } => {
                    match timeout(self.source_timeout, self.backend.read_agent_field(agent_type.as_deref(), field))
                        .await
                    {
                        Ok(values) => gathered.extend(values),
                        Err(_) => return Err(format!("agent field read of {field} timed out")),
                    }
                }
            }
        }
        Ok(definition.aggregator.apply(&gathered))
    }

    async fn store(&self, sample: MetricSample) {
        let mut series = self.series.write().await;
        let entry = series.entry(sample.name.clone()).or_default();
        entry.push_back(sample);
        while entry.len() > self.series_capacity {
            entry.pop_front();
        }
    }
}

#[cfg(test)]
#[path = "metrics_tests.rs"]
mod tests;
