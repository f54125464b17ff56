// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent placement: build a weighted communication graph, detect
//! communities via label propagation, then greedily assign each community
//! to a worker by descending weight, respecting capacity and tie-breaking
//! on type diversity.

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// One agent's outgoing communication edges, used to build the placement
/// graph. `edges` need not be symmetric; the graph is treated as
/// undirected by summing both directions' weights.
#[derive(Debug, Clone)]
pub struct AgentNode {
    pub id: String,
    pub agent_type: String,
    pub edges: Vec<(String, f64)>,
}

#[derive(Debug, Clone)]
pub struct WorkerCapacity {
    pub worker_id: String,
    pub capacity: u32,
    pub current_load: u32,
}

impl WorkerCapacity {
    fn remaining(&self) -> u32 {
        self.capacity.saturating_sub(self.current_load)
    }
}

/// Run label propagation to partition `agents` into communities.
///
/// Each agent starts in its own label. On each pass (in an RNG-shuffled
/// order), an agent adopts the label with the greatest total incident
/// edge weight among its neighbors; ties break toward the numerically
/// smallest label so the result is deterministic given `seed`. Stops
/// early once no agent changes label in a full pass, or after
/// `max_iterations`.
pub fn label_propagation(agents: &[AgentNode], seed: u64, max_iterations: usize) -> HashMap<String, u64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut label: HashMap<String, u64> =
        agents.iter().enumerate().map(|(i, a)| (a.id.clone(), i as u64)).collect();

    let mut adjacency: HashMap<&str, Vec<(&str, f64)>> = HashMap::new();
    for agent in agents {
        for (target, weight) in &agent.edges {
            adjacency.entry(agent.id.as_str()).or_default().push((target.as_str(), *weight));
            adjacency.entry(target.as_str()).or_default().push((agent.id.as_str(), *weight));
        }
    }

    let mut order: Vec<&str> = agents.iter().map(|a| a.id.as_str()).collect();

    for _ in 0..max_iterations {
        order.shuffle(&mut rng);
        let mut changed = false;

        for &id in &order {
            let Some(neighbors) = adjacency.get(id) else { continue };
            let mut totals: HashMap<u64, f64> = HashMap::new();
            for (neighbor, weight) in neighbors {
                if let Some(&neighbor_label) = label.get(*neighbor) {
                    *totals.entry(neighbor_label).or_insert(0.0) += weight;
                }
            }
            if totals.is_empty() {
                continue;
            }
            let mut best_label = 0u64;
            let mut best_weight = f64::NEG_INFINITY;
            let mut candidates: Vec<(u64, f64)> = totals.into_iter().collect();
            candidates.sort_by(|a, b| a.0.cmp(&b.0));
            for (candidate_label, weight) in candidates {
                if weight > best_weight {
                    best_weight = weight;
                    best_label = candidate_label;
                }
            }
            if label.get(id) != Some(&best_label) {
                label.insert(id.to_owned(), best_label);
                changed = true;
            }
        }

        if !changed {
            break;
        }
    }

    label
}

/// Deterministically assign every agent to a worker, respecting capacity.
/// Returns `agent_id -> worker_id`.
pub fn allocate(agents: &[AgentNode], workers: &[WorkerCapacity], seed: u64, max_iterations: usize) -> HashMap<String, String> {
    if workers.is_empty() {
        return HashMap::new();
    }

    let labels = label_propagation(agents, seed, max_iterations);

    let mut clusters: HashMap<u64, Vec<&AgentNode>> = HashMap::new();
    for agent in agents {
        let label = labels.get(&agent.id).copied().unwrap_or(0);
        clusters.entry(label).or_default().push(agent);
    }

    let mut cluster_list: Vec<(u64, Vec<&AgentNode>, f64)> = clusters
        .into_iter()
        .map(|(label, members)| {
            let member_ids: Vec<&str> = members.iter().map(|a| a.id.as_str()).collect();
            let weight: f64 = members
                .iter()
                .flat_map(|a| a.edges.iter())
                .filter(|(target, _)| member_ids.contains(&target.as_str()))
                .map(|(_, w)| w)
                .sum();
            (label, members, weight)
        })
        .collect();

    cluster_list.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal).then(a.0.cmp(&b.0)));

    let mut remaining: Vec<WorkerCapacity> = workers.to_vec();
    let mut worker_types: HashMap<String, HashMap<String, u32>> =
        workers.iter().map(|w| (w.worker_id.clone(), HashMap::new())).collect();
    let mut assignment = HashMap::new();

    for (_, members, _) in cluster_list {
        let cluster_type_count = members.len() as u32;
        let mut predominant_type: HashMap<&str, u32> = HashMap::new();
        for agent in &members {
            *predominant_type.entry(agent.agent_type.as_str()).or_insert(0) += 1;
        }
        let dominant = predominant_type.into_iter().max_by_key(|(_, c)| *c).map(|(t, _)| t).unwrap_or("");

        let best = remaining
            .iter()
            .enumerate()
            .filter(|(_, w)| w.remaining() >= cluster_type_count || w.remaining() > 0)
            .max_by(|(_, a), (_, b)| {
                let a_diversity = worker_types[&a.worker_id].get(dominant).copied().unwrap_or(0);
                let b_diversity = worker_types[&b.worker_id].get(dominant).copied().unwrap_or(0);
                a.remaining()
                    .cmp(&b.remaining())
                    .then(b_diversity.cmp(&a_diversity))
                    .then(b.worker_id.cmp(&a.worker_id))
            });

        let Some((idx, _)) = best else { continue };
        let worker_id = remaining[idx].worker_id.clone();
        for agent in &members {
            assignment.insert(agent.id.clone(), worker_id.clone());
            *worker_types.get_mut(&worker_id).unwrap().entry(agent.agent_type.as_str()).or_insert(0) += 1;
        }
        remaining[idx].current_load += cluster_type_count;
    }

    assignment
}

#[cfg(test)]
#[path = "allocation_tests.rs"]
mod tests;
