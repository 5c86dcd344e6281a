//! Candidate node selection for a task's requirements (spec §4.3).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::model::{Node, NodeId, NodeStatus, TaskRequirements};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    RoundRobin,
    WeightedRoundRobin,
    LeastConnections,
    ResourceAware,
    LatencyOptimized,
}

#[derive(Debug, Clone, Copy)]
pub struct PlacementWeights {
    pub cpu: f32,
    pub mem: f32,
    pub gpu: f32,
}

impl Default for PlacementWeights {
    fn default() -> Self {
        Self { cpu: 0.4, mem: 0.3, gpu: 0.3 }
    }
}

#[derive(Debug, Clone)]
pub struct PlacementConfig {
    pub algorithm: Algorithm,
    pub allow_degraded: bool,
    pub top_n: usize,
    pub weights: PlacementWeights,
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::WeightedRoundRobin,
            allow_degraded: false,
            top_n: 3,
            weights: PlacementWeights::default(),
        }
    }
}

/// Per-node runtime signals the Dispatcher/Task Engine feed back in for
/// scoring: in-flight task counts (`least_connections`) and RTT EWMA
/// (`latency_optimized`).
#[derive(Default)]
pub struct PlacementStats {
    active_tasks: DashMap<NodeId, usize>,
    rtt_ewma_millis: DashMap<NodeId, f64>,
}

impl PlacementStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr_active(&self, node_id: &str) {
        *self.active_tasks.entry(node_id.to_string()).or_insert(0) += 1;
    }

    pub fn decr_active(&self, node_id: &str) {
        if let Some(mut v) = self.active_tasks.get_mut(node_id) {
            *v = v.saturating_sub(1);
        }
    }

    pub fn active_count(&self, node_id: &str) -> usize {
        self.active_tasks.get(node_id).map(|v| *v).unwrap_or(0)
    }

    pub fn record_rtt(&self, node_id: &str, millis: f64, alpha: f64) {
        let mut entry = self.rtt_ewma_millis.entry(node_id.to_string()).or_insert(millis);
        *entry = alpha * millis + (1.0 - alpha) * *entry;
    }

    pub fn rtt_ewma(&self, node_id: &str) -> f64 {
        self.rtt_ewma_millis.get(node_id).map(|v| *v).unwrap_or(0.0)
    }
}

pub struct PlacementEngine {
    config: PlacementConfig,
    rotation: AtomicUsize,
    stats: Arc<PlacementStats>,
}

impl PlacementEngine {
    pub fn new(config: PlacementConfig, stats: Arc<PlacementStats>) -> Self {
        Self { config, rotation: AtomicUsize::new(0), stats }
    }

    pub fn config(&self) -> &PlacementConfig {
        &self.config
    }

    /// Returns up to `k = max(redundancy, top_n)` candidate nodes, ranked
    /// best-first, or an empty vec if none match the hard constraints.
    pub fn select(&self, nodes: &[Node], requirements: &TaskRequirements) -> Vec<NodeId> {
        let k = requirements.redundancy_or_default().max(1) as usize;
        let k = k.max(self.config.top_n).max(1);

        let mut candidates = self.filter(nodes, requirements, true);
        if candidates.is_empty() && !requirements.preferred_nodes.is_empty() && !requirements.strict_preferred {
            candidates = self.filter(nodes, requirements, false);
        }

        let mut scored: Vec<(f64, &Node)> = candidates
            .iter()
            .map(|n| (self.score(n), *n))
            .collect();

        // Higher score first; ties broken by node_id for determinism (§4.3).
        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.1.node_id.cmp(&b.1.node_id))
        });

        if matches!(self.config.algorithm, Algorithm::RoundRobin | Algorithm::WeightedRoundRobin)
            && !scored.is_empty()
        {
            let rotate = self.rotation.fetch_add(1, Ordering::Relaxed) % scored.len();
            scored.rotate_left(rotate);
        }

        scored.into_iter().take(k).map(|(_, n)| n.node_id.clone()).collect()
    }

    fn filter<'a>(&self, nodes: &'a [Node], requirements: &TaskRequirements, restrict_preferred: bool) -> Vec<&'a Node> {
        nodes
            .iter()
            .filter(|n| n.status.is_schedulable(self.config.allow_degraded))
            .filter(|n| n.capabilities.is_superset(&requirements.required_capabilities))
            .filter(|n| n.resource_sample.cpu_pct_free >= requirements.min_cpu_pct_free)
            .filter(|n| n.resource_sample.memory_free_mb >= requirements.min_memory_mb)
            .filter(|n| !requirements.excluded_nodes.contains(&n.node_id))
            .filter(|n| {
                if restrict_preferred && !requirements.preferred_nodes.is_empty() {
                    requirements.preferred_nodes.contains(&n.node_id)
                } else {
                    true
                }
            })
            .collect()
    }

    fn score(&self, node: &Node) -> f64 {
        match self.config.algorithm {
            Algorithm::RoundRobin => 0.0,
            Algorithm::WeightedRoundRobin => {
                (node.reliability_score * (1.0 - node.resource_sample.load_score)) as f64
            }
            Algorithm::LeastConnections => -(self.stats.active_count(&node.node_id) as f64),
            Algorithm::ResourceAware => {
                let w = self.config.weights;
                let r = node.resource_sample;
                (w.cpu * r.cpu_pct_free / 100.0
                    + w.mem * (1.0 - (r.memory_free_mb as f32 / 1_048_576.0).min(1.0))
                    + w.gpu * r.gpu_pct_free / 100.0) as f64
            }
            Algorithm::LatencyOptimized => -self.stats.rtt_ewma(&node.node_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::time::Instant;

    fn node(id: &str, status: NodeStatus, caps: &[&str]) -> Node {
        Node {
            node_id: id.to_string(),
            endpoint: format!("{id}:9000"),
            node_type: "worker".into(),
            capabilities: caps.iter().map(|s| s.to_string()).collect(),
            version: "1".into(),
            location: "local".into(),
            metadata: Default::default(),
            status,
            resource_sample: Default::default(),
            reliability_score: 1.0,
            tasks_completed: 0,
            tasks_failed: 0,
            agents: Vec::new(),
            last_heartbeat_at: Instant::now(),
            registered_at: Instant::now(),
            liveness_only: false,
        }
    }

    fn reqs(caps: &[&str]) -> TaskRequirements {
        TaskRequirements {
            required_capabilities: caps.iter().map(|s| s.to_string()).collect(),
            redundancy: 1,
            ..Default::default()
        }
    }

    #[test]
    fn excludes_non_active_nodes_by_default() {
        let nodes = vec![
            node("n1", NodeStatus::Degraded, &["ai_inference"]),
            node("n2", NodeStatus::Active, &["ai_inference"]),
        ];
        let engine = PlacementEngine::new(PlacementConfig::default(), Arc::new(PlacementStats::new()));
        let picked = engine.select(&nodes, &reqs(&["ai_inference"]));
        assert_eq!(picked, vec!["n2".to_string()]);
    }

    #[test]
    fn excludes_nodes_missing_capabilities() {
        let nodes = vec![node("n1", NodeStatus::Active, &["training"])];
        let engine = PlacementEngine::new(PlacementConfig::default(), Arc::new(PlacementStats::new()));
        let picked = engine.select(&nodes, &reqs(&["ai_inference"]));
        assert!(picked.is_empty());
    }

    #[test]
    fn maintenance_and_error_nodes_never_selected() {
        let nodes = vec![
            node("n1", NodeStatus::Maintenance, &["ai_inference"]),
            node("n2", NodeStatus::Error, &["ai_inference"]),
        ];
        let engine = PlacementEngine::new(PlacementConfig::default(), Arc::new(PlacementStats::new()));
        assert!(engine.select(&nodes, &reqs(&["ai_inference"])).is_empty());
    }

    #[test]
    fn redundancy_selects_k_distinct_nodes() {
        let nodes = vec![
            node("n1", NodeStatus::Active, &["ai_inference"]),
            node("n2", NodeStatus::Active, &["ai_inference"]),
            node("n3", NodeStatus::Active, &["ai_inference"]),
        ];
        let engine = PlacementEngine::new(PlacementConfig::default(), Arc::new(PlacementStats::new()));
        let mut r = reqs(&["ai_inference"]);
        r.redundancy = 3;
        let picked = engine.select(&nodes, &r);
        assert_eq!(picked.len(), 3);
    }

    #[test]
    fn ties_broken_lexicographically_by_node_id() {
        let nodes = vec![
            node("b", NodeStatus::Active, &[]),
            node("a", NodeStatus::Active, &[]),
        ];
        let cfg = PlacementConfig { algorithm: Algorithm::ResourceAware, top_n: 1, ..Default::default() };
        let engine = PlacementEngine::new(cfg, Arc::new(PlacementStats::new()));
        let picked = engine.select(&nodes, &reqs(&[]));
        assert_eq!(picked[0], "a");
    }
}
