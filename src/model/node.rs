//! Node and Agent descriptors (spec §3).

use std::collections::HashMap;
use std::collections::HashSet;
use std::time::Instant;

use serde::{Deserialize, Serialize};

pub type NodeId = String;
pub type AgentId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeStatus {
    Active,
    Degraded,
    Maintenance,
    Offline,
    Error,
}

impl NodeStatus {
    /// Whether placement is allowed to consider a node in this status.
    pub fn is_schedulable(self, allow_degraded: bool) -> bool {
        match self {
            NodeStatus::Active => true,
            NodeStatus::Degraded => allow_degraded,
            NodeStatus::Maintenance | NodeStatus::Offline | NodeStatus::Error => false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ResourceSample {
    pub cpu_pct_free: f32,
    pub memory_free_mb: u64,
    pub gpu_pct_free: f32,
    pub load_score: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDescriptor {
    pub id: AgentId,
    pub agent_type: String,
    pub capabilities: Vec<String>,
    pub specialized_models: Vec<String>,
    pub efficiency_score: f32,
}

/// Opaque, caller-supplied metadata the core never interprets (spec §9,
/// "loose dict payloads … only the fields listed in §3 are interpreted by
/// the core, the rest is passed through unchanged").
pub type Metadata = HashMap<String, String>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDescriptor {
    pub node_id: NodeId,
    pub endpoint: String,
    pub node_type: String,
    pub capabilities: HashSet<String>,
    pub version: String,
    pub location: String,
    pub metadata: Metadata,
    pub agents: Vec<AgentDescriptor>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub node_id: NodeId,
    pub endpoint: String,
    pub node_type: String,
    pub capabilities: HashSet<String>,
    pub version: String,
    pub location: String,
    pub metadata: Metadata,
    pub status: NodeStatus,
    pub resource_sample: ResourceSample,
    pub reliability_score: f32,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub agents: Vec<AgentDescriptor>,

    #[serde(skip, default = "Instant::now")]
    pub last_heartbeat_at: Instant,
    #[serde(skip, default = "Instant::now")]
    pub registered_at: Instant,

    /// Set when the monitor, not an operator, is the reason this node is
    /// `degraded`/`offline` (only then is the transition heartbeat-reversible,
    /// spec §4.1: `maintenance` and `error` are sticky).
    #[serde(skip)]
    pub liveness_only: bool,
}

impl Node {
    pub fn new(desc: NodeDescriptor, now: Instant) -> Self {
        Self {
            node_id: desc.node_id,
            endpoint: desc.endpoint,
            node_type: desc.node_type,
            capabilities: desc.capabilities,
            version: desc.version,
            location: desc.location,
            metadata: desc.metadata,
            status: NodeStatus::Active,
            resource_sample: ResourceSample::default(),
            reliability_score: 1.0,
            tasks_completed: 0,
            tasks_failed: 0,
            agents: desc.agents,
            last_heartbeat_at: now,
            registered_at: now,
            liveness_only: false,
        }
    }

    /// EWMA update of the reliability score on task completion, clamped to
    /// [0, 1] per the invariant in spec §3/§8.
    pub fn record_outcome(&mut self, success: bool, alpha: f32) {
        if success {
            self.tasks_completed += 1;
        } else {
            self.tasks_failed += 1;
        }
        let sample = if success { 1.0 } else { 0.0 };
        self.reliability_score =
            (alpha * sample + (1.0 - alpha) * self.reliability_score).clamp(0.0, 1.0);
    }
}
