//! Authoritative node/agent topology (spec §4.1).
//!
//! Backed by `DashMap` for per-node sharded locking: heartbeats (the
//! hottest path) and dispatch snapshots contend on different shards most of
//! the time instead of a single global lock, per the teacher's use of
//! concurrent maps for registries under contention.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{info, warn};

use crate::clock::SharedClock;
use crate::error::{OrchestratorError, Result};
use crate::model::{Node, NodeDescriptor, NodeId, NodeStatus, ResourceSample};

#[derive(Clone)]
pub struct Registry {
    nodes: Arc<DashMap<NodeId, Node>>,
    clock: SharedClock,
}

impl Registry {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            nodes: Arc::new(DashMap::new()),
            clock,
        }
    }

    /// Idempotent on same endpoint; rotates the endpoint and preserves
    /// counters/reliability on a changed endpoint (spec §4.1, §9 open
    /// question: re-registration after an IP change is presumed a restart).
    pub fn register(&self, desc: NodeDescriptor) -> Result<()> {
        let now = self.clock.now();
        match self.nodes.get_mut(&desc.node_id) {
            Some(mut existing) => {
                if existing.endpoint == desc.endpoint {
                    existing.capabilities = desc.capabilities;
                    existing.agents = desc.agents;
                    existing.metadata = desc.metadata;
                    return Ok(());
                }
                info!(
                    node_id = %desc.node_id,
                    old_endpoint = %existing.endpoint,
                    new_endpoint = %desc.endpoint,
                    "node re-registered with a new endpoint, preserving counters"
                );
                existing.endpoint = desc.endpoint;
                existing.node_type = desc.node_type;
                existing.capabilities = desc.capabilities;
                existing.version = desc.version;
                existing.location = desc.location;
                existing.metadata = desc.metadata;
                existing.agents = desc.agents;
                existing.last_heartbeat_at = now;
                Ok(())
            }
            None => {
                let node_id = desc.node_id.clone();
                self.nodes.insert(node_id.clone(), Node::new(desc, now));
                info!(node_id = %node_id, "node registered");
                Ok(())
            }
        }
    }

    /// Refreshes liveness and resource sample; heals a monitor-caused
    /// `offline`/`degraded` status back to `active` (spec §4.1). Sticky
    /// statuses (`maintenance`, `error`) are untouched.
    pub fn heartbeat(&self, node_id: &str, sample: ResourceSample) -> Result<()> {
        let now = self.clock.now();
        let mut node = self
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| OrchestratorError::NodeNotFound(node_id.to_string()))?;

        node.last_heartbeat_at = now;
        node.resource_sample = sample;

        if node.liveness_only && matches!(node.status, NodeStatus::Offline | NodeStatus::Degraded) {
            node.status = NodeStatus::Active;
            node.liveness_only = false;
        }
        Ok(())
    }

    /// Applies a transition per the graph in spec §4.1. `via_monitor`
    /// distinguishes operator-driven transitions (sticky) from
    /// liveness-driven ones (heartbeat-reversible).
    pub fn set_status(&self, node_id: &str, new_status: NodeStatus, via_monitor: bool) -> Result<()> {
        let mut node = self
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| OrchestratorError::NodeNotFound(node_id.to_string()))?;

        let from = node.status;
        if !Self::transition_allowed(from, new_status, via_monitor) {
            return Err(OrchestratorError::InvalidTransition {
                node: node_id.to_string(),
                from,
                to: new_status,
            });
        }

        node.status = new_status;
        node.liveness_only = via_monitor
            && matches!(new_status, NodeStatus::Degraded | NodeStatus::Offline | NodeStatus::Active);
        Ok(())
    }

    fn transition_allowed(from: NodeStatus, to: NodeStatus, via_monitor: bool) -> bool {
        use NodeStatus::*;
        match (from, to) {
            (a, b) if a == b => true,
            // Any non-terminal -> maintenance (operator).
            (Active | Degraded, Maintenance) if !via_monitor => true,
            (Maintenance, Active) if !via_monitor => true,
            // Any -> error is an operator escalation.
            (_, Error) if !via_monitor => true,
            // Liveness-monitor-only transitions.
            (Active, Degraded) | (Degraded, Active) if via_monitor => true,
            (_, Offline) if via_monitor && from != Maintenance && from != Error => true,
            (Offline, Active) => true, // heartbeat healing, handled in heartbeat() too
            _ => false,
        }
    }

    pub fn unregister(&self, node_id: &str) -> Option<Node> {
        let removed = self.nodes.remove(node_id).map(|(_, n)| n);
        if removed.is_some() {
            info!(node_id = %node_id, "node unregistered");
        } else {
            warn!(node_id = %node_id, "unregister of unknown node ignored");
        }
        removed
    }

    pub fn get(&self, node_id: &str) -> Option<Node> {
        self.nodes.get(node_id).map(|n| n.clone())
    }

    /// A read-consistent, point-in-time copy. Writers never block on this:
    /// `DashMap::iter` takes shard locks one at a time, never the whole map.
    pub fn snapshot(&self) -> Vec<Node> {
        self.nodes.iter().map(|e| e.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node_ids(&self) -> HashSet<NodeId> {
        self.nodes.iter().map(|e| e.key().clone()).collect()
    }

    /// Feedback from the Task Engine on a completed task attempt.
    pub fn record_task_outcome(&self, node_id: &str, success: bool, alpha: f32) {
        if let Some(mut node) = self.nodes.get_mut(node_id) {
            node.record_outcome(success, alpha);
        }
    }
}
