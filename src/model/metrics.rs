//! Network-wide rolling metrics snapshot (spec §3, §4.6).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::model::node::NodeStatus;
use crate::model::task::TaskState;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkMetricsSnapshot {
    pub total_nodes: usize,
    pub nodes_by_status: HashMap<String, usize>,
    pub tasks_by_state: HashMap<String, usize>,
    pub throughput_per_minute: f64,
    pub success_rate: f64,
    pub avg_response_time_ms: f64,
    pub p95_response_time_ms: f64,
    pub aggregate_utilization: f64,
}

impl NetworkMetricsSnapshot {
    pub fn status_key(status: NodeStatus) -> &'static str {
        match status {
            NodeStatus::Active => "active",
            NodeStatus::Degraded => "degraded",
            NodeStatus::Maintenance => "maintenance",
            NodeStatus::Offline => "offline",
            NodeStatus::Error => "error",
        }
    }

    pub fn state_key(state: &TaskState) -> &'static str {
        match state {
            TaskState::Pending => "pending",
            TaskState::Scheduled => "scheduled",
            TaskState::Running => "running",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
            TaskState::Cancelled => "cancelled",
        }
    }
}
