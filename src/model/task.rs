//! Task data model and lifecycle state machine (spec §3, §4.2).

use std::collections::HashSet;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::model::node::NodeId;

pub type TaskId = String;

/// Lower value is higher priority (spec §3: CRITICAL=1 … BACKGROUND=5), so
/// the derived `Ord` already sorts the way a max-heap priority queue wants
/// once wrapped by `QueuedTask` (see task_engine.rs), with Critical sorting
/// greatest under `Reverse`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum Priority {
    Critical = 1,
    High = 2,
    Normal = 3,
    Low = 4,
    Background = 5,
}

impl Priority {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Priority::Critical),
            2 => Some(Priority::High),
            3 => Some(Priority::Normal),
            4 => Some(Priority::Low),
            5 => Some(Priority::Background),
            _ => None,
        }
    }

    pub fn is_low_priority(self) -> bool {
        matches!(self, Priority::Low | Priority::Background)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    Pending,
    Scheduled,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled
        )
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskRequirements {
    pub required_capabilities: HashSet<String>,
    pub min_cpu_pct_free: f32,
    pub min_memory_mb: u64,
    pub preferred_nodes: Vec<NodeId>,
    pub excluded_nodes: HashSet<NodeId>,
    pub redundancy: u32,
    pub strict_preferred: bool,
    pub strict_redundancy: bool,
}

impl TaskRequirements {
    pub fn redundancy_or_default(&self) -> u32 {
        self.redundancy.max(1)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDescriptor {
    pub task_id: Option<TaskId>,
    pub task_type: String,
    pub priority: Priority,
    pub requirements: TaskRequirements,
    pub input_data: serde_json::Value,
    pub timeout_seconds: u64,
    pub max_retries: u32,
    pub callback_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TaskOutcomeClass {
    Success,
    /// Reported by the node: not worth retrying.
    PermanentError,
    /// Reported by the node: worth retrying.
    TransientError,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub class: TaskOutcomeClass,
    pub result: Option<serde_json::Value>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: TaskId,
    pub task_type: String,
    pub priority: Priority,
    pub requirements: TaskRequirements,
    pub input_data: serde_json::Value,
    pub timeout_seconds: u64,
    pub max_retries: u32,
    pub retry_count: u32,
    pub assigned_nodes: Vec<NodeId>,
    pub state: TaskState,
    pub callback_url: Option<String>,
    pub result: Option<serde_json::Value>,
    pub error_message: Option<String>,

    #[serde(skip, default = "Instant::now")]
    pub created_at: Instant,
    #[serde(skip)]
    pub dispatched_at: Option<Instant>,
    #[serde(skip)]
    pub completed_at: Option<Instant>,
    #[serde(skip, default = "Instant::now")]
    pub deadline_at: Instant,
    #[serde(skip, default = "Instant::now")]
    pub next_try_at: Instant,

    /// Placement attempts made while stuck in `pending` with no candidate
    /// node, distinct from `retry_count` which only counts post-dispatch
    /// failures (spec §4.2).
    #[serde(skip)]
    pub placement_attempts: u32,
    /// Snapshot of `assigned_nodes` taken at the start of the current
    /// dispatch round, used to exclude the whole cohort if a redundant
    /// dispatch fails out entirely (spec §4.3).
    #[serde(skip)]
    pub dispatch_round_nodes: Vec<NodeId>,
}

impl Task {
    pub fn new(task_id: TaskId, descriptor: TaskDescriptor, now: Instant) -> Self {
        let deadline_at = now + std::time::Duration::from_secs(descriptor.timeout_seconds.max(1));
        Self {
            task_id,
            task_type: descriptor.task_type,
            priority: descriptor.priority,
            requirements: descriptor.requirements,
            input_data: descriptor.input_data,
            timeout_seconds: descriptor.timeout_seconds,
            max_retries: descriptor.max_retries,
            retry_count: 0,
            assigned_nodes: Vec::new(),
            state: TaskState::Pending,
            callback_url: descriptor.callback_url,
            result: None,
            error_message: None,
            created_at: now,
            dispatched_at: None,
            completed_at: None,
            deadline_at,
            next_try_at: now,
            placement_attempts: 0,
            dispatch_round_nodes: Vec::new(),
        }
    }

    /// Summary view retained in the finalized-task LRU once the full
    /// payload is stripped (spec §9 open question: strip `input_data`
    /// and `result`, keep summary fields).
    pub fn to_summary(&self) -> TaskSummary {
        TaskSummary {
            task_id: self.task_id.clone(),
            task_type: self.task_type.clone(),
            priority: self.priority,
            state: self.state.clone(),
            assigned_nodes: self.assigned_nodes.clone(),
            retry_count: self.retry_count,
            max_retries: self.max_retries,
            error_message: self.error_message.clone(),
        }
    }
}

/// What survives LRU eviction: everything except the opaque payload and
/// result (spec §9 open question resolution).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSummary {
    pub task_id: TaskId,
    pub task_type: String,
    pub priority: Priority,
    pub state: TaskState,
    pub assigned_nodes: Vec<NodeId>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub error_message: Option<String>,
}
