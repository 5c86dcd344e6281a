//! Core domain types shared by every component of the control plane.

pub mod metrics;
pub mod node;
pub mod task;

pub use metrics::NetworkMetricsSnapshot;
pub use node::{AgentDescriptor, AgentId, Metadata, Node, NodeDescriptor, NodeId, NodeStatus, ResourceSample};
pub use task::{
    Priority, Task, TaskDescriptor, TaskId, TaskOutcome, TaskOutcomeClass, TaskRequirements,
    TaskState, TaskSummary,
};
