//! Error taxonomy for the orchestrator control plane.
//!
//! Mirrors the abstract error kinds the core surfaces to callers (spec §7):
//! synchronous API calls return these directly; asynchronous failures flow
//! through the Task Engine and end up either retried or recorded as
//! `error_message` on a terminal task.

use crate::model::{NodeId, TaskId};

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// Malformed requirements, unknown ids, bad status transitions.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Task or node does not exist.
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("node not found: {0}")]
    NodeNotFound(NodeId),

    /// Duplicate registration with incompatible endpoint, or double submit
    /// of the same task_id while it is still non-terminal.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Pending queue full or rate limit tripped.
    #[error("overloaded: {0}")]
    Overloaded(String),

    /// Placement could not find a node within the grace window.
    #[error("no candidates available for task {0}")]
    NoCandidates(TaskId),

    /// Placement found fewer than `redundancy` nodes and `strict_redundancy`
    /// was set.
    #[error("insufficient redundancy for task {0}: wanted {wanted}, found {found}")]
    InsufficientRedundancy {
        task_id: TaskId,
        wanted: u32,
        found: usize,
    },

    /// Transport failure dispatching or cancelling.
    #[error("network error: {0}")]
    NetworkError(String),

    /// Heartbeat lost mid-flight.
    #[error("node failure: {0}")]
    NodeFailure(NodeId),

    /// Node explicitly refused a task.
    #[error("node rejected task: {0}")]
    NodeRejected(String),

    /// Task deadline passed.
    #[error("timeout")]
    Timeout,

    /// Reported by the node as non-retryable.
    #[error("permanent task error: {0}")]
    TaskErrorPermanent(String),

    /// Reported by the node as retryable.
    #[error("transient task error: {0}")]
    TaskErrorTransient(String),

    /// A node status transition that the graph in §4.1 does not permit.
    #[error("invalid status transition for node {node}: {from:?} -> {to:?}")]
    InvalidTransition {
        node: NodeId,
        from: crate::model::NodeStatus,
        to: crate::model::NodeStatus,
    },
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

impl OrchestratorError {
    /// Whether a failure of this kind is eligible for the Task Engine's
    /// automatic retry policy (spec §4.2: `network_error`, `node_failure`,
    /// `timeout` retry; `invalid_input` and permanent task errors do not).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OrchestratorError::NetworkError(_)
                | OrchestratorError::NodeFailure(_)
                | OrchestratorError::Timeout
                | OrchestratorError::TaskErrorTransient(_)
        )
    }
}
