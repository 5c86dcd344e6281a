//! Pluggable persistence (spec §6: "Registry and task history are
//! in-memory by default; when a store is configured, the core writes node
//! registrations, terminal task records, and configuration changes
//! through"). Persistence backends themselves are out of scope (spec §1);
//! this is the trait seam plus an in-memory reference implementation used
//! by tests and the default binary.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::config::ConfigPatch;
use crate::model::{NodeDescriptor, TaskSummary};

#[async_trait]
pub trait Store: Send + Sync + 'static {
    async fn save_node(&self, node: NodeDescriptor);
    async fn remove_node(&self, node_id: &str);
    async fn save_terminal_task(&self, summary: TaskSummary);
    async fn save_config_patch(&self, patch: ConfigPatch);

    /// Rebuilds on-disk state at startup, returning what crash recovery
    /// needs: the last-known node descriptors and any task ids whose state
    /// could not be confirmed, which the Task Engine re-surfaces as
    /// `pending` with `retry_count` preserved (spec §6).
    async fn load_nodes(&self) -> Vec<NodeDescriptor>;
    async fn load_unconfirmed_tasks(&self) -> Vec<TaskSummary>;
}

#[derive(Default)]
pub struct InMemoryStore {
    nodes: Mutex<HashMap<String, NodeDescriptor>>,
    terminal_tasks: Mutex<HashMap<String, TaskSummary>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn save_node(&self, node: NodeDescriptor) {
        self.nodes.lock().unwrap().insert(node.node_id.clone(), node);
    }

    async fn remove_node(&self, node_id: &str) {
        self.nodes.lock().unwrap().remove(node_id);
    }

    async fn save_terminal_task(&self, summary: TaskSummary) {
        self.terminal_tasks
            .lock()
            .unwrap()
            .insert(summary.task_id.clone(), summary);
    }

    async fn save_config_patch(&self, _patch: ConfigPatch) {}

    async fn load_nodes(&self) -> Vec<NodeDescriptor> {
        self.nodes.lock().unwrap().values().cloned().collect()
    }

    async fn load_unconfirmed_tasks(&self) -> Vec<TaskSummary> {
        // In-memory store never has a crash to recover from within a
        // single process lifetime.
        Vec::new()
    }
}
