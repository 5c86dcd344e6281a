//! Shared scaffolding for the end-to-end scenario tests. Not a test module
//! itself (hence `common/mod.rs` rather than `common.rs`, so cargo doesn't
//! register it as its own test binary).

use std::collections::HashSet;
use std::sync::Arc;

use orchestrator_core::clock::FakeClock;
use orchestrator_core::dispatcher::NullTransport;
use orchestrator_core::model::{
    NodeDescriptor, Priority, ResourceSample, TaskDescriptor, TaskRequirements,
};
use orchestrator_core::store::InMemoryStore;
use orchestrator_core::{Orchestrator, OrchestratorConfig};

pub fn orchestrator() -> (Arc<Orchestrator<NullTransport>>, Arc<FakeClock>) {
    orchestrator_with(OrchestratorConfig::default())
}

pub fn orchestrator_with(config: OrchestratorConfig) -> (Arc<Orchestrator<NullTransport>>, Arc<FakeClock>) {
    let clock = Arc::new(FakeClock::new());
    let orch = Orchestrator::new(config, Arc::new(NullTransport), Arc::new(InMemoryStore::new()), clock.clone());
    (orch, clock)
}

pub fn node_desc(id: &str, capabilities: &[&str]) -> NodeDescriptor {
    NodeDescriptor {
        node_id: id.to_string(),
        endpoint: format!("{id}.local:9000"),
        node_type: "worker".to_string(),
        capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
        version: "1.0.0".to_string(),
        location: "local".to_string(),
        metadata: Default::default(),
        agents: Vec::new(),
    }
}

pub fn resource_sample() -> ResourceSample {
    ResourceSample { cpu_pct_free: 0.9, memory_free_mb: 8192, gpu_pct_free: 1.0, load_score: 0.1 }
}

pub fn task_desc(task_type: &str, priority: Priority, required_capabilities: &[&str]) -> TaskDescriptor {
    TaskDescriptor {
        task_id: None,
        task_type: task_type.to_string(),
        priority,
        requirements: TaskRequirements {
            required_capabilities: required_capabilities.iter().map(|c| c.to_string()).collect(),
            ..Default::default()
        },
        input_data: serde_json::json!({}),
        timeout_seconds: 30,
        max_retries: 2,
        callback_url: None,
    }
}

pub fn redundant_task_desc(task_type: &str, redundancy: u32) -> TaskDescriptor {
    TaskDescriptor {
        task_id: None,
        task_type: task_type.to_string(),
        priority: Priority::Normal,
        requirements: TaskRequirements {
            required_capabilities: HashSet::new(),
            redundancy,
            ..Default::default()
        },
        input_data: serde_json::json!({}),
        timeout_seconds: 30,
        max_retries: 2,
        callback_url: None,
    }
}

/// Lets every `tokio::spawn`-ed dispatch/cancel task finish. `NullTransport`
/// never actually sleeps, so a handful of cooperative yields is enough for
/// the default current-thread test runtime to drain them.
pub async fn drain_spawned() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}
