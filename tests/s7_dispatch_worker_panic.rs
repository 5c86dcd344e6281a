//! A panic inside the dispatch worker must not strand the task in
//! `scheduled` forever: it is caught at the worker boundary and fed back to
//! the Task Engine as a retryable `network_error` (spec §7).

mod common;

use std::sync::Arc;

use async_trait::async_trait;
use common::{node_desc, resource_sample, task_desc};
use orchestrator_core::dispatcher::{DispatchDescriptor, DispatchErrorClass, NodeTransport};
use orchestrator_core::model::{Priority, TaskState};
use orchestrator_core::store::InMemoryStore;
use orchestrator_core::{Orchestrator, OrchestratorConfig};

struct PanickingTransport;

#[async_trait]
impl NodeTransport for PanickingTransport {
    async fn dispatch(&self, _node_id: &str, _task: &DispatchDescriptor) -> Result<(), DispatchErrorClass> {
        panic!("transport blew up mid-dispatch");
    }

    async fn cancel(&self, _node_id: &str, _task_id: &str) {}
}

#[tokio::test]
async fn panicking_transport_fails_the_assignment_instead_of_hanging() {
    let clock = Arc::new(orchestrator_core::clock::FakeClock::new());
    let orch = Orchestrator::new(
        OrchestratorConfig::default(),
        Arc::new(PanickingTransport),
        Arc::new(InMemoryStore::new()),
        clock.clone(),
    );

    orch.register_node(node_desc("n1", &["infer"])).await.unwrap();
    orch.heartbeat("n1", resource_sample()).unwrap();

    let task_id = orch
        .submit_task(task_desc("infer", Priority::Normal, &["infer"]))
        .unwrap();

    orch.dispatch_tick_once();
    common::drain_spawned().await;

    // The panic is caught at the worker boundary and treated as a
    // retryable network_error: the task goes back to pending with
    // retry_count bumped, not stuck in scheduled.
    let task = orch.get_task(&task_id).unwrap();
    assert_eq!(task.state, TaskState::Pending);
    assert_eq!(task.retry_count, 1);
}
