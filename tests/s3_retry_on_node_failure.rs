//! A node stops heartbeating while holding a task; the liveness sweep marks
//! it offline and fails the task over, which gets retried onto the
//! remaining healthy node.

mod common;

use std::time::Duration;

use common::{node_desc, resource_sample, task_desc};
use orchestrator_core::model::{Priority, TaskState};

#[tokio::test]
async fn offline_node_triggers_retry_onto_a_healthy_node() {
    let (orch, clock) = common::orchestrator();

    orch.register_node(node_desc("n1", &["infer"])).await.unwrap();
    orch.register_node(node_desc("n2", &["infer"])).await.unwrap();
    orch.heartbeat("n1", resource_sample()).unwrap();
    orch.heartbeat("n2", resource_sample()).unwrap();

    let task_id = orch
        .submit_task(task_desc("infer", Priority::Normal, &["infer"]))
        .unwrap();
    orch.dispatch_tick_once();
    common::drain_spawned().await;

    let task = orch.get_task(&task_id).unwrap();
    assert_eq!(task.state, TaskState::Running);
    let assigned_node = task.assigned_nodes[0].clone();

    // Default heartbeat_interval is 10s, offline_factor 3.0 -> offline at 30s.
    // Keep the other node fresh so only the assigned one goes offline.
    let other_node = if assigned_node == "n1" { "n2" } else { "n1" };
    clock.advance(Duration::from_secs(29));
    orch.heartbeat(other_node, resource_sample()).unwrap();
    clock.advance(Duration::from_secs(1));

    let offline = orch.liveness().sweep_once(clock.now());
    assert_eq!(offline, vec![assigned_node.clone()]);

    let affected = orch.task_engine().fail_tasks_on_node(&assigned_node, clock.now());
    assert_eq!(affected, vec![task_id.clone()]);

    // Retry backoff after one failure is 2s; advance past it before the
    // next dispatch tick picks the task back up.
    clock.advance(Duration::from_secs(2));
    orch.dispatch_tick_once();
    common::drain_spawned().await;

    let task = orch.get_task(&task_id).unwrap();
    assert_eq!(task.state, TaskState::Running);
    assert_eq!(task.assigned_nodes, vec![other_node.to_string()]);
    assert_eq!(task.retry_count, 1);
}
