//! `report_task_result` distinguishes an unassigned-node report from an
//! unknown task, and releases the dispatch slot a completed/failed node was
//! holding so `least_connections` placement keeps scoring real load.

mod common;

use common::{node_desc, resource_sample, task_desc};
use orchestrator_core::model::{Priority, TaskOutcome, TaskOutcomeClass};
use orchestrator_core::orchestrator::ReportResult;

#[tokio::test]
async fn result_from_unassigned_node_is_distinguished_from_unknown_task() {
    let (orch, _clock) = common::orchestrator();

    orch.register_node(node_desc("n1", &[])).await.unwrap();
    orch.heartbeat("n1", resource_sample()).unwrap();
    orch.register_node(node_desc("n2", &[])).await.unwrap();
    orch.heartbeat("n2", resource_sample()).unwrap();

    let task_id = orch.submit_task(task_desc("infer", Priority::Normal, &[])).unwrap();
    orch.dispatch_tick_once();
    common::drain_spawned().await;

    let outcome = TaskOutcome { class: TaskOutcomeClass::Success, result: None, error_message: None };

    // n2 never received this task.
    let from_bystander = orch.report_task_result(&task_id, "n2", outcome.clone());
    assert!(matches!(from_bystander, ReportResult::NotAssigned));

    // A made-up task id is a different failure mode entirely.
    let from_unknown_task = orch.report_task_result("does-not-exist", "n1", outcome);
    assert!(matches!(from_unknown_task, ReportResult::Unknown));
}

#[tokio::test]
async fn active_count_is_released_on_completion_and_failure() {
    let (orch, _clock) = common::orchestrator();

    orch.register_node(node_desc("n1", &[])).await.unwrap();
    orch.heartbeat("n1", resource_sample()).unwrap();
    let stats = orch.placement_stats();

    let t1 = orch.submit_task(task_desc("infer", Priority::Normal, &[])).unwrap();
    orch.dispatch_tick_once();
    common::drain_spawned().await;
    assert_eq!(stats.active_count("n1"), 1);

    let ok = TaskOutcome { class: TaskOutcomeClass::Success, result: None, error_message: None };
    orch.report_task_result(&t1, "n1", ok);
    assert_eq!(stats.active_count("n1"), 0, "completion must release the slot it held");

    let t2 = orch.submit_task(task_desc("infer", Priority::Normal, &[])).unwrap();
    orch.dispatch_tick_once();
    common::drain_spawned().await;
    assert_eq!(stats.active_count("n1"), 1);

    let bad = TaskOutcome {
        class: TaskOutcomeClass::PermanentError,
        result: None,
        error_message: Some("boom".into()),
    };
    orch.report_task_result(&t2, "n1", bad);
    assert_eq!(stats.active_count("n1"), 0, "a terminal failure must release the slot too");
}
