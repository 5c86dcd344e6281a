//! Higher-priority tasks are popped for placement before lower-priority
//! ones submitted earlier.

mod common;

use common::task_desc;
use orchestrator_core::model::Priority;

#[tokio::test]
async fn critical_task_is_popped_before_an_earlier_background_task() {
    let (orch, clock) = common::orchestrator();

    let background_id = orch
        .submit_task(task_desc("infer", Priority::Background, &["infer"]))
        .unwrap();
    let critical_id = orch
        .submit_task(task_desc("infer", Priority::Critical, &["infer"]))
        .unwrap();

    let first = orch.task_engine().pop_ready_for_placement(clock.now()).unwrap();
    assert_eq!(first.task_id, critical_id);

    let second = orch.task_engine().pop_ready_for_placement(clock.now()).unwrap();
    assert_eq!(second.task_id, background_id);
}
