//! Task lifecycle state machine: pending/active/completed/failed queues,
//! dispatch handoff, retries, deadlines, and history (spec §4.2).
//!
//! All state here is in-memory and protected by a single `parking_lot::Mutex`.
//! Every operation is a handful of map/heap touches with no `.await`
//! inside the critical section, so it never suspends (spec §5: "In-memory
//! state operations do not suspend").

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::events::{Event, EventBus};
use crate::model::{
    NodeId, Priority, Task, TaskDescriptor, TaskId, TaskOutcome, TaskOutcomeClass, TaskRequirements,
    TaskState,
};

/// Why a dispatched task attempt failed, driving the retry policy (spec §7,
/// §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    NetworkError,
    NodeFailure,
    Timeout,
    TaskErrorPermanent,
    TaskErrorTransient,
    /// An affirmative refusal from the node (spec §4.4 `node_rejected`).
    /// Unlike a transport error, retrying against the same placement
    /// outcome won't help, so this is not in the retryable set.
    NodeRejected,
    InvalidInput,
}

impl FailureClass {
    fn is_retryable(self) -> bool {
        matches!(
            self,
            FailureClass::NetworkError
                | FailureClass::NodeFailure
                | FailureClass::Timeout
                | FailureClass::TaskErrorTransient
        )
    }

    fn message(self) -> &'static str {
        match self {
            FailureClass::NetworkError => "network_error",
            FailureClass::NodeFailure => "node_failure",
            FailureClass::Timeout => "timeout",
            FailureClass::TaskErrorPermanent => "task_error_permanent",
            FailureClass::TaskErrorTransient => "task_error_transient",
            FailureClass::NodeRejected => "node_rejected",
            FailureClass::InvalidInput => "invalid_input",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct HeapKey {
    task_id: TaskId,
    priority: Priority,
    created_at_millis: u64,
}

impl Ord for HeapKey {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; we want the highest priority (lowest
        // numeric Priority value) and earliest created_at to pop first.
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.created_at_millis.cmp(&self.created_at_millis))
    }
}

impl PartialOrd for HeapKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

pub enum SubmitOutcome {
    Accepted(TaskId),
    Rejected(&'static str),
}

pub enum PlacementFollowUp {
    Requeued,
    Failed,
}

pub enum ResultFollowUp {
    /// A sibling in a redundant dispatch is still outstanding; no
    /// transition happened.
    StillInFlight,
    Requeued,
    Completed { siblings_to_cancel: Vec<NodeId> },
    Failed,
    /// Late message for an unknown or already-terminal task; dropped.
    Dropped,
    /// Message from a node that was never part of this task's assignment.
    NotAssigned,
}

/// Spec §6 `cancel_task(task_id) → ok | not_found | already_terminal`.
pub enum CancelResult {
    Cancelled(Vec<NodeId>),
    AlreadyTerminal,
    NotFound,
}

struct Inner {
    tasks: HashMap<TaskId, Task>,
    pending: BinaryHeap<HeapKey>,
    history: LruCache<TaskId, crate::model::TaskSummary>,
    epoch: Instant,
}

pub struct TaskEngineConfig {
    pub max_pending: usize,
    pub high_water_fraction: f32,
    pub placement_grace: Duration,
    pub history_limit: usize,
}

impl Default for TaskEngineConfig {
    fn default() -> Self {
        Self {
            max_pending: 100_000,
            high_water_fraction: 0.8,
            placement_grace: Duration::from_secs(30),
            history_limit: 10_000,
        }
    }
}

pub struct TaskEngine {
    inner: Mutex<Inner>,
    config: TaskEngineConfig,
    events: EventBus,
}

impl TaskEngine {
    pub fn new(config: TaskEngineConfig, events: EventBus, epoch: Instant) -> Self {
        let cap = NonZeroUsize::new(config.history_limit.max(1)).unwrap();
        Self {
            inner: Mutex::new(Inner {
                tasks: HashMap::new(),
                pending: BinaryHeap::new(),
                history: LruCache::new(cap),
                epoch,
            }),
            config,
            events,
        }
    }

    fn millis_since_epoch(&self, inner: &Inner, at: Instant) -> u64 {
        at.saturating_duration_since(inner.epoch).as_millis() as u64
    }

    /// Validates, timestamps, and enqueues a task (spec §4.2 `submit`).
    pub fn submit(&self, descriptor: TaskDescriptor, task_id: TaskId, now: Instant) -> SubmitOutcome {
        if descriptor.timeout_seconds == 0 {
            return SubmitOutcome::Rejected("invalid_requirements: timeout must be > 0");
        }
        if descriptor.requirements.redundancy != 0 && descriptor.requirements.redundancy < 1 {
            return SubmitOutcome::Rejected("invalid_requirements: redundancy must be >= 1");
        }

        let mut inner = self.inner.lock();

        if inner.pending.len() >= self.config.max_pending {
            return SubmitOutcome::Rejected("overloaded");
        }
        let high_water = (self.config.max_pending as f32 * self.config.high_water_fraction) as usize;
        if inner.pending.len() >= high_water && descriptor.priority.is_low_priority() {
            return SubmitOutcome::Rejected("overloaded");
        }

        let task = Task::new(task_id.clone(), descriptor, now);
        let key = HeapKey {
            task_id: task_id.clone(),
            priority: task.priority,
            created_at_millis: self.millis_since_epoch(&inner, now),
        };
        inner.pending.push(key);
        inner.tasks.insert(task_id.clone(), task);
        drop(inner);

        self.events.publish(Event::TaskSubmitted { task_id: task_id.clone() });
        SubmitOutcome::Accepted(task_id)
    }

    /// Crash-recovery entry point (spec §6): rebuilds an in-flight task
    /// whose outcome the store could not confirm as a fresh `pending`
    /// entry, preserving `retry_count` and `task_id`. The original
    /// requirements and input payload are lost with the crash (only the
    /// summary fields survive the store round-trip), so this is a
    /// best-effort resurfacing, not a full replay.
    pub fn rehydrate_pending(&self, summary: &crate::model::TaskSummary, default_timeout: u64, now: Instant) {
        let mut inner = self.inner.lock();
        if inner.tasks.contains_key(&summary.task_id) {
            return;
        }

        let descriptor = TaskDescriptor {
            task_id: Some(summary.task_id.clone()),
            task_type: summary.task_type.clone(),
            priority: summary.priority,
            requirements: TaskRequirements::default(),
            input_data: serde_json::Value::Null,
            timeout_seconds: default_timeout,
            max_retries: summary.max_retries,
            callback_url: None,
        };
        let mut task = Task::new(summary.task_id.clone(), descriptor, now);
        task.retry_count = summary.retry_count;

        let key = HeapKey {
            task_id: task.task_id.clone(),
            priority: task.priority,
            created_at_millis: self.millis_since_epoch(&inner, now),
        };
        inner.pending.push(key);
        info!(task_id = %task.task_id, retry_count = task.retry_count, "task re-surfaced as pending after crash recovery");
        inner.tasks.insert(task.task_id.clone(), task);
    }

    /// Pops the next pending task ready for a placement attempt (its
    /// backoff has elapsed), leaving stale/cancelled heap entries behind.
    pub fn pop_ready_for_placement(&self, now: Instant) -> Option<Task> {
        let mut inner = self.inner.lock();
        let mut skipped = Vec::new();
        let mut ready = None;

        while let Some(key) = inner.pending.pop() {
            let still_pending = inner
                .tasks
                .get(&key.task_id)
                .map(|t| t.state == TaskState::Pending)
                .unwrap_or(false);
            if !still_pending {
                continue; // stale entry for a cancelled/already-moved task
            }
            let ready_at = inner.tasks[&key.task_id].next_try_at;
            if ready_at <= now {
                ready = inner.tasks.get(&key.task_id).cloned();
                break;
            }
            skipped.push(key);
        }

        for key in skipped {
            inner.pending.push(key);
        }
        ready
    }

    /// Requeues a task that could not be placed this attempt with
    /// exponential backoff, or fails it once `placement_grace` elapses
    /// (spec §4.2).
    pub fn no_candidates_for(&self, task_id: &str, now: Instant) -> PlacementFollowUp {
        let mut inner = self.inner.lock();

        let (elapsed, priority, created_at, attempts) = {
            let Some(task) = inner.tasks.get_mut(task_id) else {
                return PlacementFollowUp::Failed;
            };
            task.placement_attempts += 1;
            (
                now.saturating_duration_since(task.created_at),
                task.priority,
                task.created_at,
                task.placement_attempts,
            )
        };

        if elapsed >= self.config.placement_grace {
            self.finalize_locked(&mut inner, task_id, TaskState::Failed, None, "no_candidates".into(), now);
            return PlacementFollowUp::Failed;
        }

        let backoff_secs = 1u64 << (attempts - 1).min(5); // 1,2,4,8,16,32->capped below
        let backoff = Duration::from_secs(backoff_secs.min(30));
        let created_at_millis = self.millis_since_epoch(&inner, created_at);

        if let Some(task) = inner.tasks.get_mut(task_id) {
            task.next_try_at = now + backoff;
        }
        inner.pending.push(HeapKey { task_id: task_id.to_string(), priority, created_at_millis });
        PlacementFollowUp::Requeued
    }

    /// `pending -> scheduled`: records the chosen subset of candidates as
    /// `assigned_nodes` (spec §4.2, §4.3 redundancy fan-out).
    pub fn begin_dispatch(
        &self,
        task_id: &str,
        candidates: &[NodeId],
        now: Instant,
    ) -> Result<Vec<NodeId>, crate::error::OrchestratorError> {
        let mut inner = self.inner.lock();
        let Some(task) = inner.tasks.get_mut(task_id) else {
            return Err(crate::error::OrchestratorError::TaskNotFound(task_id.to_string()));
        };

        let wanted = task.requirements.redundancy_or_default() as usize;
        let assigned: Vec<NodeId> = candidates.iter().take(wanted).cloned().collect();

        if assigned.is_empty() {
            return Err(crate::error::OrchestratorError::NoCandidates(task_id.to_string()));
        }
        if assigned.len() < wanted && task.requirements.strict_redundancy {
            return Err(crate::error::OrchestratorError::InsufficientRedundancy {
                task_id: task_id.to_string(),
                wanted: wanted as u32,
                found: assigned.len(),
            });
        }

        task.assigned_nodes = assigned.clone();
        task.dispatch_round_nodes = assigned.clone();
        task.state = TaskState::Scheduled;
        task.dispatched_at = Some(now);
        self.events.publish(Event::TaskScheduled {
            task_id: task_id.to_string(),
            nodes: assigned.clone(),
        });
        Ok(assigned)
    }

    /// `scheduled -> running` on the first node acknowledgment.
    pub fn on_node_ack(&self, task_id: &str, node_id: &str) {
        let mut inner = self.inner.lock();
        let Some(task) = inner.tasks.get_mut(task_id) else {
            warn!(task_id, "ack for unknown task dropped");
            return;
        };
        if task.state.is_terminal() {
            warn!(task_id, "late ack for terminal task dropped");
            return;
        }
        if !task.assigned_nodes.iter().any(|n| n == node_id) {
            warn!(task_id, node_id, "ack from unassigned node dropped");
            return;
        }
        task.state = TaskState::Running;
    }

    /// A single assignment failed before the node ever acknowledged it
    /// (spec §4.2 `scheduled -(dispatch error)-> failed`, or a surviving
    /// sibling if this is a redundant dispatch). Distinct from
    /// `on_node_result`, which only applies once a node has acked.
    pub fn on_dispatch_failure(
        &self,
        task_id: &str,
        node_id: &str,
        class: FailureClass,
        message: String,
        now: Instant,
    ) -> ResultFollowUp {
        let mut inner = self.inner.lock();
        let Some(task) = inner.tasks.get_mut(task_id) else {
            return ResultFollowUp::Dropped;
        };
        if task.state.is_terminal() {
            return ResultFollowUp::Dropped;
        }
        task.assigned_nodes.retain(|n| n.as_str() != node_id);
        if !task.assigned_nodes.is_empty() {
            return ResultFollowUp::StillInFlight;
        }
        self.apply_retry_or_fail_locked(&mut inner, task_id, class, message, now)
    }

    /// `running -> completed | failed`, including redundancy fan-in and the
    /// retry policy (spec §4.2).
    pub fn on_node_result(
        &self,
        task_id: &str,
        node_id: &str,
        outcome: TaskOutcome,
        now: Instant,
    ) -> ResultFollowUp {
        let mut inner = self.inner.lock();
        let Some(task) = inner.tasks.get_mut(task_id) else {
            return ResultFollowUp::Dropped;
        };
        if task.state.is_terminal() {
            warn!(task_id, "late result for terminal task dropped");
            return ResultFollowUp::Dropped;
        }
        if !task.assigned_nodes.iter().any(|n| n == node_id) {
            warn!(task_id, node_id, "result from unassigned node dropped");
            return ResultFollowUp::NotAssigned;
        }

        match &outcome.class {
            TaskOutcomeClass::Success => {
                // `assigned_nodes` keeps the full redundant dispatch cohort
                // after completion, not just the node that won the race;
                // siblings are derived from it below before it is left intact.
                let siblings: Vec<NodeId> = task
                    .assigned_nodes
                    .iter()
                    .filter(|n| n.as_str() != node_id)
                    .cloned()
                    .collect();
                task.result = outcome.result;
                let task_id_owned = task_id.to_string();
                self.finalize_locked(&mut inner, &task_id_owned, TaskState::Completed, None, String::new(), now);
                ResultFollowUp::Completed { siblings_to_cancel: siblings }
            }
            TaskOutcomeClass::PermanentError | TaskOutcomeClass::TransientError => {
                let class = match &outcome.class {
                    TaskOutcomeClass::PermanentError => FailureClass::TaskErrorPermanent,
                    TaskOutcomeClass::TransientError => FailureClass::TaskErrorTransient,
                    TaskOutcomeClass::Success => unreachable!(),
                };
                task.assigned_nodes.retain(|n| n.as_str() != node_id);
                if !task.assigned_nodes.is_empty() {
                    // Other redundant attempts are still outstanding.
                    return ResultFollowUp::StillInFlight;
                }

                let message = outcome.error_message.unwrap_or_else(|| class.message().to_string());
                self.apply_retry_or_fail_locked(&mut inner, task_id, class, message, now)
            }
        }
    }

    /// Periodic scan: moves any task whose deadline has passed into the
    /// retry/fail path with class `timeout` (spec §4.2 `tick_deadlines`).
    pub fn tick_deadlines(&self, now: Instant) -> Vec<(TaskId, Vec<NodeId>)> {
        let mut inner = self.inner.lock();
        let expired: Vec<TaskId> = inner
            .tasks
            .values()
            .filter(|t| !t.state.is_terminal() && t.deadline_at <= now)
            .map(|t| t.task_id.clone())
            .collect();

        let mut cancels = Vec::new();
        for task_id in expired {
            let assigned = inner.tasks[&task_id].assigned_nodes.clone();
            self.apply_retry_or_fail_locked(&mut inner, &task_id, FailureClass::Timeout, "timeout".into(), now);
            if !assigned.is_empty() {
                cancels.push((task_id, assigned));
            }
        }
        cancels
    }

    /// Called by the Liveness Monitor when a node goes `offline`: every
    /// non-terminal task still assigned there follows the retry/fail path
    /// with class `node_failure` (spec §4.1, §4.2). Tasks with a surviving
    /// redundant sibling just drop the failed node and carry on.
    pub fn fail_tasks_on_node(&self, node_id: &str, now: Instant) -> Vec<TaskId> {
        let mut inner = self.inner.lock();
        let affected: Vec<TaskId> = inner
            .tasks
            .values()
            .filter(|t| !t.state.is_terminal() && t.assigned_nodes.iter().any(|n| n == node_id))
            .map(|t| t.task_id.clone())
            .collect();

        for task_id in &affected {
            let still_has_siblings = {
                let task = inner.tasks.get_mut(task_id).expect("checked above");
                task.assigned_nodes.retain(|n| n != node_id);
                !task.assigned_nodes.is_empty()
            };
            if !still_has_siblings {
                self.apply_retry_or_fail_locked(
                    &mut inner,
                    task_id,
                    FailureClass::NodeFailure,
                    "node_failure".into(),
                    now,
                );
            }
        }
        affected
    }

    /// Explicit client cancel (spec §4.2 `cancel`, spec §6 `cancel_task`).
    pub fn cancel(&self, task_id: &str, now: Instant) -> CancelResult {
        let mut inner = self.inner.lock();
        let Some(task) = inner.tasks.get(task_id) else {
            return if inner.history.contains(task_id) {
                CancelResult::AlreadyTerminal
            } else {
                CancelResult::NotFound
            };
        };
        let assigned = task.assigned_nodes.clone();
        self.finalize_locked(&mut inner, task_id, TaskState::Cancelled, None, String::new(), now);
        CancelResult::Cancelled(assigned)
    }

    pub fn get(&self, task_id: &str) -> Option<Task> {
        let mut inner = self.inner.lock();
        if let Some(task) = inner.tasks.get(task_id) {
            return Some(task.clone());
        }
        inner.history.get(task_id).map(|summary| Task::from_summary(summary))
    }

    pub fn active_count(&self) -> usize {
        self.inner.lock().tasks.len()
    }

    pub fn pending_depth(&self) -> usize {
        self.inner.lock().pending.len()
    }

    pub fn snapshot_active(&self) -> Vec<Task> {
        self.inner.lock().tasks.values().cloned().collect()
    }

    fn apply_retry_or_fail_locked(
        &self,
        inner: &mut Inner,
        task_id: &str,
        class: FailureClass,
        message: String,
        now: Instant,
    ) -> ResultFollowUp {
        let failed_nodes = inner.tasks[task_id].dispatch_round_nodes.clone();
        let retryable = class.is_retryable();

        let retry_info = {
            let task = inner.tasks.get_mut(task_id).expect("checked above");
            if retryable && task.retry_count < task.max_retries {
                task.retry_count += 1;
                task.requirements.excluded_nodes.extend(failed_nodes);
                task.assigned_nodes.clear();
                task.state = TaskState::Pending;
                let backoff_secs = (1u64 << task.retry_count.min(6)).min(60);
                task.next_try_at = now + Duration::from_secs(backoff_secs);
                Some((task.retry_count, task.priority, task.created_at))
            } else {
                None
            }
        };

        if let Some((retry_count, priority, created_at)) = retry_info {
            let created_at_millis = self.millis_since_epoch(inner, created_at);
            inner.pending.push(HeapKey { task_id: task_id.to_string(), priority, created_at_millis });
            info!(task_id, retry_count, reason = class.message(), "task retrying");
            ResultFollowUp::Requeued
        } else {
            self.finalize_locked(inner, task_id, TaskState::Failed, None, message, now);
            ResultFollowUp::Failed
        }
    }

    fn finalize_locked(
        &self,
        inner: &mut Inner,
        task_id: &str,
        state: TaskState,
        result: Option<serde_json::Value>,
        error_message: String,
        now: Instant,
    ) {
        let Some(mut task) = inner.tasks.remove(task_id) else { return };
        task.state = state.clone();
        task.completed_at = Some(now);
        if result.is_some() {
            task.result = result;
        }
        if !error_message.is_empty() {
            task.error_message = Some(error_message.clone());
        }

        let started = task.dispatched_at.unwrap_or(task.created_at);
        let duration_ms = now.saturating_duration_since(started).as_secs_f64() * 1000.0;

        let summary = task.to_summary();
        inner.history.put(task_id.to_string(), summary);

        let event = match state {
            TaskState::Completed => Event::TaskCompleted {
                task_id: task_id.to_string(),
                callback_url: task.callback_url.clone(),
                duration_ms,
            },
            TaskState::Cancelled => Event::TaskCancelled { task_id: task_id.to_string() },
            _ => Event::TaskFailed {
                task_id: task_id.to_string(),
                error: task.error_message.clone().unwrap_or_default(),
                callback_url: task.callback_url.clone(),
                duration_ms,
            },
        };
        self.events.publish(event);
    }
}

impl Task {
    /// Reconstructs a queryable, terminal-only view from a stripped
    /// history summary (spec §9 open question: input/result are stripped,
    /// everything else survives).
    fn from_summary(summary: &crate::model::TaskSummary) -> Task {
        Task {
            task_id: summary.task_id.clone(),
            task_type: summary.task_type.clone(),
            priority: summary.priority,
            requirements: TaskRequirements::default(),
            input_data: serde_json::Value::Null,
            timeout_seconds: 0,
            max_retries: summary.max_retries,
            retry_count: summary.retry_count,
            assigned_nodes: summary.assigned_nodes.clone(),
            state: summary.state.clone(),
            callback_url: None,
            result: None,
            error_message: summary.error_message.clone(),
            created_at: Instant::now(),
            dispatched_at: None,
            completed_at: None,
            deadline_at: Instant::now(),
            next_try_at: Instant::now(),
            placement_attempts: 0,
            dispatch_round_nodes: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Priority, TaskOutcome, TaskOutcomeClass, TaskRequirements};

    fn engine() -> (TaskEngine, Instant) {
        let epoch = Instant::now();
        (TaskEngine::new(TaskEngineConfig::default(), EventBus::new(), epoch), epoch)
    }

    fn descriptor(priority: Priority) -> TaskDescriptor {
        TaskDescriptor {
            task_id: None,
            task_type: "infer".into(),
            priority,
            requirements: TaskRequirements::default(),
            input_data: serde_json::json!({}),
            timeout_seconds: 30,
            max_retries: 2,
            callback_url: None,
        }
    }

    #[test]
    fn submit_rejects_zero_timeout() {
        let (engine, now) = engine();
        let mut d = descriptor(Priority::Normal);
        d.timeout_seconds = 0;
        assert!(matches!(engine.submit(d, "t1".into(), now), SubmitOutcome::Rejected(_)));
    }

    #[test]
    fn pop_ready_for_placement_skips_tasks_still_backing_off() {
        let (engine, now) = engine();
        engine.submit(descriptor(Priority::Normal), "t1".into(), now);
        let task = engine.pop_ready_for_placement(now).expect("should be ready immediately");
        assert_eq!(task.task_id, "t1");
    }

    #[test]
    fn no_candidates_requeues_then_fails_after_grace() {
        let epoch = Instant::now();
        let config = TaskEngineConfig { placement_grace: Duration::from_secs(2), ..TaskEngineConfig::default() };
        let engine = TaskEngine::new(config, EventBus::new(), epoch);
        engine.submit(descriptor(Priority::Normal), "t1".into(), epoch);

        assert!(matches!(engine.no_candidates_for("t1", epoch), PlacementFollowUp::Requeued));
        assert_eq!(engine.get("t1").unwrap().state, TaskState::Pending);

        let later = epoch + Duration::from_secs(2);
        assert!(matches!(engine.no_candidates_for("t1", later), PlacementFollowUp::Failed));
        let task = engine.get("t1").unwrap();
        assert_eq!(task.state, TaskState::Failed);
        assert_eq!(task.error_message.as_deref(), Some("no_candidates"));
    }

    #[test]
    fn retry_policy_increments_retry_count_and_excludes_node() {
        let (engine, now) = engine();
        engine.submit(descriptor(Priority::Normal), "t1".into(), now);
        engine.begin_dispatch("t1", &["n1".to_string()], now).unwrap();
        engine.on_node_ack("t1", "n1");

        let follow_up = engine.on_dispatch_failure("t1", "n1", FailureClass::NodeFailure, "down".into(), now);
        assert!(matches!(follow_up, ResultFollowUp::Requeued));

        let task = engine.get("t1").unwrap();
        assert_eq!(task.state, TaskState::Pending);
        assert_eq!(task.retry_count, 1);
        assert!(task.requirements.excluded_nodes.contains("n1"));
    }

    #[test]
    fn permanent_error_is_not_retried() {
        let (engine, now) = engine();
        engine.submit(descriptor(Priority::Normal), "t1".into(), now);
        engine.begin_dispatch("t1", &["n1".to_string()], now).unwrap();
        engine.on_node_ack("t1", "n1");

        let outcome = TaskOutcome {
            class: TaskOutcomeClass::PermanentError,
            result: None,
            error_message: Some("bad input".into()),
        };
        let follow_up = engine.on_node_result("t1", "n1", outcome, now);
        assert!(matches!(follow_up, ResultFollowUp::Failed));
        assert_eq!(engine.get("t1").unwrap().state, TaskState::Failed);
    }

    #[test]
    fn redundant_completion_keeps_full_dispatch_cohort_in_assigned_nodes() {
        let (engine, now) = engine();
        let mut d = descriptor(Priority::Normal);
        d.requirements.redundancy = 3;
        engine.submit(d, "t1".into(), now);
        let candidates = vec!["n1".to_string(), "n2".to_string(), "n3".to_string()];
        engine.begin_dispatch("t1", &candidates, now).unwrap();
        for node in &candidates {
            engine.on_node_ack("t1", node);
        }

        let outcome = TaskOutcome { class: TaskOutcomeClass::Success, result: None, error_message: None };
        let follow_up = engine.on_node_result("t1", "n2", outcome, now);
        match follow_up {
            ResultFollowUp::Completed { siblings_to_cancel } => {
                assert_eq!(siblings_to_cancel.len(), 2);
                assert!(siblings_to_cancel.contains(&"n1".to_string()));
                assert!(siblings_to_cancel.contains(&"n3".to_string()));
            }
            _ => panic!("expected Completed"),
        }

        let task = engine.get("t1").unwrap();
        assert_eq!(task.state, TaskState::Completed);
        assert_eq!(task.assigned_nodes.len(), 3);
    }

    #[test]
    fn cancel_on_terminal_task_is_already_terminal() {
        let (engine, now) = engine();
        engine.submit(descriptor(Priority::Normal), "t1".into(), now);
        engine.begin_dispatch("t1", &["n1".to_string()], now).unwrap();
        engine.on_node_ack("t1", "n1");
        let outcome = TaskOutcome { class: TaskOutcomeClass::Success, result: None, error_message: None };
        engine.on_node_result("t1", "n1", outcome, now);

        assert!(matches!(engine.cancel("t1", now), CancelResult::AlreadyTerminal));
    }

    #[test]
    fn rehydrate_pending_preserves_retry_count_and_is_idempotent() {
        let (engine, now) = engine();
        let summary = crate::model::TaskSummary {
            task_id: "t1".into(),
            task_type: "infer".into(),
            priority: Priority::Normal,
            state: TaskState::Running,
            assigned_nodes: vec!["n1".to_string()],
            retry_count: 1,
            max_retries: 2,
            error_message: None,
        };
        engine.rehydrate_pending(&summary, 30, now);
        let task = engine.get("t1").unwrap();
        assert_eq!(task.state, TaskState::Pending);
        assert_eq!(task.retry_count, 1);
        assert_eq!(task.max_retries, 2);

        // Re-running recovery after the task is already known is a no-op.
        engine.rehydrate_pending(&summary, 30, now);
        assert_eq!(engine.active_count(), 1);
    }
}
