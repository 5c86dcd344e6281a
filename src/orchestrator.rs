//! The top-level handle: wires Registry, Task Engine, Placement Engine,
//! Dispatcher, Liveness Monitor, Metrics Aggregator, Event Bus, and Store
//! together and exposes the external interface from spec §6.
//!
//! Generic over `NodeTransport` the same way the Dispatcher is: the
//! default binary instantiates `Orchestrator<NullTransport>`; a real
//! deployment would swap in an HTTP/gRPC transport without touching this
//! module.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::clock::SharedClock;
use crate::config::{ConfigPatch, OrchestratorConfig};
use crate::dispatcher::{DispatchConfig, DispatchDescriptor, DispatchErrorClass, Dispatcher, NodeTransport};
use crate::error::{OrchestratorError, Result};
use crate::events::EventBus;
use crate::liveness::{LivenessConfig, LivenessMonitor};
use crate::metrics_aggregator::MetricsAggregator;
use crate::model::{
    NetworkMetricsSnapshot, Node, NodeDescriptor, NodeId, NodeStatus, Task, TaskDescriptor, TaskId,
    TaskOutcome, TaskState,
};
use crate::placement::{PlacementConfig, PlacementEngine, PlacementStats, PlacementWeights};
use crate::registry::Registry;
use crate::store::Store;
use crate::task_engine::{CancelResult, PlacementFollowUp, ResultFollowUp, SubmitOutcome, TaskEngine, TaskEngineConfig};

#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub state: Option<TaskState>,
    pub offset: usize,
    pub limit: usize,
}

#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
}

#[derive(Debug, Clone)]
pub struct OrchestratorStatus {
    pub total_nodes: usize,
    pub nodes_by_status: std::collections::HashMap<String, usize>,
    pub pending_tasks: usize,
    pub active_tasks: usize,
    pub network_metrics: NetworkMetricsSnapshot,
}

pub enum ReportResult {
    Ok,
    Unknown,
    NotAssigned,
}

pub struct Orchestrator<T: NodeTransport> {
    config: RwLock<OrchestratorConfig>,
    clock: SharedClock,
    registry: Registry,
    task_engine: Arc<TaskEngine>,
    placement: RwLock<Arc<PlacementEngine>>,
    placement_stats: Arc<PlacementStats>,
    dispatcher: Arc<Dispatcher<T>>,
    liveness: Arc<LivenessMonitor>,
    metrics: Arc<MetricsAggregator>,
    events: EventBus,
    store: Arc<dyn Store>,
}

impl<T: NodeTransport> Orchestrator<T> {
    pub fn new(config: OrchestratorConfig, transport: Arc<T>, store: Arc<dyn Store>, clock: SharedClock) -> Arc<Self> {
        let events = EventBus::new();
        let registry = Registry::new(clock.clone());
        let placement_stats = Arc::new(PlacementStats::new());

        let placement_config = PlacementConfig {
            algorithm: config.network.load_balance_algorithm,
            allow_degraded: config.placement.allow_degraded,
            top_n: config.placement.top_n,
            weights: PlacementWeights {
                cpu: config.placement.weight_cpu,
                mem: config.placement.weight_mem,
                gpu: config.placement.weight_gpu,
            },
        };
        let placement = Arc::new(PlacementEngine::new(placement_config, placement_stats.clone()));

        let dispatch_config = DispatchConfig::default();
        let dispatcher = Arc::new(Dispatcher::new(transport, dispatch_config, placement_stats.clone()));

        let task_engine_config = TaskEngineConfig {
            max_pending: config.queue.max_pending,
            high_water_fraction: config.queue.high_water_fraction,
            placement_grace: Duration::from_secs(config.task.placement_grace_seconds),
            history_limit: config.task.history_limit,
        };
        let task_engine = Arc::new(TaskEngine::new(task_engine_config, events.clone(), clock.now()));

        let liveness_config = LivenessConfig {
            heartbeat_interval: Duration::from_secs(config.orchestrator.heartbeat_interval_seconds),
            degraded_factor: config.liveness.degraded_factor,
            offline_factor: config.liveness.offline_factor,
            sweep_interval: Duration::from_secs(config.liveness.sweep_interval_seconds),
        };
        let liveness = Arc::new(LivenessMonitor::new(registry.clone(), events.clone(), liveness_config));

        let metrics = Arc::new(MetricsAggregator::new(
            registry.clone(),
            task_engine.clone(),
            events.clone(),
            Duration::from_secs(300),
        ));

        Arc::new(Self {
            config: RwLock::new(config),
            clock,
            registry,
            task_engine,
            placement: RwLock::new(placement),
            placement_stats,
            dispatcher,
            liveness,
            metrics,
            events,
            store,
        })
    }

    pub fn events(&self) -> EventBus {
        self.events.clone()
    }

    pub fn task_engine(&self) -> Arc<TaskEngine> {
        self.task_engine.clone()
    }

    pub fn liveness(&self) -> Arc<LivenessMonitor> {
        self.liveness.clone()
    }

    pub fn metrics(&self) -> Arc<MetricsAggregator> {
        self.metrics.clone()
    }

    pub fn placement_stats(&self) -> Arc<PlacementStats> {
        self.placement_stats.clone()
    }

    /// Crash recovery (spec §6): rebuilds the Registry from the store and
    /// re-surfaces any task whose terminal state couldn't be confirmed as
    /// `pending`, retry count preserved. A no-op against `InMemoryStore`,
    /// which never survives a process restart to recover from.
    pub async fn recover(&self) {
        let nodes = self.store.load_nodes().await;
        for node in nodes {
            if let Err(err) = self.registry.register(node) {
                warn!(%err, "failed to rehydrate node from store");
            }
        }

        let default_timeout = self.config.read().orchestrator.task_default_timeout_seconds;
        let now = self.clock.now();
        for summary in self.store.load_unconfirmed_tasks().await {
            self.task_engine.rehydrate_pending(&summary, default_timeout, now);
        }
    }

    pub fn registry(&self) -> Registry {
        self.registry.clone()
    }

    // ---- Inbound (node -> core), spec §6 --------------------------------

    pub async fn register_node(&self, descriptor: NodeDescriptor) -> Result<()> {
        let max_nodes = self.config.read().network.max_nodes;
        if self.registry.len() >= max_nodes && self.registry.get(&descriptor.node_id).is_none() {
            return Err(OrchestratorError::Overloaded("max_nodes reached".into()));
        }
        self.registry.register(descriptor.clone())?;
        self.store.save_node(descriptor.clone()).await;
        self.events.publish(crate::events::Event::NodeRegistered { node_id: descriptor.node_id });
        Ok(())
    }

    pub fn heartbeat(&self, node_id: &str, sample: crate::model::ResourceSample) -> Result<()> {
        self.registry.heartbeat(node_id, sample)
    }

    pub fn set_node_status(&self, node_id: &str, status: NodeStatus) -> Result<()> {
        self.registry.set_status(node_id, status, false)
    }

    pub async fn unregister_node(&self, node_id: &str) -> Result<()> {
        match self.registry.unregister(node_id) {
            Some(_) => {
                self.store.remove_node(node_id).await;
                self.events.publish(crate::events::Event::NodeUnregistered { node_id: node_id.to_string() });
                Ok(())
            }
            None => Err(OrchestratorError::NodeNotFound(node_id.to_string())),
        }
    }

    pub fn report_task_result(&self, task_id: &str, node_id: &str, outcome: TaskOutcome) -> ReportResult {
        let now = self.clock.now();
        match self.task_engine.on_node_result(task_id, node_id, outcome, now) {
            ResultFollowUp::Dropped => ReportResult::Unknown,
            ResultFollowUp::NotAssigned => ReportResult::NotAssigned,
            ResultFollowUp::StillInFlight | ResultFollowUp::Requeued | ResultFollowUp::Failed => {
                self.record_node_outcome(node_id, false);
                ReportResult::Ok
            }
            ResultFollowUp::Completed { siblings_to_cancel } => {
                self.record_node_outcome(node_id, true);
                for sibling in siblings_to_cancel {
                    self.spawn_cancel(task_id.to_string(), sibling);
                }
                ReportResult::Ok
            }
        }
    }

    /// Updates the node's reliability EWMA and releases the active-dispatch
    /// slot this node's assignment was holding (spec §4.3 `least_connections`
    /// needs `active_count` to reflect real in-flight load, not just ever-
    /// dispatched load).
    fn record_node_outcome(&self, node_id: &str, success: bool) {
        self.registry.record_task_outcome(node_id, success, 0.1);
        self.placement_stats.decr_active(node_id);
    }

    // ---- Inbound (client -> core), spec §6 -------------------------------

    pub fn submit_task(&self, mut descriptor: TaskDescriptor) -> Result<TaskId> {
        if descriptor.timeout_seconds == 0 {
            descriptor.timeout_seconds = self.config.read().orchestrator.task_default_timeout_seconds;
        }
        if descriptor.max_retries == 0 {
            descriptor.max_retries = self.config.read().task.max_retries_default;
        }
        let task_id = descriptor.task_id.clone().unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        match self.task_engine.submit(descriptor, task_id, self.clock.now()) {
            SubmitOutcome::Accepted(id) => Ok(id),
            SubmitOutcome::Rejected("overloaded") => Err(OrchestratorError::Overloaded("pending queue full".into())),
            SubmitOutcome::Rejected(reason) => Err(OrchestratorError::InvalidInput(reason.to_string())),
        }
    }

    pub fn get_task(&self, task_id: &str) -> Option<Task> {
        self.task_engine.get(task_id)
    }

    pub fn list_tasks(&self, filter: TaskFilter) -> Page<Task> {
        let mut tasks: Vec<Task> = self.task_engine.snapshot_active();
        if let Some(state) = &filter.state {
            tasks.retain(|t| &t.state == state);
        }
        tasks.sort_by(|a, b| a.task_id.cmp(&b.task_id));
        let total = tasks.len();
        let limit = if filter.limit == 0 { total } else { filter.limit };
        let items = tasks.into_iter().skip(filter.offset).take(limit).collect();
        Page { items, total }
    }

    pub fn cancel_task(&self, task_id: &str) -> CancelResult {
        let result = self.task_engine.cancel(task_id, self.clock.now());
        if let CancelResult::Cancelled(nodes) = &result {
            for node in nodes {
                self.spawn_cancel(task_id.to_string(), node.clone());
            }
        }
        result
    }

    pub fn get_status(&self) -> OrchestratorStatus {
        let nodes = self.registry.snapshot();
        let mut nodes_by_status = std::collections::HashMap::new();
        for node in &nodes {
            *nodes_by_status.entry(NetworkMetricsSnapshot::status_key(node.status).to_string()).or_insert(0) += 1;
        }
        OrchestratorStatus {
            total_nodes: nodes.len(),
            nodes_by_status,
            pending_tasks: self.task_engine.pending_depth(),
            active_tasks: self.task_engine.active_count(),
            network_metrics: self.metrics.snapshot(),
        }
    }

    pub fn get_metrics(&self) -> NetworkMetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn get_config(&self) -> OrchestratorConfig {
        self.config.read().clone()
    }

    /// Mutable fields are limited to placement algorithm, thresholds, and
    /// max/min nodes (spec §6).
    pub async fn update_config(&self, patch: ConfigPatch) {
        {
            let mut config = self.config.write();
            config.apply_patch(patch.clone());
        }
        let config = self.config.read().clone();

        let placement_config = PlacementConfig {
            algorithm: config.network.load_balance_algorithm,
            allow_degraded: config.placement.allow_degraded,
            top_n: config.placement.top_n,
            weights: PlacementWeights {
                cpu: config.placement.weight_cpu,
                mem: config.placement.weight_mem,
                gpu: config.placement.weight_gpu,
            },
        };
        *self.placement.write() = Arc::new(PlacementEngine::new(placement_config, self.placement_stats.clone()));
        self.liveness.update_thresholds(config.liveness.degraded_factor, config.liveness.offline_factor);

        self.store.save_config_patch(patch).await;
        info!("configuration updated");
    }

    // ---- Background work -------------------------------------------------

    fn node(&self, node_id: &str) -> Option<Node> {
        self.registry.get(node_id)
    }

    /// One pass of the dispatch worker: drains every pending task that's
    /// ready for a placement attempt and fans its assignment(s) out
    /// (spec §4.2 `dispatch_tick`).
    pub fn dispatch_tick_once(self: &Arc<Self>) {
        let now = self.clock.now();
        loop {
            let Some(task) = self.task_engine.pop_ready_for_placement(now) else { break };
            let nodes = self.registry.snapshot();
            let candidates = self.placement.read().select(&nodes, &task.requirements);

            if candidates.is_empty() {
                self.task_engine.no_candidates_for(&task.task_id, now);
                continue;
            }

            match self.task_engine.begin_dispatch(&task.task_id, &candidates, now) {
                Ok(assigned) => {
                    let descriptor = Arc::new(DispatchDescriptor::from_task(&task));
                    for node_id in assigned {
                        self.spawn_dispatch(task.task_id.clone(), node_id, descriptor.clone());
                    }
                }
                Err(err) => {
                    warn!(task_id = %task.task_id, %err, "begin_dispatch rejected candidates");
                    self.task_engine.no_candidates_for(&task.task_id, now);
                }
            }
        }
    }

    /// Runs the dispatch attempt on its own worker task so a panic inside
    /// `dispatch_one` is caught at the worker boundary rather than taking
    /// the supervising task down with it: a panicked join is reported back
    /// to the Task Engine as `network_error` for the assignment that worker
    /// owned, same as any other transport failure (spec §7).
    fn spawn_dispatch(self: &Arc<Self>, task_id: TaskId, node_id: NodeId, descriptor: Arc<DispatchDescriptor>) {
        let this = self.clone();
        tokio::spawn(async move {
            let worker = {
                let this = this.clone();
                let node_id = node_id.clone();
                tokio::spawn(async move { this.dispatcher.dispatch_one(&node_id, &descriptor).await })
            };
            let now = this.clock.now();

            match worker.await {
                Ok(Ok(())) => {
                    this.task_engine.on_node_ack(&task_id, &node_id);
                }
                Ok(Err(class)) => {
                    let (failure, message) = match class {
                        DispatchErrorClass::NetworkError => {
                            (crate::task_engine::FailureClass::NetworkError, "network_error".to_string())
                        }
                        DispatchErrorClass::NodeUnavailable => {
                            (crate::task_engine::FailureClass::NetworkError, "node_unavailable".to_string())
                        }
                        DispatchErrorClass::NodeRejected => {
                            (crate::task_engine::FailureClass::NodeRejected, "node_rejected".to_string())
                        }
                    };
                    this.task_engine.on_dispatch_failure(&task_id, &node_id, failure, message, now);
                }
                Err(join_err) => {
                    warn!(task_id = %task_id, node_id = %node_id, %join_err, "dispatch worker panicked");
                    this.task_engine.on_dispatch_failure(
                        &task_id,
                        &node_id,
                        crate::task_engine::FailureClass::NetworkError,
                        "network_error: dispatch worker panicked".to_string(),
                        now,
                    );
                }
            }
        });
    }

    fn spawn_cancel(self: &Arc<Self>, task_id: TaskId, node_id: NodeId) {
        let this = self.clone();
        tokio::spawn(async move {
            this.dispatcher.cancel(&node_id, &task_id).await;
        });
    }

    /// Periodic deadline scan plus any best-effort cancels it produces
    /// (spec §4.2 `tick_deadlines`).
    pub fn tick_deadlines_once(self: &Arc<Self>) {
        let now = self.clock.now();
        for (task_id, nodes) in self.task_engine.tick_deadlines(now) {
            for node_id in nodes {
                self.spawn_cancel(task_id.clone(), node_id);
            }
        }
    }

    /// Runs the dispatch and deadline sweep loops until cancelled. Liveness
    /// and metrics run their own loops (`LivenessMonitor::run`,
    /// `MetricsAggregator::run`) spawned alongside this one.
    pub async fn run_core_loops(self: Arc<Self>, cancel: CancellationToken) {
        let mut dispatch_ticker = tokio::time::interval(Duration::from_millis(50));
        let mut deadline_ticker = tokio::time::interval(Duration::from_secs(1));
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("orchestrator core loops shutting down");
                    return;
                }
                _ = dispatch_ticker.tick() => self.dispatch_tick_once(),
                _ = deadline_ticker.tick() => self.tick_deadlines_once(),
            }
        }
    }

    /// Writes terminal task records through to the store as they finalize
    /// (spec §6: "the core writes node registrations, terminal task
    /// records, and configuration changes through"). Subscribes to the
    /// Event Bus rather than hooking `finalize_locked` directly, so the
    /// store write never happens on the Task Engine's lock-holding thread.
    pub async fn run_store_sync(self: Arc<Self>, cancel: CancellationToken) {
        let mut rx = self.events.subscribe();
        loop {
            tokio::select! {
                () = cancel.cancelled() => return,
                received = rx.recv() => {
                    use crate::events::Event;
                    match received {
                        Ok(Event::TaskCompleted { task_id, .. })
                        | Ok(Event::TaskFailed { task_id, .. })
                        | Ok(Event::TaskCancelled { task_id }) => {
                            if let Some(task) = self.task_engine.get(&task_id) {
                                self.store.save_terminal_task(task.to_summary()).await;
                            }
                        }
                        Ok(_) => {}
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "store sync lagged behind the event bus");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                    }
                }
            }
        }
    }
}
