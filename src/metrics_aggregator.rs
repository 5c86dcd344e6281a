//! Network-wide rolling metrics (spec §4.6): throughput, success rate, and
//! response-time percentiles over a sliding window, plus a point-in-time
//! snapshot combining registry and task-engine state.
//!
//! Completion samples are collected by subscribing to the `EventBus`
//! (spec §4.7 names the Metrics Aggregator as its canonical subscriber);
//! the rolling window is a plain `VecDeque`, trimmed lazily on read rather
//! than by a separate timer. Every sample is also recorded into the
//! process-wide `metrics` registry so the same numbers are visible at
//! `/metrics` (spec §11 observability).

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::trace;

use crate::events::{Event, EventBus};
use crate::model::NetworkMetricsSnapshot;
use crate::registry::Registry;
use crate::task_engine::TaskEngine;

struct CompletionSample {
    at: Instant,
    duration_ms: f64,
    success: bool,
}

pub struct MetricsAggregator {
    registry: Registry,
    task_engine: std::sync::Arc<TaskEngine>,
    events: EventBus,
    window: Duration,
    samples: Mutex<VecDeque<CompletionSample>>,
}

impl MetricsAggregator {
    pub fn new(
        registry: Registry,
        task_engine: std::sync::Arc<TaskEngine>,
        events: EventBus,
        window: Duration,
    ) -> Self {
        Self {
            registry,
            task_engine,
            events,
            window,
            samples: Mutex::new(VecDeque::new()),
        }
    }

    /// Drains terminal-task events from the bus until the sender is
    /// dropped (never, in practice) or the receiver lags. Intended to run
    /// as a background task for the lifetime of the process.
    pub async fn run(&self) {
        let mut rx = self.events.subscribe();
        loop {
            match rx.recv().await {
                Ok(Event::TaskCompleted { duration_ms, .. }) => self.record(duration_ms, true),
                Ok(Event::TaskFailed { duration_ms, .. }) => self.record(duration_ms, false),
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    trace!(skipped, "metrics aggregator lagged behind the event bus");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
            }
        }
    }

    fn record(&self, duration_ms: f64, success: bool) {
        let now = Instant::now();
        metrics::counter!("orchestrator_tasks_finalized_total", "success" => success.to_string()).increment(1);
        metrics::histogram!("orchestrator_task_duration_ms").record(duration_ms);

        let mut samples = self.samples.lock();
        samples.push_back(CompletionSample { at: now, duration_ms, success });
        Self::evict_stale(&mut samples, now, self.window);
    }

    fn evict_stale(samples: &mut VecDeque<CompletionSample>, now: Instant, window: Duration) {
        while let Some(front) = samples.front() {
            if now.saturating_duration_since(front.at) > window {
                samples.pop_front();
            } else {
                break;
            }
        }
    }

    /// Builds a fresh snapshot: node/task state distributions come straight
    /// from the Registry/Task Engine; throughput and latency come from the
    /// rolling window (spec §4.6).
    pub fn snapshot(&self) -> NetworkMetricsSnapshot {
        let now = Instant::now();
        let nodes = self.registry.snapshot();
        let mut nodes_by_status = std::collections::HashMap::new();
        for node in &nodes {
            *nodes_by_status
                .entry(NetworkMetricsSnapshot::status_key(node.status).to_string())
                .or_insert(0)
                += 1;
        }

        let active_tasks = self.task_engine.snapshot_active();
        let mut tasks_by_state = std::collections::HashMap::new();
        for task in &active_tasks {
            *tasks_by_state
                .entry(NetworkMetricsSnapshot::state_key(&task.state).to_string())
                .or_insert(0)
                += 1;
        }

        let mut samples = self.samples.lock();
        Self::evict_stale(&mut samples, now, self.window);

        let total = samples.len();
        let (throughput_per_minute, success_rate, avg_response_time_ms, p95_response_time_ms) = if total == 0 {
            (0.0, 1.0, 0.0, 0.0)
        } else {
            let successes = samples.iter().filter(|s| s.success).count();
            let mut durations: Vec<f64> = samples.iter().map(|s| s.duration_ms).collect();
            durations.sort_by(|a, b| a.partial_cmp(b).unwrap());
            let avg = durations.iter().sum::<f64>() / total as f64;
            let p95_index = ((total as f64) * 0.95).ceil() as usize;
            let p95 = durations[p95_index.saturating_sub(1).min(total - 1)];
            let minutes = (self.window.as_secs_f64() / 60.0).max(1.0 / 60.0);
            (total as f64 / minutes, successes as f64 / total as f64, avg, p95)
        };

        let aggregate_utilization = if nodes.is_empty() {
            0.0
        } else {
            nodes.iter().map(|n| 1.0 - n.resource_sample.load_score as f64).sum::<f64>() / nodes.len() as f64
        };

        NetworkMetricsSnapshot {
            total_nodes: nodes.len(),
            nodes_by_status,
            tasks_by_state,
            throughput_per_minute,
            success_rate,
            avg_response_time_ms,
            p95_response_time_ms,
            aggregate_utilization,
        }
    }
}
