//! Delivers scheduled tasks to their assigned node(s) (spec §4.4).
//!
//! The wire protocol to a Node is out of scope (spec §1): `NodeTransport` is
//! the seam a thin HTTP/gRPC adapter would implement. Only an in-memory test
//! double ships with this crate.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::{info, warn};

use crate::model::{NodeId, Task, TaskId};
use crate::placement::PlacementStats;

#[derive(Debug, Clone)]
pub enum DispatchErrorClass {
    NetworkError,
    NodeUnavailable,
    NodeRejected,
}

#[derive(Debug, Clone)]
pub struct DispatchDescriptor {
    pub task_id: TaskId,
    pub task_type: String,
    pub input_data: serde_json::Value,
    pub deadline: Duration,
}

impl DispatchDescriptor {
    pub fn from_task(task: &Task) -> Self {
        Self {
            task_id: task.task_id.clone(),
            task_type: task.task_type.clone(),
            input_data: task.input_data.clone(),
            deadline: Duration::from_secs(task.timeout_seconds.max(1)),
        }
    }
}

/// The node-facing wire protocol. Out of scope to implement for real (§1);
/// this is the trait boundary a transport adapter plugs into.
#[async_trait]
pub trait NodeTransport: Send + Sync + 'static {
    async fn dispatch(&self, node_id: &str, task: &DispatchDescriptor) -> Result<(), DispatchErrorClass>;
    async fn cancel(&self, node_id: &str, task_id: &str);
}

/// Always-accepts test double used by the in-process test suite and the
/// default binary (no real node fleet wired up).
pub struct NullTransport;

#[async_trait]
impl NodeTransport for NullTransport {
    async fn dispatch(&self, _node_id: &str, _task: &DispatchDescriptor) -> Result<(), DispatchErrorClass> {
        Ok(())
    }

    async fn cancel(&self, _node_id: &str, _task_id: &str) {}
}

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub dispatch_timeout: Duration,
    pub dispatch_retries: u32,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            dispatch_timeout: Duration::from_secs(10),
            dispatch_retries: 2,
        }
    }
}

pub struct Dispatcher<T: NodeTransport> {
    transport: Arc<T>,
    config: DispatchConfig,
    stats: Arc<PlacementStats>,
}

impl<T: NodeTransport> Dispatcher<T> {
    pub fn new(transport: Arc<T>, config: DispatchConfig, stats: Arc<PlacementStats>) -> Self {
        Self { transport, config, stats }
    }

    /// Delivers one assignment with in-line retry and jittered backoff
    /// (spec §4.4). Returns `Ok(())` on node acceptance.
    pub async fn dispatch_one(
        &self,
        node_id: &NodeId,
        descriptor: &DispatchDescriptor,
    ) -> Result<(), DispatchErrorClass> {
        let started = std::time::Instant::now();
        let mut attempt = 0;
        loop {
            let outcome = tokio::time::timeout(
                self.config.dispatch_timeout,
                self.transport.dispatch(node_id, descriptor),
            )
            .await;

            match outcome {
                Ok(Ok(())) => {
                    let rtt = started.elapsed().as_secs_f64() * 1000.0;
                    self.stats.record_rtt(node_id, rtt, 0.2);
                    self.stats.incr_active(node_id);
                    info!(node_id = %node_id, task_id = %descriptor.task_id, "dispatch accepted");
                    return Ok(());
                }
                Ok(Err(DispatchErrorClass::NodeRejected)) => {
                    warn!(node_id = %node_id, task_id = %descriptor.task_id, "node rejected task");
                    return Err(DispatchErrorClass::NodeRejected);
                }
                Ok(Err(_)) | Err(_) => {
                    attempt += 1;
                    if attempt > self.config.dispatch_retries {
                        warn!(node_id = %node_id, task_id = %descriptor.task_id, "dispatch exhausted retries");
                        return Err(DispatchErrorClass::NodeUnavailable);
                    }
                    let backoff = jittered_backoff(attempt);
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    pub async fn cancel(&self, node_id: &NodeId, task_id: &str) {
        self.transport.cancel(node_id, task_id).await;
        self.stats.decr_active(node_id);
    }
}

fn jittered_backoff(attempt: u32) -> Duration {
    let base_millis = 100u64.saturating_mul(1u64 << attempt.min(10));
    let jitter = rand::thread_rng().gen_range(0..=base_millis / 4 + 1);
    Duration::from_millis(base_millis + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn descriptor() -> DispatchDescriptor {
        DispatchDescriptor {
            task_id: "t1".into(),
            task_type: "infer".into(),
            input_data: serde_json::json!({}),
            deadline: Duration::from_secs(30),
        }
    }

    struct FlakyTransport {
        failures_remaining: AtomicU32,
    }

    #[async_trait]
    impl NodeTransport for FlakyTransport {
        async fn dispatch(&self, _node_id: &str, _task: &DispatchDescriptor) -> Result<(), DispatchErrorClass> {
            if self.failures_remaining.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)).is_ok() {
                Err(DispatchErrorClass::NetworkError)
            } else {
                Ok(())
            }
        }
        async fn cancel(&self, _node_id: &str, _task_id: &str) {}
    }

    struct RejectingTransport;

    #[async_trait]
    impl NodeTransport for RejectingTransport {
        async fn dispatch(&self, _node_id: &str, _task: &DispatchDescriptor) -> Result<(), DispatchErrorClass> {
            Err(DispatchErrorClass::NodeRejected)
        }
        async fn cancel(&self, _node_id: &str, _task_id: &str) {}
    }

    #[tokio::test]
    async fn null_transport_succeeds_on_first_try() {
        let dispatcher = Dispatcher::new(Arc::new(NullTransport), DispatchConfig::default(), Arc::new(PlacementStats::new()));
        let result = dispatcher.dispatch_one(&"n1".to_string(), &descriptor()).await;
        assert!(result.is_ok());
        assert_eq!(dispatcher.stats.active_count("n1"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_failures_then_succeeds() {
        let transport = Arc::new(FlakyTransport { failures_remaining: AtomicU32::new(1) });
        let dispatcher = Dispatcher::new(transport, DispatchConfig::default(), Arc::new(PlacementStats::new()));

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            dispatcher.dispatch_one(&"n1".to_string(), &descriptor()),
        )
        .await
        .expect("dispatch_one should resolve once time is advanced past the backoff");
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn node_rejection_is_not_retried() {
        let dispatcher = Dispatcher::new(Arc::new(RejectingTransport), DispatchConfig::default(), Arc::new(PlacementStats::new()));
        let result = dispatcher.dispatch_one(&"n1".to_string(), &descriptor()).await;
        assert!(matches!(result, Err(DispatchErrorClass::NodeRejected)));
    }
}
