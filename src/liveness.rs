//! Passive heartbeat-age sweep that drives node status transitions and
//! surfaces node failures to the Task Engine (spec §4.5).
//!
//! Grounded on the cluster health monitor's passive heartbeat check: a
//! ticking `tokio::interval` racing a `CancellationToken` in `select!`, with
//! the actual check split out into a standalone, directly testable function
//! (here `sweep_once`) so the retry/threshold logic never needs a real
//! sleep in tests.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::clock::SharedClock;
use crate::events::{Event, EventBus};
use crate::model::NodeStatus;
use crate::registry::Registry;
use crate::task_engine::TaskEngine;

#[derive(Debug, Clone)]
pub struct LivenessConfig {
    pub heartbeat_interval: Duration,
    pub degraded_factor: f64,
    pub offline_factor: f64,
    pub sweep_interval: Duration,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(10),
            degraded_factor: 1.5,
            offline_factor: 3.0,
            sweep_interval: Duration::from_secs(10),
        }
    }
}

impl LivenessConfig {
    fn degraded_threshold(&self) -> Duration {
        self.heartbeat_interval.mul_f64(self.degraded_factor)
    }

    fn offline_threshold(&self) -> Duration {
        self.heartbeat_interval.mul_f64(self.offline_factor)
    }
}

pub struct LivenessMonitor {
    registry: Registry,
    events: EventBus,
    config: RwLock<LivenessConfig>,
}

impl LivenessMonitor {
    pub fn new(registry: Registry, events: EventBus, config: LivenessConfig) -> Self {
        Self { registry, events, config: RwLock::new(config) }
    }

    /// Applies a `degraded_factor`/`offline_factor` change from
    /// `update_config` (spec §6) to the next sweep.
    pub fn update_thresholds(&self, degraded_factor: f64, offline_factor: f64) {
        let mut config = self.config.write();
        config.degraded_factor = degraded_factor;
        config.offline_factor = offline_factor;
    }

    /// One pass over the registry (spec §4.5 thresholds):
    /// - age >= offline_threshold: `-> offline`, emits `node_offline`.
    /// - degraded_threshold <= age < offline_threshold: `active -> degraded`.
    /// - age < degraded_threshold: heals a monitor-caused `degraded` back to
    ///   `active` (heartbeat already heals `offline`, so this only covers
    ///   nodes that never stopped heartbeating but briefly looked degraded).
    ///
    /// `maintenance` and `error` are never touched: operator-owned, sticky
    /// statuses per spec §4.1.
    ///
    /// Returns the node ids that transitioned to `offline` this pass, for
    /// the caller to fail their in-flight tasks via the Task Engine.
    pub fn sweep_once(&self, now: Instant) -> Vec<String> {
        let config = self.config.read().clone();
        let degraded_at = config.degraded_threshold();
        let offline_at = config.offline_threshold();
        let mut newly_offline = Vec::new();

        for node in self.registry.snapshot() {
            if matches!(node.status, NodeStatus::Maintenance | NodeStatus::Error) {
                continue;
            }
            let age = now.saturating_duration_since(node.last_heartbeat_at);

            let target = if age >= offline_at {
                Some(NodeStatus::Offline)
            } else if age >= degraded_at {
                Some(NodeStatus::Degraded)
            } else if node.liveness_only && node.status == NodeStatus::Degraded {
                Some(NodeStatus::Active)
            } else {
                None
            };

            let Some(target) = target else { continue };
            if target == node.status {
                continue;
            }

            match self.registry.set_status(&node.node_id, target, true) {
                Ok(()) => {
                    info!(node_id = %node.node_id, from = ?node.status, to = ?target, age_secs = age.as_secs(), "liveness transition");
                    self.events.publish(Event::NodeStatusChanged {
                        node_id: node.node_id.clone(),
                        from: node.status,
                        to: target,
                    });
                    if target == NodeStatus::Offline {
                        self.events.publish(Event::NodeOffline { node_id: node.node_id.clone() });
                        newly_offline.push(node.node_id.clone());
                    }
                }
                Err(err) => {
                    warn!(node_id = %node.node_id, %err, "liveness-driven transition rejected");
                }
            }
        }

        newly_offline
    }

    /// Runs the sweep on a ticker until cancelled, failing over any task
    /// assigned to a node that just went offline (spec §4.2, §4.5).
    pub async fn run(self: Arc<Self>, task_engine: Arc<TaskEngine>, clock: SharedClock, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.read().sweep_interval);
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("liveness monitor shutting down");
                    return;
                }
                _ = ticker.tick() => {
                    let now = clock.now();
                    for node_id in self.sweep_once(now) {
                        let affected = task_engine.fail_tasks_on_node(&node_id, now);
                        if !affected.is_empty() {
                            warn!(node_id = %node_id, tasks = affected.len(), "failed over tasks from offline node");
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, FakeClock};
    use crate::model::{NodeDescriptor, ResourceSample};
    use std::collections::HashSet;
    use std::sync::Arc;

    fn desc(id: &str) -> NodeDescriptor {
        NodeDescriptor {
            node_id: id.to_string(),
            endpoint: format!("{id}:9000"),
            node_type: "worker".into(),
            capabilities: HashSet::new(),
            version: "1".into(),
            location: "local".into(),
            metadata: Default::default(),
            agents: Vec::new(),
        }
    }

    fn monitor(registry: &Registry) -> LivenessMonitor {
        LivenessMonitor::new(
            registry.clone(),
            EventBus::new(),
            LivenessConfig {
                heartbeat_interval: Duration::from_secs(10),
                degraded_factor: 1.5,
                offline_factor: 3.0,
                sweep_interval: Duration::from_secs(10),
            },
        )
    }

    #[test]
    fn healthy_node_is_untouched() {
        let clock = Arc::new(FakeClock::new());
        let registry = Registry::new(clock.clone());
        registry.register(desc("n1")).unwrap();

        let m = monitor(&registry);
        let offline = m.sweep_once(clock.now());
        assert!(offline.is_empty());
        assert_eq!(registry.get("n1").unwrap().status, NodeStatus::Active);
    }

    #[test]
    fn stale_node_degrades_then_goes_offline() {
        let clock = Arc::new(FakeClock::new());
        let registry = Registry::new(clock.clone());
        registry.register(desc("n1")).unwrap();
        let m = monitor(&registry);

        clock.advance(Duration::from_secs(16)); // >= 1.5x10s, < 3x10s
        assert!(m.sweep_once(clock.now()).is_empty());
        assert_eq!(registry.get("n1").unwrap().status, NodeStatus::Degraded);

        clock.advance(Duration::from_secs(20)); // total age 36s >= 30s
        let offline = m.sweep_once(clock.now());
        assert_eq!(offline, vec!["n1".to_string()]);
        assert_eq!(registry.get("n1").unwrap().status, NodeStatus::Offline);
    }

    #[test]
    fn maintenance_node_is_never_swept() {
        let clock = Arc::new(FakeClock::new());
        let registry = Registry::new(clock.clone());
        registry.register(desc("n1")).unwrap();
        registry.set_status("n1", NodeStatus::Maintenance, false).unwrap();
        let m = monitor(&registry);

        clock.advance(Duration::from_secs(3600));
        assert!(m.sweep_once(clock.now()).is_empty());
        assert_eq!(registry.get("n1").unwrap().status, NodeStatus::Maintenance);
    }
}
