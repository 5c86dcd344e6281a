//! Fan-out of lifecycle and topology events to subscribers (spec §4.7).
//!
//! A thin wrapper over `tokio::sync::broadcast`: dispatch is O(1) in the
//! number of subscribers and a slow or absent subscriber never blocks the
//! publisher. A full receiver buffer just lags and drops the oldest
//! events, which `tokio::sync::broadcast` already reports via
//! `RecvError::Lagged` on the subscriber side.

use tokio::sync::broadcast;
use tracing::{info, trace, warn};

use crate::model::{NodeId, NodeStatus, TaskId};

const CHANNEL_CAPACITY: usize = 4096;

#[derive(Debug, Clone)]
pub enum Event {
    NodeRegistered { node_id: NodeId },
    NodeUnregistered { node_id: NodeId },
    NodeStatusChanged { node_id: NodeId, from: NodeStatus, to: NodeStatus },
    NodeOffline { node_id: NodeId },
    TaskSubmitted { task_id: TaskId },
    TaskScheduled { task_id: TaskId, nodes: Vec<NodeId> },
    TaskCompleted { task_id: TaskId, callback_url: Option<String>, duration_ms: f64 },
    TaskFailed { task_id: TaskId, error: String, callback_url: Option<String>, duration_ms: f64 },
    TaskCancelled { task_id: TaskId },
}

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: Event) {
        // send() only errors when there are zero receivers, which is a
        // normal state (no subscriber attached yet) rather than a fault.
        let _ = self.sender.send(event.clone());
        trace!(?event, "published");
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Drains terminal-task events carrying a `callback_url` (spec §9:
/// "callbacks to `callback_url` … dispatched through the Event Bus to a
/// callback subscriber; never performed on the task-engine thread"). The
/// HTTP POST itself is out of scope (§1); this logs what it would have
/// posted, which is the seam a real webhook dispatcher would replace.
pub struct CallbackSubscriber {
    events: EventBus,
}

impl CallbackSubscriber {
    pub fn new(events: EventBus) -> Self {
        Self { events }
    }

    pub async fn run(&self) {
        let mut rx = self.events.subscribe();
        loop {
            match rx.recv().await {
                Ok(Event::TaskCompleted { task_id, callback_url: Some(url), .. }) => {
                    info!(task_id = %task_id, url, "would POST task completion callback");
                }
                Ok(Event::TaskFailed { task_id, callback_url: Some(url), error, .. }) => {
                    info!(task_id = %task_id, url, error, "would POST task failure callback");
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "callback subscriber lagged behind the event bus");
                }
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_published_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.publish(Event::NodeRegistered { node_id: "n1".into() });

        let evt = rx.recv().await.unwrap();
        assert!(matches!(evt, Event::NodeRegistered { node_id } if node_id == "n1"));
    }

    #[test]
    fn publish_without_subscribers_does_not_panic() {
        let bus = EventBus::new();
        bus.publish(Event::NodeUnregistered { node_id: "n1".into() });
    }
}
