use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::dispatcher::NodeTransport;
use crate::orchestrator::Orchestrator;

/// Shared handle passed to every supervised service: the orchestrator
/// itself plus the token that signals cooperative shutdown.
#[derive(Clone)]
pub struct PlatformContext<T: NodeTransport> {
    orchestrator: Arc<Orchestrator<T>>,
    shutdown: CancellationToken,
}

impl<T: NodeTransport> PlatformContext<T> {
    pub(crate) fn new(orchestrator: Arc<Orchestrator<T>>, shutdown: CancellationToken) -> Self {
        Self { orchestrator, shutdown }
    }

    pub fn orchestrator(&self) -> Arc<Orchestrator<T>> {
        self.orchestrator.clone()
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}
