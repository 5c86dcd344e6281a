use std::sync::Arc;

use anyhow::Result;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::dispatcher::NodeTransport;
use crate::platform::context::PlatformContext;

pub type ServiceSpawner<T> = Arc<
    dyn Fn(PlatformContext<T>, CancellationToken) -> JoinHandle<Result<()>> + Send + Sync + 'static,
>;

/// One of the concurrent activities named in spec §5 (dispatch worker
/// pool, liveness ticker, deadline ticker, metrics aggregator, telemetry
/// server): a name for logging plus a closure that spawns it onto the
/// runtime and returns a cancellable, awaitable handle.
pub struct ServiceRegistration<T: NodeTransport> {
    name: String,
    spawner: ServiceSpawner<T>,
}

impl<T: NodeTransport> ServiceRegistration<T> {
    pub fn new<N: Into<String>>(name: N, spawner: ServiceSpawner<T>) -> Self {
        Self {
            name: name.into(),
            spawner,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn spawn(
        &self,
        context: PlatformContext<T>,
        token: CancellationToken,
    ) -> JoinHandle<Result<()>> {
        (self.spawner)(context, token)
    }
}
