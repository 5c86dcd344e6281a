use std::sync::Arc;

use anyhow::Result;
use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::clock::SharedClock;
use crate::config::OrchestratorConfig;
use crate::dispatcher::NodeTransport;
use crate::orchestrator::Orchestrator;
use crate::platform::context::PlatformContext;
use crate::platform::service::ServiceRegistration;
use crate::platform::telemetry::telemetry_service;
use crate::store::Store;

/// Assembles an `Orchestrator` and the supervised services around it
/// (spec §5's concurrent activities): the dispatch/deadline ticker loop,
/// the liveness monitor, the metrics aggregator, and the telemetry server.
/// Each runs as a named, cancellable `ServiceRegistration` so a single
/// `CancellationToken` drains the whole process on shutdown.
pub struct Platform<T: NodeTransport> {
    config: OrchestratorConfig,
    transport: Arc<T>,
    store: Arc<dyn Store>,
    clock: SharedClock,
    extra_services: Vec<ServiceRegistration<T>>,
}

impl<T: NodeTransport> Platform<T> {
    pub fn new(config: OrchestratorConfig, transport: Arc<T>, store: Arc<dyn Store>, clock: SharedClock) -> Self {
        Self {
            config,
            transport,
            store,
            clock,
            extra_services: Vec::new(),
        }
    }

    /// Registers an additional supervised service, e.g. a transport
    /// adapter's HTTP/JSON listener (spec §1: out of scope to implement,
    /// but this is the seam it would plug into).
    pub fn register_service(&mut self, service: ServiceRegistration<T>) {
        self.extra_services.push(service);
    }

    pub async fn start(self) -> Result<PlatformRuntime<T>> {
        initialize_logging(&self.config);

        let orchestrator = Orchestrator::new(self.config.clone(), self.transport, self.store, self.clock.clone());
        orchestrator.recover().await;

        let root_token = CancellationToken::new();
        let context = PlatformContext::new(orchestrator.clone(), root_token.child_token());

        let mut services = vec![telemetry_service::<T>(self.config.observability.clone())];
        services.extend(self.extra_services);

        let mut tasks: Vec<(String, JoinHandle<Result<()>>)> = Vec::new();
        for service in &services {
            let handle = service.spawn(context.clone(), root_token.child_token());
            tasks.push((service.name().to_string(), handle));
        }

        tasks.push(("dispatch_loop".to_string(), spawn_dispatch_loop(orchestrator.clone(), root_token.child_token())));
        tasks.push(("liveness_monitor".to_string(), spawn_liveness(orchestrator.clone(), self.clock.clone(), root_token.child_token())));
        tasks.push(("metrics_aggregator".to_string(), spawn_metrics(orchestrator.clone(), root_token.child_token())));
        tasks.push(("store_sync".to_string(), spawn_store_sync(orchestrator.clone(), root_token.child_token())));
        tasks.push(("callback_dispatcher".to_string(), spawn_callback_dispatcher(orchestrator.clone(), root_token.child_token())));

        info!(services = tasks.len(), "platform boot completed");

        Ok(PlatformRuntime {
            context,
            cancel_token: root_token,
            tasks,
        })
    }
}

fn spawn_dispatch_loop<T: NodeTransport>(orchestrator: Arc<Orchestrator<T>>, token: CancellationToken) -> JoinHandle<Result<()>> {
    tokio::spawn(async move {
        orchestrator.run_core_loops(token).await;
        Ok(())
    })
}

fn spawn_liveness<T: NodeTransport>(orchestrator: Arc<Orchestrator<T>>, clock: SharedClock, token: CancellationToken) -> JoinHandle<Result<()>> {
    let liveness = orchestrator.liveness();
    let task_engine = orchestrator.task_engine();
    tokio::spawn(async move {
        liveness.run(task_engine, clock, token).await;
        Ok(())
    })
}

fn spawn_metrics<T: NodeTransport>(orchestrator: Arc<Orchestrator<T>>, token: CancellationToken) -> JoinHandle<Result<()>> {
    let metrics = orchestrator.metrics();
    tokio::spawn(async move {
        tokio::select! {
            () = token.cancelled() => {}
            () = metrics.run() => {}
        }
        Ok(())
    })
}

fn spawn_store_sync<T: NodeTransport>(orchestrator: Arc<Orchestrator<T>>, token: CancellationToken) -> JoinHandle<Result<()>> {
    tokio::spawn(async move {
        orchestrator.run_store_sync(token).await;
        Ok(())
    })
}

fn spawn_callback_dispatcher<T: NodeTransport>(orchestrator: Arc<Orchestrator<T>>, token: CancellationToken) -> JoinHandle<Result<()>> {
    let subscriber = crate::events::CallbackSubscriber::new(orchestrator.events());
    tokio::spawn(async move {
        tokio::select! {
            () = token.cancelled() => {}
            () = subscriber.run() => {}
        }
        Ok(())
    })
}

pub struct PlatformRuntime<T: NodeTransport> {
    context: PlatformContext<T>,
    cancel_token: CancellationToken,
    tasks: Vec<(String, JoinHandle<Result<()>>)>,
}

impl<T: NodeTransport> PlatformRuntime<T> {
    pub fn context(&self) -> PlatformContext<T> {
        self.context.clone()
    }

    pub async fn shutdown(self) -> Result<()> {
        self.cancel_token.cancel();

        let names: Vec<String> = self.tasks.iter().map(|(name, _)| name.clone()).collect();
        let results = join_all(self.tasks.into_iter().map(|(_, handle)| handle)).await;

        let mut first_err = None;
        for (name, result) in names.into_iter().zip(results) {
            match result {
                Ok(Ok(())) => info!(service = %name, "service shutdown cleanly"),
                Ok(Err(err)) => {
                    error!(service = %name, %err, "service exited with an error");
                    first_err.get_or_insert(err);
                }
                Err(err) => {
                    error!(service = %name, %err, "service task panicked");
                    first_err.get_or_insert(err.into());
                }
            }
        }

        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn initialize_logging(config: &OrchestratorConfig) {
    let filter = &config.observability.log_level;
    let _ = tracing_subscriber::fmt().with_env_filter(filter.as_str()).try_init();
}
