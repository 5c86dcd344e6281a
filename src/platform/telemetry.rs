use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::routing::get;
use axum::Router;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::ObservabilitySettings;
use crate::dispatcher::NodeTransport;
use crate::platform::service::ServiceRegistration;

static RECORDER: OnceCell<PrometheusHandle> = OnceCell::new();

/// Installs the process-wide Prometheus recorder exactly once. Every
/// `metrics::counter!`/`histogram!` call anywhere in the crate (placement,
/// dispatch, task completion) flows into this recorder; the service below
/// just exposes its rendered text form.
fn install_recorder() -> Result<PrometheusHandle> {
    if let Some(handle) = RECORDER.get() {
        return Ok(handle.clone());
    }
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .context("failed to install prometheus recorder")?;
    let _ = RECORDER.set(handle.clone());
    Ok(handle)
}

/// The `/metrics` endpoint (spec §11 observability). Named in spec §5 as
/// one of the long-lived concurrent activities; bound to `CancellationToken`
/// for graceful shutdown the same way every other supervised service is.
pub fn telemetry_service<T: NodeTransport>(settings: ObservabilitySettings) -> ServiceRegistration<T> {
    ServiceRegistration::new(
        "telemetry",
        Arc::new(move |_ctx, token: CancellationToken| {
            let settings = settings.clone();
            tokio::spawn(async move {
                if !settings.enable_metrics {
                    return Ok(());
                }

                let handle = install_recorder()?;
                let app = Router::new()
                    .route("/metrics", get(metrics_handler))
                    .with_state(handle);
                let addr = SocketAddr::from(([0, 0, 0, 0], settings.metrics_port));
                let shutdown = token.clone();

                let listener = tokio::net::TcpListener::bind(addr).await?;
                info!(port = settings.metrics_port, "telemetry server started");

                axum::serve(listener, app)
                    .with_graceful_shutdown(async move {
                        shutdown.cancelled().await;
                        info!("shutting down telemetry server");
                    })
                    .await?;

                Ok(())
            })
        }),
    )
}

async fn metrics_handler(State(handle): State<PrometheusHandle>) -> String {
    handle.render()
}
