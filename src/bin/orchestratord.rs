use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use dotenvy::dotenv;
use tracing::info;

use orchestrator_core::clock::SystemClock;
use orchestrator_core::config::OrchestratorConfig;
use orchestrator_core::dispatcher::NullTransport;
use orchestrator_core::platform::Platform;
use orchestrator_core::store::InMemoryStore;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path (TOML). Overridden by ORCHESTRATOR__* env vars.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let args = Args::parse();

    let config = OrchestratorConfig::load(args.config.as_deref())?;

    info!("starting orchestratord");

    // No real Node-facing transport ships with this crate (spec §1): the
    // default binary runs against an always-accepts test double. A real
    // deployment swaps in an HTTP/gRPC `NodeTransport` implementation.
    let platform = Platform::new(
        config,
        Arc::new(NullTransport),
        Arc::new(InMemoryStore::new()),
        Arc::new(SystemClock),
    );

    let runtime = platform.start().await?;

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    runtime.shutdown().await?;
    Ok(())
}
