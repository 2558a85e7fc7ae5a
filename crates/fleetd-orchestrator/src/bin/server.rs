//! Standalone server binary wrapping the orchestrator library.

use std::time::Duration;

use tokio::signal;
use tracing::{error, info};

use fleetd_orchestrator::bootstrap;
use fleetd_shared::config::FleetConfig;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = FleetConfig::load().map_err(|e| format!("failed to load config: {e}"))?;
    fleetd_shared::logging::init_tracing(&config.logging.filter);

    info!(version = env!("CARGO_PKG_VERSION"), "starting fleetd orchestrator");

    let handle = bootstrap(config)
        .await
        .map_err(|e| format!("failed to bootstrap orchestrator: {e}"))?;

    info!("orchestrator started, press Ctrl+C to shut down");
    shutdown_signal().await;
    info!("shutdown signal received, stopping");

    match tokio::time::timeout(Duration::from_secs(30), handle.stop()).await {
        Ok(Ok(())) => info!("orchestrator stopped cleanly"),
        Ok(Err(err)) => error!(error = %err, "error while stopping orchestrator"),
        Err(_) => error!("graceful shutdown timed out, forcing exit"),
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C"),
        _ = terminate => info!("received SIGTERM"),
    }
}
