// src/server/spawner.rs

//! Spawns all of the server's long-running background tasks.

use super::context::ServerContext;
use super::metrics_server;
use anyhow::Result;
use tracing::info;

/// Spawns the background tasks into the context's JoinSet and starts the
/// listener's request timeout sweep.
pub fn spawn_all(ctx: &mut ServerContext) -> Result<()> {
    // --- Metrics Server ---
    if ctx.config.metrics.enabled {
        let port = ctx.config.metrics.port;
        let shutdown_rx_metrics = ctx.shutdown_tx.subscribe();
        ctx.background_tasks.spawn(async move {
            metrics_server::run_metrics_server(port, shutdown_rx_metrics).await;
            Ok(())
        });
    } else {
        info!("Prometheus metrics server is disabled in the configuration.");
    }

    // --- Request Timeout Sweep ---
    ctx.listener.start_sweep();

    info!("All background tasks have been spawned.");
    Ok(())
}
