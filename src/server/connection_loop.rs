// src/server/connection_loop.rs

//! Contains the main server loop for accepting connections and handling graceful shutdown.

use super::context::ServerContext;
use crate::config::Config;
use crate::connection::{self, ClientConnection, Transport};
use anyhow::{Context, Result};
use std::rc::Rc;
use std::time::Duration;
use tokio::net::UnixStream;
use tokio::signal::unix::{SignalKind, signal};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use tracing_subscriber::filter::EnvFilter;

/// The main server loop that accepts connections and handles graceful shutdown.
pub async fn run(mut ctx: ServerContext) -> Result<()> {
    let mut client_tasks = JoinSet::new();

    let mut sigint =
        signal(SignalKind::interrupt()).context("Failed to register SIGINT handler")?;
    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to register SIGTERM handler")?;
    let mut sighup = signal(SignalKind::hangup()).context("Failed to register SIGHUP handler")?;

    loop {
        tokio::select! {
            biased;

            _ = sigint.recv() => {
                info!("SIGINT received, initiating graceful shutdown.");
                break;
            }
            _ = sigterm.recv() => {
                info!("SIGTERM received, initiating graceful shutdown.");
                break;
            }
            _ = sighup.recv() => {
                info!("SIGHUP received, reloading log level.");
                reload_log_level(&ctx);
            }

            Some(res) = ctx.background_tasks.join_next() => {
                match res {
                    Ok(Ok(())) => warn!("A background task finished unexpectedly without an error."),
                    Ok(Err(e)) => { error!("CRITICAL: Background task failed: {}. Shutting down.", e); break; }
                    Err(e) => { error!("CRITICAL: Background task panicked: {e:?}. Shutting down."); break; }
                }
            },

            res = ctx.socket.accept() => {
                match res {
                    Ok((stream, _addr)) => accept_client(&ctx, &mut client_tasks, stream),
                    Err(e) => warn!("Failed to accept connection: {}", e),
                }
            },

            Some(res) = client_tasks.join_next() => {
                if let Err(e) = res
                    && e.is_panic()
                {
                    error!("A client connection driver panicked: {e:?}");
                }
            },
        }
    }

    info!(
        "Shutting down. Destroying {} client connections.",
        ctx.listener.len()
    );
    ctx.listener.shutdown();
    if ctx.shutdown_tx.send(()).is_err() {
        debug!("No background task was listening for the shutdown signal.");
    }

    client_tasks.shutdown().await;
    info!("All client connections closed.");

    info!("Waiting for background tasks to finish...");
    if tokio::time::timeout(Duration::from_secs(10), async {
        while ctx.background_tasks.join_next().await.is_some() {}
    })
    .await
    .is_err()
    {
        warn!("Timed out waiting for background tasks to finish cleanly.");
    };

    if let Err(e) = std::fs::remove_file(&ctx.socket_path) {
        warn!(
            "Failed to remove socket file '{}': {}",
            ctx.socket_path.display(),
            e
        );
    }
    info!("Server shutdown complete.");
    Ok(())
}

/// Registers a freshly accepted stream with the listener and spawns its
/// driver. Streams over the `max_clients` limit are closed right away.
fn accept_client(ctx: &ServerContext, client_tasks: &mut JoinSet<()>, stream: UnixStream) {
    if ctx.listener.len() >= ctx.config.max_clients {
        warn!(
            "Maximum number of clients ({}) reached, rejecting new connection.",
            ctx.config.max_clients
        );
        return;
    }

    let socket = Rc::new(stream);
    let transport: Rc<dyn Transport> = socket.clone();
    match ClientConnection::create(&ctx.listener, transport) {
        Ok(conn) => {
            client_tasks.spawn_local(connection::drive(conn, socket));
        }
        Err(e) => debug!("New client connection dropped during handshake: {}", e),
    }
}

/// Re-reads the config file and applies its `log_level`. `RUST_LOG` still
/// takes precedence. Other settings need a restart.
fn reload_log_level(ctx: &ServerContext) {
    let config = match Config::from_file(&ctx.config_path) {
        Ok(config) => config,
        Err(e) => {
            warn!("Keeping the current log level: {:#}", e);
            return;
        }
    };
    let level = std::env::var("RUST_LOG").unwrap_or(config.log_level);
    match ctx.log_reload_handle.reload(EnvFilter::new(&level)) {
        Ok(()) => info!("Log level set to '{}'.", level),
        Err(e) => warn!("Failed to reload log filter: {}", e),
    }
}
