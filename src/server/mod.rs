// src/server/mod.rs

use crate::config::Config;
use anyhow::Result;
use std::sync::Arc;
use tracing_subscriber::{filter::EnvFilter, reload};

mod connection_loop;
mod context;
mod initialization;
mod metrics_server;
mod spawner;

/// The handle used to swap the log filter at runtime.
pub type LogReloadHandle = Arc<reload::Handle<EnvFilter, tracing_subscriber::Registry>>;

/// The main server startup function, orchestrating all setup phases.
///
/// Must be called from within a `tokio::task::LocalSet`: connections and
/// the request timeout sweep are single-threaded tasks.
pub async fn run(config: Config, config_path: String, log_reload_handle: LogReloadHandle) -> Result<()> {
    // 1. Bind the socket and build the listener.
    let mut server_context = initialization::setup(config, config_path, log_reload_handle)?;

    // 2. Spawn all background tasks.
    spawner::spawn_all(&mut server_context)?;

    // 3. Start the main connection acceptance loop. This function will run until shutdown.
    connection_loop::run(server_context).await
}
