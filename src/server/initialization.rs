// src/server/initialization.rs

//! Handles server initialization: building the mechanism catalogue and the
//! listener, and binding the client socket.

use super::LogReloadHandle;
use super::context::ServerContext;
use crate::config::Config;
use crate::core::engine::TrackerFactory;
use crate::core::mech::MechanismSet;
use crate::core::state::AuthListener;
use anyhow::{Context, Result, anyhow};
use std::fs::Permissions;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tokio::net::UnixListener;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{info, warn};

/// Initializes all server components before starting the main loop.
pub fn setup(
    config: Config,
    config_path: String,
    log_reload_handle: LogReloadHandle,
) -> Result<ServerContext> {
    log_startup_info(&config);
    let (shutdown_tx, _) = broadcast::channel(1);

    let mechanisms = Rc::new(
        MechanismSet::builtin()
            .select(&config.mechanisms)
            .context("Failed to set up authentication mechanisms")?,
    );
    let engines = TrackerFactory::new(mechanisms.clone(), config.request_timeout);
    let listener = Rc::new(
        AuthListener::new(
            std::process::id(),
            config.connection_settings(),
            mechanisms.handshake(),
            Box::new(engines),
        )
        .with_sweep_interval(config.sweep_interval),
    );
    info!(
        "Auth listener initialized with mechanisms: {}.",
        mechanisms.names().collect::<Vec<_>>().join(", ")
    );

    let socket_path = PathBuf::from(&config.socket_path);
    let socket = bind_socket(&socket_path, config.socket_mode)?;
    info!(
        "authgate listening on {} (mode {:o})",
        socket_path.display(),
        config.socket_mode
    );

    Ok(ServerContext {
        listener,
        socket,
        socket_path,
        config,
        config_path,
        shutdown_tx,
        background_tasks: JoinSet::new(),
        log_reload_handle,
    })
}

/// Binds the Unix socket, replacing a stale socket file left behind by a
/// previous run. A socket that still accepts connections is left alone.
fn bind_socket(path: &Path, mode: u32) -> Result<UnixListener> {
    if path.exists() {
        if std::os::unix::net::UnixStream::connect(path).is_ok() {
            return Err(anyhow!(
                "Socket '{}' is already in use by another process",
                path.display()
            ));
        }
        warn!("Removing stale socket file '{}'.", path.display());
        std::fs::remove_file(path)
            .with_context(|| format!("Failed to remove stale socket '{}'", path.display()))?;
    }

    let socket = UnixListener::bind(path)
        .with_context(|| format!("Failed to bind socket '{}'", path.display()))?;
    std::fs::set_permissions(path, Permissions::from_mode(mode))
        .with_context(|| format!("Failed to set mode {:o} on '{}'", mode, path.display()))?;
    Ok(socket)
}

fn log_startup_info(config: &Config) {
    info!(
        "Accepting up to {} clients, lines up to {} bytes.",
        config.max_clients, config.max_line_length
    );
    info!(
        "Output throttle at {} bytes, request timeout {:?}, sweep every {:?}.",
        config.output_throttle, config.request_timeout, config.sweep_interval
    );
    if config.verbose_debug {
        warn!("verbose_debug is enabled: protocol lines, including credentials, will be logged.");
    }
}
