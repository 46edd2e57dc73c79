// src/server/context.rs

use super::LogReloadHandle;
use crate::config::Config;
use crate::core::state::AuthListener;
use std::path::PathBuf;
use std::rc::Rc;
use tokio::net::UnixListener;
use tokio::sync::broadcast;
use tokio::task::JoinSet;

/// Holds all the initialized state required to run the server's main loop.
pub struct ServerContext {
    pub listener: Rc<AuthListener>,
    pub socket: UnixListener,
    pub socket_path: PathBuf,
    pub config: Config,
    pub config_path: String,
    pub shutdown_tx: broadcast::Sender<()>,
    pub background_tasks: JoinSet<Result<(), anyhow::Error>>,
    pub log_reload_handle: LogReloadHandle,
}
