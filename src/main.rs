// src/main.rs

//! The main entry point for the authgate server application.

use anyhow::Result;
use authgate::config::Config;
use authgate::server;
use std::env;
use std::sync::Arc;
use tokio::task::LocalSet;
use tracing::error;
use tracing_subscriber::{filter::EnvFilter, prelude::*, reload};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Client connections are `Rc`-based and never leave this thread.
    LocalSet::new().run_until(run_app()).await
}

async fn run_app() -> Result<()> {
    // Define version information.
    const VERSION: &str = env!("CARGO_PKG_VERSION");

    // Collect command-line arguments to decide the execution mode.
    let args: Vec<String> = env::args().collect();

    // Handle the --version flag.
    if args.contains(&"--version".to_string()) {
        println!("authgate version {VERSION}");
        return Ok(());
    }

    // Determine the configuration path.
    // It can be provided via a --config flag; otherwise, it defaults to "authgate.toml".
    let config_path = args
        .iter()
        .position(|arg| arg == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str())
        .unwrap_or("authgate.toml");

    // The server cannot run without a valid configuration.
    let mut config = match Config::from_file(config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration from \"{config_path}\": {e:#}");
            std::process::exit(1);
        }
    };

    // Override the socket path if provided as a command-line argument
    if let Some(socket_index) = args.iter().position(|arg| arg == "--socket") {
        match args.get(socket_index + 1) {
            Some(path) if !path.trim().is_empty() => config.socket_path = path.clone(),
            _ => {
                eprintln!("--socket flag requires a path");
                std::process::exit(1);
            }
        }
    }

    // Get initial log level from env var or config.
    let initial_log_level =
        std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone());

    // Create a reloadable filter layer.
    let (filter, reload_handle) = reload::Layer::new(EnvFilter::new(initial_log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .compact() // Use the compact, single-line format.
                .with_ansi(true), // Enable ANSI color codes for log levels.
        )
        .init();

    if let Err(e) = server::run(config, config_path.to_string(), Arc::new(reload_handle)).await {
        error!("Server runtime error: {:#}", e);
        return Err(e);
    }

    Ok(())
}
