//! # Settlement Daemon
//!
//! Opens the store database, runs the callback worker (webhook queue plus
//! the sweep of stale PENDING scan attempts) and stops cleanly on Ctrl+C or
//! SIGTERM.
//!
//! ## Usage
//! ```bash
//! # Platform config dir settle.toml, env overrides applied
//! cargo run -p bistro-settle --bin bistro-settled
//!
//! # Explicit config file
//! cargo run -p bistro-settle --bin bistro-settled -- --config ./settle.toml
//!
//! # Offline gateways, custom database
//! BISTRO_GATEWAY_MODE=offline BISTRO_DB_PATH=./bistro_dev.db \
//!     cargo run -p bistro-settle --bin bistro-settled
//! ```

use std::env;
use std::path::PathBuf;

use bistro_settle::telemetry::init_tracing;
use bistro_settle::{Engine, SettleConfig};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let args: Vec<String> = env::args().collect();
    let mut config_path: Option<PathBuf> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" if i + 1 < args.len() => {
                config_path = Some(PathBuf::from(&args[i + 1]));
                i += 1;
            }
            "--help" | "-h" => {
                println!("Usage: bistro-settled [--config PATH]");
                return Ok(());
            }
            other => {
                warn!(argument = other, "Ignoring unknown argument");
            }
        }
        i += 1;
    }

    let config = SettleConfig::load(config_path)?;
    info!(
        store = %config.store.id,
        terminal = %config.store.terminal_id,
        gateway_mode = %config.gateway.mode,
        "Starting settlement daemon"
    );

    let engine = Engine::open(config).await?;
    let (worker, handle) = engine.callback_worker();
    let worker_task = tokio::spawn(worker.run());

    shutdown_signal().await;
    info!("Shutdown requested");

    if let Err(e) = handle.shutdown().await {
        error!(?e, "Failed to signal callback worker");
    }
    if let Err(e) = worker_task.await {
        error!(?e, "Callback worker task failed");
    }

    info!("Settlement daemon stopped");
    Ok(())
}

/// Resolves on Ctrl+C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(?e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(?e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
