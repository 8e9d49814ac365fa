//! binexpire server
//!
//! Serves the expire-bin commands over RESP from an in-memory store, with an
//! optional background sweep of the configured collections.

use anyhow::{Context, Result};
use binexpire::commands::CommandHandler;
use binexpire::config::Config;
use binexpire::connection::{handle_connection, ConnectionStats};
use binexpire::expire::{RecordAccessor, SweepCoordinator, SweepScheduler, SystemClock};
use binexpire::storage::MemoryStore;
use clap::Parser;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(&config.log_level))
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    info!(version = binexpire::VERSION, "Starting binexpire");

    let store = Arc::new(MemoryStore::new());
    let policy = config.access_policy();
    info!(
        timeout_ms = config.timeout_ms,
        max_retries = policy.max_retries,
        reclaim_on_write = policy.reclaim_on_write,
        "Record accessor ready"
    );
    let accessor = Arc::new(RecordAccessor::new(store, Arc::new(SystemClock), policy));
    let sweeps = Arc::new(SweepCoordinator::new(accessor));

    let _scheduler = if config.sweep_collections.is_empty() {
        info!("No collections to sweep; expired bins are reclaimed on write only");
        None
    } else {
        info!(collections = ?config.sweep_collections, "Background sweep enabled");
        Some(SweepScheduler::start(
            Arc::clone(&sweeps),
            config.sweep_collections.clone(),
            config.sweep_config(),
        ))
    };

    let handler = CommandHandler::new(sweeps);
    let stats = Arc::new(ConnectionStats::new());

    let listener = TcpListener::bind(config.bind_address())
        .await
        .with_context(|| format!("failed to bind {}", config.bind_address()))?;
    info!("Listening on {}", config.bind_address());

    tokio::select! {
        _ = accept_loop(listener, handler, Arc::clone(&stats)) => {}
        result = signal::ctrl_c() => {
            if let Err(e) = result {
                warn!(error = %e, "Failed to listen for Ctrl+C");
            }
            info!("Shutdown signal received, stopping server...");
        }
    }

    let totals = stats.snapshot();
    info!(
        connections = totals.connections_accepted,
        commands = totals.commands_processed,
        "Server shutdown complete"
    );
    Ok(())
}

async fn accept_loop(listener: TcpListener, handler: CommandHandler, stats: Arc<ConnectionStats>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                tokio::spawn(handle_connection(
                    stream,
                    addr,
                    handler.clone(),
                    Arc::clone(&stats),
                ));
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}
