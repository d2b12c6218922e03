// src/server/initialization.rs

//! Handles server initialization: shared state, the listener, and connection limits.

use super::context::ServerContext;
use crate::config::Config;
use crate::core::state::ServerState;
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{Semaphore, broadcast};
use tokio::task::JoinSet;
use tracing::info;

/// Initializes all server components before starting the main loop.
pub async fn setup(config: Config) -> Result<ServerContext> {
    log_startup_info(&config);
    let (shutdown_tx, _) = broadcast::channel(1);

    let state = ServerState::initialize(config)?;
    info!("Server state initialized. Server id: {}", state.server_id);

    let (host, port) = (state.config.host.as_str(), state.config.port);
    let listener = TcpListener::bind((host, port))
        .await
        .with_context(|| format!("Failed to bind {host}:{port}"))?;
    info!("SpinelMQ listening on {}", listener.local_addr()?);
    let connection_permits = Arc::new(Semaphore::new(state.config.max_clients));

    Ok(ServerContext {
        state,
        listener,
        shutdown_tx,
        background_tasks: JoinSet::new(),
        connection_permits,
    })
}

fn log_startup_info(config: &Config) {
    info!(
        "Starting SpinelMQ {} as '{}'.",
        env!("CARGO_PKG_VERSION"),
        config.server_name
    );
    info!(
        "Limits: {} clients, {} byte payloads, {} byte control lines, {} pending frames per client.",
        config.max_clients, config.max_payload, config.max_control_line, config.max_pending_frames
    );
    info!(
        "Keepalive every {:?}, at most {} unanswered PINGs.",
        config.ping_interval, config.max_pings_outstanding
    );
}
