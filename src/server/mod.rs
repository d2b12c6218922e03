// src/server/mod.rs

use crate::config::Config;
use anyhow::Result;
use std::future::Future;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{error, info};

mod connection_loop;
mod context;
mod initialization;
mod metrics_server;
mod spawner;

pub use context::ServerContext;

/// The main server startup function. Runs until SIGINT or SIGTERM.
pub async fn run(config: Config) -> Result<()> {
    let ctx = bind(config).await?;
    serve_until(ctx, shutdown_signal()).await;
    Ok(())
}

/// Initializes the server and spawns its background tasks without accepting
/// connections yet.
pub async fn bind(config: Config) -> Result<ServerContext> {
    let mut ctx = initialization::setup(config).await?;
    spawner::spawn_all(&mut ctx).await?;
    Ok(ctx)
}

/// Accepts connections until `shutdown` resolves, then shuts down gracefully.
pub async fn serve_until<F>(ctx: ServerContext, shutdown: F)
where
    F: Future<Output = ()>,
{
    connection_loop::run(ctx, shutdown).await;
}

/// Resolves on the first SIGINT or SIGTERM.
async fn shutdown_signal() {
    let (mut sigint, mut sigterm) = match (
        signal(SignalKind::interrupt()),
        signal(SignalKind::terminate()),
    ) {
        (Ok(sigint), Ok(sigterm)) => (sigint, sigterm),
        (Err(e), _) | (_, Err(e)) => {
            error!("Failed to register signal handlers: {}. Falling back to Ctrl-C.", e);
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
            return;
        }
    };

    tokio::select! {
        _ = sigint.recv() => info!("SIGINT received, initiating graceful shutdown."),
        _ = sigterm.recv() => info!("SIGTERM received, initiating graceful shutdown."),
    }
}
