// src/server/connection_loop.rs

//! Contains the main server loop for accepting connections and handling graceful shutdown.

use super::context::ServerContext;
use crate::connection::ConnectionHandler;
use crate::core::SpinelMQError;
use crate::core::metrics;
use crate::core::protocol::ServerFrame;
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// How long connections get to flush their queued frames after shutdown starts.
const CLIENT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// The main server loop that accepts connections and handles graceful shutdown.
pub async fn run<F>(mut ctx: ServerContext, shutdown: F)
where
    F: Future<Output = ()>,
{
    let mut client_tasks = JoinSet::new();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            biased;

            _ = &mut shutdown => break,

            Some(res) = ctx.background_tasks.join_next() => {
                match res {
                    Ok(Ok(())) => warn!("A background task finished unexpectedly without an error."),
                    Ok(Err(e)) => { error!("CRITICAL: Background task failed: {}. Shutting down.", e); break; }
                    Err(e) => { error!("CRITICAL: Background task panicked: {e:?}. Shutting down."); break; }
                }
            },

            res = ctx.listener.accept() => {
                match res {
                    Ok((socket, addr)) => {
                        info!("Accepted new connection from: {}", addr);
                        ctx.state.stats.increment_total_connections();
                        metrics::CONNECTIONS_RECEIVED_TOTAL.inc();

                        match ctx.connection_permits.clone().try_acquire_owned() {
                            Ok(permit) => {
                                let session_id = ctx.state.next_client_id();
                                let state = ctx.state.clone();
                                let global_shutdown_rx = ctx.shutdown_tx.subscribe();
                                client_tasks.spawn(async move {
                                    let _permit = permit;
                                    if let Err(e) = socket.set_nodelay(true) {
                                        debug!("Could not set TCP_NODELAY for {}: {}", addr, e);
                                    }
                                    let handler = ConnectionHandler::new(socket, addr, state, session_id, global_shutdown_rx);
                                    if let Err(e) = handler.run().await {
                                        warn!("Connection from {} terminated: {}", addr, e);
                                    }
                                });
                            }
                            Err(_) => {
                                warn!("Rejecting connection from {}: maximum connections exceeded.", addr);
                                client_tasks.spawn(reject_connection(socket, addr));
                            }
                        }
                    }
                    Err(e) => error!("Failed to accept connection: {}", e),
                }
            },

            Some(res) = client_tasks.join_next() => {
                if let Err(e) = res
                    && e.is_panic()
                {
                    error!("A client handler panicked: {e:?}");
                }
            },
        }
    }

    info!("Shutting down. Sending signal to all tasks.");
    if ctx.shutdown_tx.send(()).is_err() {
        debug!("No task was listening for the shutdown signal.");
    }

    if tokio::time::timeout(CLIENT_DRAIN_TIMEOUT, async {
        while client_tasks.join_next().await.is_some() {}
    })
    .await
    .is_err()
    {
        warn!("Timed out waiting for clients to drain; aborting the rest.");
        client_tasks.shutdown().await;
    }
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

    let stats = &ctx.state.stats;
    info!(
        "Served {} connections: {} messages in ({} bytes), {} messages out ({} bytes), {} slow consumers.",
        stats.get_total_connections(),
        stats.get_messages_in(),
        stats.get_bytes_in(),
        stats.get_messages_out(),
        stats.get_bytes_out(),
        stats.get_slow_consumers()
    );
    info!("Server shutdown complete.");
}

/// Tells a client over the connection limit why it is being dropped.
async fn reject_connection(mut socket: TcpStream, addr: SocketAddr) {
    let frame = ServerFrame::err(SpinelMQError::MaxConnections.wire_message());
    let result = async {
        let bytes = frame.encode_to_vec()?;
        socket.write_all(&bytes).await?;
        socket.shutdown().await?;
        Ok::<(), SpinelMQError>(())
    }
    .await;
    if let Err(e) = result {
        debug!("Failed to notify rejected client {}: {}", addr, e);
    }
}
