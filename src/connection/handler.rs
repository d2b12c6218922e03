// src/connection/handler.rs

//! Defines the `ConnectionHandler` which manages the full lifecycle of a client connection.

use super::guard::ConnectionGuard;
use super::session::Session;
use crate::core::SpinelMQError;
use crate::core::metrics;
use crate::core::protocol::{Parser, ServerFrame, ServerFrameCodec};
use crate::core::state::{ClientHandle, ClientInfo, ServerState};
use bytes::BytesMut;
use futures::SinkExt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, WriteHalf};
use tokio::sync::{broadcast, mpsc};
use tokio_util::codec::FramedWrite;
use tracing::{debug, info, warn};

const READ_BUFFER_SIZE: usize = 32 * 1024;
/// How long a closing connection may spend writing its final `-ERR`.
const FATAL_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

type FrameWriter<S> = FramedWrite<WriteHalf<S>, ServerFrameCodec>;

/// Why the main loop stopped.
enum Exit {
    PeerClosed,
    Shutdown,
    Killed,
    Fatal(SpinelMQError),
}

/// Manages the full lifecycle of a client connection.
///
/// On creation the client is registered in the client table with a fresh
/// mailbox and kill switch; the entry is removed when the handler is dropped.
/// The bounded mailbox carries deliveries from other sessions only. Replies to
/// the client's own commands are queued on the session and written after each
/// parsed read, so a large pipelined read never counts against the mailbox.
pub struct ConnectionHandler<S> {
    stream: Option<S>,
    addr: SocketAddr,
    state: Arc<ServerState>,
    session_id: u64,
    session: Session,
    mailbox_rx: mpsc::Receiver<ServerFrame>,
    shutdown_rx: broadcast::Receiver<()>,
    global_shutdown_rx: broadcast::Receiver<()>,
    _guard: ConnectionGuard,
}

impl<S> ConnectionHandler<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(
        stream: S,
        addr: SocketAddr,
        state: Arc<ServerState>,
        session_id: u64,
        global_shutdown_rx: broadcast::Receiver<()>,
    ) -> Self {
        let (mailbox_tx, mailbox_rx) = mpsc::channel(state.config.max_pending_frames);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let info = ClientInfo::new(addr, session_id);
        state.clients.insert(
            session_id,
            ClientHandle::new(info, mailbox_tx, shutdown_tx),
        );
        let guard = ConnectionGuard::new(state.clone(), session_id, addr);

        Self {
            stream: Some(stream),
            addr,
            session: Session::new(state.clone(), session_id),
            state,
            session_id,
            mailbox_rx,
            shutdown_rx,
            global_shutdown_rx,
            _guard: guard,
        }
    }

    /// Runs the connection until the peer leaves, the server shuts down, the
    /// client is killed, or a fatal protocol error occurs.
    ///
    /// Subscriptions are always removed before this returns. Normal disconnects
    /// return `Ok`; protocol violations are returned after the client has been
    /// sent an `-ERR` frame.
    pub async fn run(mut self) -> Result<(), SpinelMQError> {
        let result = self.serve().await;
        self.session.on_closed();
        match result {
            Err(e) if is_normal_disconnect(&e) => {
                debug!("Connection from {} closed by peer: {}", self.addr, e);
                Ok(())
            }
            other => other,
        }
    }

    async fn serve(&mut self) -> Result<(), SpinelMQError> {
        let Some(stream) = self.stream.take() else {
            return Err(SpinelMQError::Internal(
                "connection stream already consumed".into(),
            ));
        };
        let (mut reader, writer) = tokio::io::split(stream);
        let mut writer = FramedWrite::new(writer, ServerFrameCodec);

        let info = self
            .state
            .server_info(self.session_id, self.addr.ip().to_string());
        writer.send(ServerFrame::Info(Box::new(info))).await?;

        let mut parser = Parser::new(
            self.state.config.max_control_line,
            self.state.config.max_payload,
        );
        let mut read_buf = BytesMut::with_capacity(READ_BUFFER_SIZE);

        let Self {
            session,
            mailbox_rx,
            shutdown_rx,
            global_shutdown_rx,
            ..
        } = self;

        let exit = loop {
            if session.has_replies() {
                tokio::select! {
                    biased;
                    _ = global_shutdown_rx.recv() => break Exit::Shutdown,
                    _ = shutdown_rx.recv() => break Exit::Killed,
                    written = write_replies(&mut writer, session) => written?,
                }
            }

            tokio::select! {
                // Prioritize shutdown signals, then pending output, over new input.
                biased;
                _ = global_shutdown_rx.recv() => break Exit::Shutdown,
                _ = shutdown_rx.recv() => break Exit::Killed,
                Some(frame) = mailbox_rx.recv() => {
                    // A peer that stops reading must not make the kill switch unreachable.
                    tokio::select! {
                        biased;
                        _ = shutdown_rx.recv() => break Exit::Killed,
                        written = write_batch(&mut writer, frame, mailbox_rx) => written?,
                    }
                }
                _ = session.keepalive_tick() => {
                    if let Err(e) = session.send_ping() {
                        break Exit::Fatal(e);
                    }
                }
                read = reader.read_buf(&mut read_buf) => {
                    match read {
                        Ok(0) => break Exit::PeerClosed,
                        Ok(_) => {
                            let result = parser.parse(&read_buf, &mut *session);
                            read_buf.clear();
                            if let Err(e) = result {
                                break Exit::Fatal(e);
                            }
                        }
                        Err(e) => break Exit::Fatal(e.into()),
                    }
                }
            }
        };

        match exit {
            Exit::PeerClosed => {
                debug!("Connection from {} closed by peer.", self.addr);
                Ok(())
            }
            Exit::Shutdown => {
                info!(
                    "Connection handler for {} received GLOBAL shutdown signal.",
                    self.addr
                );
                write_replies(&mut writer, &mut self.session).await?;
                drain_mailbox(&mut writer, &mut self.mailbox_rx).await?;
                writer.flush().await?;
                Ok(())
            }
            Exit::Killed => {
                info!("Connection handler for {} received kill signal.", self.addr);
                Ok(())
            }
            Exit::Fatal(e) => {
                if !matches!(e, SpinelMQError::Io(_)) {
                    self.send_fatal_error(&mut writer, &e).await;
                }
                Err(e)
            }
        }
    }

    /// Flushes queued replies and deliveries, then writes the `-ERR` frame for `e`. Write
    /// failures are only logged since the connection is closing anyway.
    async fn send_fatal_error(&mut self, writer: &mut FrameWriter<S>, e: &SpinelMQError) {
        if let SpinelMQError::Parse(parse_error) = e {
            metrics::PARSE_ERRORS_TOTAL.inc();
            warn!(
                "Protocol error from {} (session {}): {}",
                self.addr, self.session_id, parse_error
            );
        } else {
            warn!("Closing connection {}: {}", self.addr, e);
        }

        let write = async {
            for frame in self.session.drain_replies() {
                writer.feed(frame).await?;
            }
            drain_mailbox(writer, &mut self.mailbox_rx).await?;
            writer.feed(ServerFrame::err(e.wire_message())).await?;
            writer.flush().await?;
            Ok::<(), SpinelMQError>(())
        };
        match tokio::time::timeout(FATAL_WRITE_TIMEOUT, write).await {
            Ok(Ok(())) => {}
            Ok(Err(write_err)) => debug!(
                "Could not send error to {} before closing: {}",
                self.addr, write_err
            ),
            Err(_) => debug!("Timed out sending error to {} before closing.", self.addr),
        }
    }
}

/// Writes the session's queued replies in order, then flushes.
async fn write_replies<S>(
    writer: &mut FrameWriter<S>,
    session: &mut Session,
) -> Result<(), SpinelMQError>
where
    S: AsyncWrite,
{
    for frame in session.drain_replies() {
        writer.feed(frame).await?;
    }
    writer.flush().await
}

/// Writes `first` and everything else already queued, then flushes.
async fn write_batch<S>(
    writer: &mut FrameWriter<S>,
    first: ServerFrame,
    mailbox_rx: &mut mpsc::Receiver<ServerFrame>,
) -> Result<(), SpinelMQError>
where
    S: AsyncWrite,
{
    writer.feed(first).await?;
    drain_mailbox(writer, mailbox_rx).await?;
    writer.flush().await
}

async fn drain_mailbox<S>(
    writer: &mut FrameWriter<S>,
    mailbox_rx: &mut mpsc::Receiver<ServerFrame>,
) -> Result<(), SpinelMQError>
where
    S: AsyncWrite,
{
    while let Ok(frame) = mailbox_rx.try_recv() {
        writer.feed(frame).await?;
    }
    Ok(())
}

/// Helper function to check for non-critical disconnection errors.
fn is_normal_disconnect(e: &SpinelMQError) -> bool {
    matches!(e, SpinelMQError::Io(arc_err) if matches!(
        arc_err.kind(),
        std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::ConnectionAborted
    ))
}
