// tests/integration/test_helpers.rs

//! Test helpers and utilities for integration tests

#![allow(dead_code)]

use bytes::{Bytes, BytesMut};
use spinelmq::config::Config;
use spinelmq::connection::ConnectionHandler;
use spinelmq::core::SpinelMQError;
use spinelmq::core::protocol::{CommandHandler, PublishArgs, SubscribeArgs};
use spinelmq::core::state::ServerState;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing_subscriber::EnvFilter;

/// How long a read may wait before the test fails.
pub const READ_TIMEOUT: Duration = Duration::from_secs(5);
const DUPLEX_BUFFER: usize = 64 * 1024;

pub const CONNECT_JSON: &str = r#"{"echo":true,"verbose":false,"pedantic":false,"tls_required":false,"name":"test-client","lang":"rust","version":"1.0.0","protocol":1}"#;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("warn"))
        .with_test_writer()
        .try_init();
}

/// Builds a CONNECT command with the given flags overriding the defaults above.
pub fn connect_command(verbose: bool, echo: bool) -> Vec<u8> {
    format!(
        "CONNECT {{\"echo\":{echo},\"verbose\":{verbose},\"pedantic\":false,\"tls_required\":false,\"name\":\"test-client\",\"lang\":\"rust\",\"version\":\"1.0.0\",\"protocol\":1}}\r\n"
    )
    .into_bytes()
}

/// One recorded parser callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Connect(String),
    Ping,
    Pong,
    Sub(SubscribeArgs),
    Pub(PublishArgs, Bytes),
}

/// A `CommandHandler` that records every callback it receives.
#[derive(Debug, Default)]
pub struct Recorder {
    pub events: Vec<Event>,
    /// When set, `process_ping` fails with this error.
    pub fail_ping_with: Option<SpinelMQError>,
}

impl CommandHandler for Recorder {
    fn process_connect(&mut self, arg: &[u8]) -> Result<(), SpinelMQError> {
        self.events
            .push(Event::Connect(String::from_utf8_lossy(arg).into_owned()));
        Ok(())
    }

    fn process_ping(&mut self) -> Result<(), SpinelMQError> {
        if let Some(e) = self.fail_ping_with.clone() {
            return Err(e);
        }
        self.events.push(Event::Ping);
        Ok(())
    }

    fn process_pong(&mut self) -> Result<(), SpinelMQError> {
        self.events.push(Event::Pong);
        Ok(())
    }

    fn process_subscribe(&mut self, args: SubscribeArgs) -> Result<(), SpinelMQError> {
        self.events.push(Event::Sub(args));
        Ok(())
    }

    fn process_publish(&mut self, args: PublishArgs, payload: Bytes) -> Result<(), SpinelMQError> {
        self.events.push(Event::Pub(args, payload));
        Ok(())
    }
}

/// TestContext runs connection handlers against a shared `ServerState` over
/// in-memory duplex streams.
pub struct TestContext {
    pub state: Arc<ServerState>,
    shutdown_tx: broadcast::Sender<()>,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        init_tracing();
        let state = ServerState::initialize(config).expect("Failed to initialize server state");
        let (shutdown_tx, _) = broadcast::channel(1);
        Self { state, shutdown_tx }
    }

    /// Connects a client and consumes its INFO banner.
    pub async fn connect(&self) -> TestClient {
        self.connect_with_buffer(DUPLEX_BUFFER).await
    }

    /// Connects a client whose transport holds at most `buffer` unread bytes.
    pub async fn connect_with_buffer(&self, buffer: usize) -> TestClient {
        let mut client = self.connect_raw(buffer);
        client.info = client.read_line().await;
        assert!(
            client.info.starts_with("INFO {"),
            "expected INFO banner, got {:?}",
            client.info
        );
        client
    }

    /// Connects a client without reading anything.
    pub fn connect_raw(&self, buffer: usize) -> TestClient {
        let (client_io, server_io) = tokio::io::duplex(buffer);
        let id = self.state.next_client_id();
        let addr: SocketAddr = format!("127.0.0.1:{}", 40_000 + id)
            .parse()
            .expect("valid socket address");
        let handler = ConnectionHandler::new(
            server_io,
            addr,
            self.state.clone(),
            id,
            self.shutdown_tx.subscribe(),
        );
        TestClient {
            id,
            info: String::new(),
            stream: client_io,
            buf: BytesMut::new(),
            task: Some(tokio::spawn(handler.run())),
        }
    }

    /// Sends the global shutdown signal to every handler.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

/// The client side of an in-memory connection.
pub struct TestClient {
    pub id: u64,
    /// The INFO line received on connect.
    pub info: String,
    stream: DuplexStream,
    buf: BytesMut,
    task: Option<JoinHandle<Result<(), SpinelMQError>>>,
}

impl TestClient {
    pub async fn send(&mut self, bytes: &[u8]) {
        self.stream
            .write_all(bytes)
            .await
            .expect("write to server failed");
    }

    /// Sends CONNECT with the given flags.
    pub async fn handshake(&mut self, verbose: bool, echo: bool) {
        self.send(&connect_command(verbose, echo)).await;
        if verbose {
            self.expect_line("+OK").await;
        }
    }

    /// Round-trips a PING so every command sent before it has been processed.
    pub async fn sync(&mut self) {
        self.send(b"PING\r\n").await;
        self.expect_line("PONG").await;
    }

    pub async fn read_line(&mut self) -> String {
        self.read_line_within(READ_TIMEOUT).await
    }

    pub async fn read_line_within(&mut self, limit: Duration) -> String {
        timeout(limit, self.next_line())
            .await
            .expect("timed out waiting for a line from the server")
    }

    pub async fn expect_line(&mut self, expected: &str) {
        let line = self.read_line().await;
        assert_eq!(line, expected);
    }

    /// Reads one `MSG` frame and returns its control line and payload.
    pub async fn read_msg(&mut self) -> (String, Bytes) {
        let line = self.read_line().await;
        assert!(line.starts_with("MSG "), "expected MSG, got {line:?}");
        let size: usize = line
            .rsplit(' ')
            .next()
            .and_then(|s| s.parse().ok())
            .expect("MSG line ends with a size");
        let mut frame = timeout(READ_TIMEOUT, self.read_exact(size + 2))
            .await
            .expect("timed out waiting for a payload");
        assert_eq!(&frame[size..], b"\r\n", "payload must end with CRLF");
        frame.truncate(size);
        (line, frame.freeze())
    }

    /// Fails if anything arrives within `period`.
    pub async fn assert_silent(&mut self, period: Duration) {
        assert!(self.buf.is_empty(), "unexpected buffered data: {:?}", self.buf);
        match timeout(period, self.stream.read_buf(&mut self.buf)).await {
            Err(_) => {}
            Ok(Ok(0)) => panic!("connection closed unexpectedly"),
            Ok(Ok(_)) => panic!("unexpected data from server: {:?}", self.buf),
            Ok(Err(e)) => panic!("read error: {e}"),
        }
    }

    /// Reads until the server closes the connection and returns everything that
    /// arrived.
    pub async fn read_until_closed(&mut self) -> String {
        timeout(READ_TIMEOUT, async {
            loop {
                match self.stream.read_buf(&mut self.buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        })
        .await
        .expect("server did not close the connection");
        let rest = self.buf.split();
        String::from_utf8_lossy(&rest).into_owned()
    }

    /// Waits for the server-side handler to finish and returns its result.
    pub async fn join(&mut self) -> Result<(), SpinelMQError> {
        let task = self.task.take().expect("handler already joined");
        timeout(READ_TIMEOUT, task)
            .await
            .expect("handler did not finish")
            .expect("handler panicked")
    }

    /// Closes the client side of the connection.
    pub async fn close(mut self) -> Result<(), SpinelMQError> {
        self.stream.shutdown().await.expect("shutdown failed");
        let result = self.join().await;
        drop(self.stream);
        result
    }

    async fn next_line(&mut self) -> String {
        loop {
            if let Some(pos) = self.buf.windows(2).position(|w| w == b"\r\n") {
                let line = self.buf.split_to(pos + 2);
                return String::from_utf8_lossy(&line[..pos]).into_owned();
            }
            let n = self
                .stream
                .read_buf(&mut self.buf)
                .await
                .expect("read from server failed");
            if n == 0 {
                panic!("connection closed; buffered: {:?}", self.buf);
            }
        }
    }

    async fn read_exact(&mut self, len: usize) -> BytesMut {
        while self.buf.len() < len {
            let n = self
                .stream
                .read_buf(&mut self.buf)
                .await
                .expect("read from server failed");
            if n == 0 {
                panic!("connection closed; buffered: {:?}", self.buf);
            }
        }
        self.buf.split_to(len)
    }
}
