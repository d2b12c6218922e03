// src/core/state/client.rs

//! Contains state definitions related to client connections.

use crate::core::protocol::ServerFrame;
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc};

pub type ShutdownSender = broadcast::Sender<()>;
/// The sending half of a client's outbound frame queue.
pub type Mailbox = mpsc::Sender<ServerFrame>;
pub type ClientMap = Arc<DashMap<u64, ClientHandle>>;

/// Descriptive metadata about a connected client.
#[derive(Debug, Clone)]
pub struct ClientInfo {
    pub addr: SocketAddr,
    pub session_id: u64,
    pub name: Option<String>,
    pub lang: Option<String>,
    pub version: Option<String>,
    pub created: Instant,
}

impl ClientInfo {
    pub fn new(addr: SocketAddr, session_id: u64) -> Self {
        Self {
            addr,
            session_id,
            name: None,
            lang: None,
            version: None,
            created: Instant::now(),
        }
    }
}

/// The result of routing a frame into a client's mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Queued,
    /// The mailbox is full.
    SlowConsumer,
    /// The client is gone.
    Closed,
}

/// The client table's entry for one connection: how to reach it and how to stop it.
#[derive(Debug)]
pub struct ClientHandle {
    pub info: ClientInfo,
    mailbox: Mailbox,
    kill: ShutdownSender,
    slow_consumer: AtomicBool,
}

impl ClientHandle {
    pub fn new(info: ClientInfo, mailbox: Mailbox, kill: ShutdownSender) -> Self {
        Self {
            info,
            mailbox,
            kill,
            slow_consumer: AtomicBool::new(false),
        }
    }

    /// Queues a frame without waiting.
    pub fn try_deliver(&self, frame: ServerFrame) -> Delivery {
        match self.mailbox.try_send(frame) {
            Ok(()) => Delivery::Queued,
            Err(TrySendError::Full(_)) => Delivery::SlowConsumer,
            Err(TrySendError::Closed(_)) => Delivery::Closed,
        }
    }

    /// Marks the client as a slow consumer. Returns `true` only the first time.
    pub fn flag_slow_consumer(&self) -> bool {
        !self.slow_consumer.swap(true, Ordering::Relaxed)
    }

    /// Signals the client's connection task to terminate.
    pub fn kill(&self) {
        let _ = self.kill.send(());
    }
}
