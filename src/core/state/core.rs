// src/core/state/core.rs

//! Defines the central `ServerState` struct, holding all shared broker-wide state.

use super::client::{ClientMap, Delivery};
use super::stats::StatsState;
use crate::config::Config;
use crate::core::SpinelMQError;
use crate::core::metrics;
use crate::core::protocol::{PROTOCOL_VERSION, ServerFrame, ServerInfo};
use crate::core::pubsub::SubscriptionRegistry;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

/// The struct shared by every connection task, wrapped in an `Arc`.
#[derive(Debug)]
pub struct ServerState {
    /// The configuration the broker was started with.
    pub config: Arc<Config>,
    /// A random hex identifier generated at startup and advertised in INFO.
    pub server_id: String,
    /// Every live subscription.
    pub registry: SubscriptionRegistry,
    /// All active client connections, keyed by session id.
    pub clients: ClientMap,
    pub stats: StatsState,
    next_client_id: AtomicU64,
}

impl ServerState {
    /// Initializes the shared state from the given configuration.
    pub fn initialize(config: Config) -> Result<Arc<Self>, SpinelMQError> {
        let mut id_bytes = [0u8; 16];
        getrandom::fill(&mut id_bytes).map_err(|e| SpinelMQError::Internal(e.to_string()))?;

        Ok(Arc::new(Self {
            config: Arc::new(config),
            server_id: hex::encode(id_bytes),
            registry: SubscriptionRegistry::new(),
            clients: Arc::new(DashMap::new()),
            stats: StatsState::new(),
            next_client_id: AtomicU64::new(1),
        }))
    }

    /// Hands out the next session id. Ids start at 1 and are never reused.
    pub fn next_client_id(&self) -> u64 {
        self.next_client_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Builds the INFO banner for a newly accepted client.
    pub fn server_info(&self, client_id: u64, client_ip: String) -> ServerInfo {
        ServerInfo {
            server_id: self.server_id.clone(),
            server_name: self.config.server_name.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            proto: PROTOCOL_VERSION,
            host: self.config.host.clone(),
            port: self.config.port,
            headers: false,
            max_payload: self.config.max_payload,
            client_id,
            client_ip,
        }
    }

    /// Routes a frame to the mailbox of client `owner`.
    ///
    /// A client whose mailbox is full is killed as a slow consumer; the caller is
    /// not affected.
    pub fn deliver(&self, owner: u64, frame: ServerFrame) -> Delivery {
        let Some(handle) = self.clients.get(&owner) else {
            return Delivery::Closed;
        };
        let delivery = handle.try_deliver(frame);
        if delivery == Delivery::SlowConsumer && handle.flag_slow_consumer() {
            warn!(
                "Client {} ({}) is a slow consumer, disconnecting.",
                owner, handle.info.addr
            );
            handle.kill();
            self.stats.increment_slow_consumers();
            metrics::SLOW_CONSUMERS_TOTAL.inc();
        }
        delivery
    }
}
