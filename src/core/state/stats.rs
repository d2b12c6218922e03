// src/core/state/stats.rs

//! Contains state definitions and logic for broker statistics.

use std::sync::atomic::{AtomicU64, Ordering};

/// Holds broker-wide counters since startup.
#[derive(Debug, Default)]
pub struct StatsState {
    total_connections: AtomicU64,
    /// PUB messages received.
    messages_in: AtomicU64,
    /// MSG frames queued to subscribers.
    messages_out: AtomicU64,
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
    slow_consumers: AtomicU64,
}

impl StatsState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_total_connections(&self) {
        self.total_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_total_connections(&self) -> u64 {
        self.total_connections.load(Ordering::Relaxed)
    }

    /// Records one published message of `bytes` payload bytes.
    pub fn record_inbound(&self, bytes: usize) {
        self.messages_in.fetch_add(1, Ordering::Relaxed);
        self.bytes_in.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Records one delivered message of `bytes` payload bytes.
    pub fn record_outbound(&self, bytes: usize) {
        self.messages_out.fetch_add(1, Ordering::Relaxed);
        self.bytes_out.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn get_messages_in(&self) -> u64 {
        self.messages_in.load(Ordering::Relaxed)
    }

    pub fn get_messages_out(&self) -> u64 {
        self.messages_out.load(Ordering::Relaxed)
    }

    pub fn get_bytes_in(&self) -> u64 {
        self.bytes_in.load(Ordering::Relaxed)
    }

    pub fn get_bytes_out(&self) -> u64 {
        self.bytes_out.load(Ordering::Relaxed)
    }

    pub fn increment_slow_consumers(&self) {
        self.slow_consumers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_slow_consumers(&self) -> u64 {
        self.slow_consumers.load(Ordering::Relaxed)
    }
}
