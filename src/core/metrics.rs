// src/core/metrics.rs

//! Defines and registers Prometheus metrics for broker monitoring.
//!
//! This module uses `lazy_static` so that every collector is registered exactly
//! once in the default registry for the lifetime of the process.

use lazy_static::lazy_static;
use prometheus::{
    Counter, Gauge, Histogram, TextEncoder, register_counter, register_gauge, register_histogram,
};

lazy_static! {
    // --- Gauges ---
    /// The number of clients currently connected.
    pub static ref CONNECTED_CLIENTS: Gauge =
        register_gauge!("spinelmq_connected_clients", "Number of currently connected clients.").unwrap();
    /// The number of subscriptions currently held in the registry.
    pub static ref ACTIVE_SUBSCRIPTIONS: Gauge =
        register_gauge!("spinelmq_active_subscriptions", "Number of live subscriptions.").unwrap();

    // --- Counters ---
    pub static ref CONNECTIONS_RECEIVED_TOTAL: Counter =
        register_counter!("spinelmq_connections_received_total", "Total number of connections received.").unwrap();
    /// Messages accepted from publishers.
    pub static ref MESSAGES_RECEIVED_TOTAL: Counter =
        register_counter!("spinelmq_messages_received_total", "Total number of PUB messages received.").unwrap();
    /// MSG frames queued to subscribers.
    pub static ref MESSAGES_DELIVERED_TOTAL: Counter =
        register_counter!("spinelmq_messages_delivered_total", "Total number of MSG frames delivered.").unwrap();
    pub static ref PAYLOAD_BYTES_RECEIVED_TOTAL: Counter =
        register_counter!("spinelmq_payload_bytes_received_total", "Total payload bytes received from publishers.").unwrap();
    pub static ref PAYLOAD_BYTES_DELIVERED_TOTAL: Counter =
        register_counter!("spinelmq_payload_bytes_delivered_total", "Total payload bytes delivered to subscribers.").unwrap();
    pub static ref PARSE_ERRORS_TOTAL: Counter =
        register_counter!("spinelmq_parse_errors_total", "Total number of connections closed by a protocol error.").unwrap();
    pub static ref SLOW_CONSUMERS_TOTAL: Counter =
        register_counter!("spinelmq_slow_consumers_total", "Total number of clients disconnected as slow consumers.").unwrap();

    // --- Histograms ---
    /// Round-trip time between a server PING and the client's PONG.
    pub static ref PING_RTT_SECONDS: Histogram =
        register_histogram!(
            "spinelmq_ping_rtt_seconds",
            "Round-trip time of keepalive PINGs in seconds.",
            vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]
        ).unwrap();
}

/// Gathers all registered metrics and encodes them in the Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder.encode_to_string(&metric_families).unwrap_or_default()
}
