// src/core/mod.rs

//! The central module containing the core logic and data structures of SpinelMQ.

pub mod errors;
pub mod metrics;
pub mod protocol;
pub mod pubsub;
pub mod state;

pub use errors::SpinelMQError;
