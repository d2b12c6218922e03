// src/core/errors.rs

//! Defines the primary error type for the entire application.

use crate::core::protocol::ParseError;
use std::sync::Arc;
use thiserror::Error;

/// The main error enum, representing all possible failures within the broker.
#[derive(Error, Debug)]
pub enum SpinelMQError {
    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    /// The client sent bytes that do not fit the protocol grammar.
    #[error("Protocol error: {0}")]
    Parse(ParseError),

    #[error("JSON error: {0}")]
    Json(String),

    /// The session's outbound mailbox is full.
    #[error("Slow Consumer")]
    SlowConsumer,

    /// Too many keepalive PINGs went unanswered.
    #[error("Stale Connection")]
    StaleConnection,

    #[error("maximum connections exceeded")]
    MaxConnections,

    #[error("Internal Server Error: {0}")]
    Internal(String),
}

impl SpinelMQError {
    /// The text sent to the client inside a `-ERR '...'` frame when this error
    /// terminates a connection.
    pub fn wire_message(&self) -> String {
        match self {
            SpinelMQError::Parse(e) => e.code.wire_message().to_string(),
            SpinelMQError::SlowConsumer => "Slow Consumer".to_string(),
            SpinelMQError::StaleConnection => "Stale Connection".to_string(),
            SpinelMQError::MaxConnections => "maximum connections exceeded".to_string(),
            _ => "Internal Server Error".to_string(),
        }
    }
}

// Manual implementation of Clone because `std::io::Error` is not cloneable.
impl Clone for SpinelMQError {
    fn clone(&self) -> Self {
        match self {
            SpinelMQError::Io(e) => SpinelMQError::Io(Arc::clone(e)),
            SpinelMQError::Parse(e) => SpinelMQError::Parse(e.clone()),
            SpinelMQError::Json(s) => SpinelMQError::Json(s.clone()),
            SpinelMQError::SlowConsumer => SpinelMQError::SlowConsumer,
            SpinelMQError::StaleConnection => SpinelMQError::StaleConnection,
            SpinelMQError::MaxConnections => SpinelMQError::MaxConnections,
            SpinelMQError::Internal(s) => SpinelMQError::Internal(s.clone()),
        }
    }
}

impl PartialEq for SpinelMQError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (SpinelMQError::Io(e1), SpinelMQError::Io(e2)) => e1.to_string() == e2.to_string(),
            (SpinelMQError::Parse(e1), SpinelMQError::Parse(e2)) => e1 == e2,
            (SpinelMQError::Json(s1), SpinelMQError::Json(s2)) => s1 == s2,
            (SpinelMQError::Internal(s1), SpinelMQError::Internal(s2)) => s1 == s2,
            _ => core::mem::discriminant(self) == core::mem::discriminant(other),
        }
    }
}

// --- From trait implementations for easy error conversion ---

impl From<std::io::Error> for SpinelMQError {
    fn from(e: std::io::Error) -> Self {
        SpinelMQError::Io(Arc::new(e))
    }
}

impl From<ParseError> for SpinelMQError {
    fn from(e: ParseError) -> Self {
        SpinelMQError::Parse(e)
    }
}

impl From<serde_json::Error> for SpinelMQError {
    fn from(e: serde_json::Error) -> Self {
        SpinelMQError::Json(e.to_string())
    }
}
