// src/connection/mod.rs

//! Manages the lifecycle of a single client connection: reading and parsing
//! commands, routing them through a `Session`, and writing frames back.

mod guard;
mod handler;
mod keepalive;
mod session;

pub use guard::ConnectionGuard;
pub use handler::ConnectionHandler;
pub use keepalive::{Keepalive, RoundTrip};
pub use session::Session;
