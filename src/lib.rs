//! nbredis: non-blocking Redis client connection manager
//!
//! Lets a single-threaded process keep many simultaneous server
//! connections, issue pipelined commands against them and receive replies
//! via callbacks, all driven by one cooperative [`Client::tick`] entry
//! point the host invokes from its own loop.
//!
//! # Architecture
//!
//! - Generation-checked slot registry with power-of-two growth
//! - Per-connection connect state machine with a timeout-governed,
//!   mio-based non-blocking connect
//! - FIFO command pipeline matching replies to callbacks in issue order
//! - One bounded readiness poll per tick, amortized across all sockets

/// Connection manager and tick engine
pub mod client;

/// Configuration management
pub mod config;

/// Error types and result aliases
pub mod error;

/// Per-connection state machine and pipeline
pub mod network;

/// RESP wire codec
pub mod protocol;

/// Descriptor table with slot reuse
pub mod registry;

pub use client::Client;
pub use config::Config;
pub use error::{Error, Result};
pub use network::{ConnState, Outcome, ReplyCallback};
pub use registry::Descriptor;
