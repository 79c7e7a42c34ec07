//! Per-connection state machine, socket handling and command pipeline

pub mod connection;

pub use connection::{ConnState, Connection, Outcome, ReplyCallback};
