use crate::registry::Descriptor;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Open connection limit reached ({0})")]
    MaxOpenReached(usize),

    #[error("Endpoint {0}:{1} is already open")]
    DuplicateEndpoint(String, u16),

    #[error("Invalid descriptor {0}")]
    InvalidDescriptor(Descriptor),

    #[error("Stale descriptor {0}")]
    StaleDescriptor(Descriptor),

    #[error("Connection {0} is not connected")]
    NotConnected(Descriptor),

    #[error("Connection {0} is already connected")]
    AlreadyConnected(Descriptor),

    #[error("Command is empty")]
    EmptyCommand,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
