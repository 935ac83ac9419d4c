//! Error types for the channel middleware

use thiserror::Error;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Priority event queue errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("Failed to spawn worker thread: {0}")]
    Spawn(String),

    #[error("Allocation failed, event dropped")]
    AllocationFailed,

    #[error("Queue is stopped")]
    Stopped,
}

/// Router level errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("Channel not initialized")]
    NotInitialized,

    #[error("Invalid parameter: {0}")]
    InvalidParam(String),
}

/// Errors reported by the packet codec collaborator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Link disconnected")]
    Disconnected,

    #[error("Payload too large: {0} bytes")]
    PayloadTooLarge(usize),
}

/// Payload decoding errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Payload too short for {command}: need {need} bytes, got {got}")]
    Truncated {
        command: &'static str,
        need: usize,
        got: usize,
    },

    #[error("Unknown command: {0}")]
    UnknownCommand(u32),
}

/// Result type alias for the crate
pub type Result<T> = std::result::Result<T, Error>;
