//! Error types for the realtime core

use thiserror::Error;

/// Errors surfaced by the realtime core
#[derive(Error, Debug)]
pub enum RealtimeError {
    /// Opening the connection failed
    #[error("Connection error: {0}")]
    Connection(String),

    /// Not currently connected to the backend
    #[error("Not connected")]
    NotConnected,

    /// Operation timed out
    #[error("Operation timed out")]
    Timeout,

    /// The socket failed after it was opened
    #[error("Transport error: {0}")]
    Transport(String),

    /// A frame could not be normalized into a message
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Failed to serialize/deserialize a frame
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid channel name
    #[error("Invalid channel: {0}")]
    InvalidChannel(String),

    /// Invalid or incomplete configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Status endpoint request failed
    #[error("Status request failed: {0}")]
    Status(String),

    /// The controller has been shut down
    #[error("Client shut down")]
    Shutdown,
}

/// Result type for realtime operations
pub type Result<T> = std::result::Result<T, RealtimeError>;
