//! Error types for the ring node.

use baton_protocol::TokenError;
use thiserror::Error;

/// Result type for node operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in node operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Address resolution, bind or socket failure
    #[error("Transport error: {0}")]
    Transport(#[from] baton_transfer::Error),

    /// Message encoding or validation failure
    #[error("Protocol error: {0}")]
    Protocol(#[from] baton_protocol::Error),

    /// Token controller precondition failure
    #[error("Token error: {0}")]
    Token(#[from] TokenError),

    /// The outbound queue is saturated; the message was dropped
    #[error("Outbound queue full")]
    QueueFull,

    /// The node's activities are not running
    #[error("Node is not running")]
    NotRunning,

    /// `start` was called on a node that already ran
    #[error("Node already started")]
    AlreadyStarted,
}
