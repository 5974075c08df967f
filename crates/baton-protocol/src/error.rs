//! Error types for baton-protocol.

use thiserror::Error;

use crate::controller::TokenState;

/// Result type for baton-protocol operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while encoding, decoding or validating wire messages.
#[derive(Debug, Error)]
pub enum Error {
    /// The message content could not be serialized.
    #[error("encoding error: {0}")]
    Encoding(#[source] serde_json::Error),

    /// The encoded message does not fit into a single UDP datagram.
    #[error("encoded message is {size} bytes, datagram limit is {limit}")]
    TooLarge { size: usize, limit: usize },

    /// The bytes are not a well-formed message, or the content does not
    /// match the declared message type.
    #[error("decoding error: {0}")]
    Decoding(#[source] serde_json::Error),

    /// The message parsed but failed validation (unknown type, empty id).
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}

/// Errors raised by the [`TokenController`](crate::TokenController).
///
/// A failing call never changes controller state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    /// The token carried no id.
    #[error("invalid token: empty id")]
    InvalidToken,

    /// The operation requires holding the token.
    #[error("no token held (state {state})")]
    NoToken { state: TokenState },

    /// A stale copy of a token we just passed arrived during the grace window.
    #[error("duplicate token {id} with sequence {sequence} rejected")]
    DuplicateToken { id: String, sequence: u64 },

    /// The deferred-send queue is at capacity.
    #[error("waiting queue full ({capacity} messages)")]
    WaitingQueueFull { capacity: usize },
}
