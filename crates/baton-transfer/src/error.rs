//! Error types for baton-transfer.

use std::net::SocketAddr;

use thiserror::Error;

/// Result type for baton-transfer operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A configured address did not resolve to any socket address.
    #[error("failed to resolve address {addr:?}")]
    AddressResolution {
        addr: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// The local socket could not be created or bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Runtime read or write failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A datagram could not be encoded or decoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] baton_protocol::Error),
}
