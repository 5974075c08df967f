//! Baton Transfer - UDP transport binding for ring peers
//!
//! Each peer owns exactly one connectionless socket. It receives from
//! anyone and sends only to its ring successor:
//!
//! ```text
//!   predecessor ──datagram──▶ [ RingTransport ] ──datagram──▶ successor
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use baton_transfer::{RingTransport, TransportConfig};
//!
//! let successor = RingTransport::resolve("127.0.0.1:9001").await?;
//! let config = TransportConfig {
//!     bind: RingTransport::resolve("127.0.0.1:9000").await?,
//!     ..Default::default()
//! };
//! let transport = RingTransport::bind(config, successor).await?;
//! transport.send(&message).await?;
//! ```

pub mod error;
pub mod transport;

pub use error::{Error, Result};
pub use transport::{RingTransport, TransportConfig, RECV_BUFFER};
