//! Baton Node - token-ring coordination over UDP
//!
//! Each peer of the ring knows only its successor. A single token
//! circulates; only the holder originates ordinary traffic, while HIGH
//! priority messages and heartbeats bypass it. Messages travel around the
//! ring until they reach their destination, are seen twice, or use up the
//! hop limit.
//!
//! # Architecture
//!
//! - **Config**: ring position, addresses and timings (env-driven for the daemon)
//! - **Node**: transport plus the receive/process/send/heartbeat activities
//! - **Handlers**: per-kind callbacks, with built-ins for the ring's own traffic
//! - **Stats**: counters and per-peer heartbeat liveness
//!
//! # Example
//!
//! ```no_run
//! use baton_node::{NodeConfig, RingNode};
//! use baton_protocol::{MessageKind, Payload, Priority, BROADCAST};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = NodeConfig::new(1, 4, "127.0.0.1:9001", "127.0.0.1:9002");
//!     let mut node = RingNode::bind(config).await?;
//!     node.register_handler(MessageKind::Game, |_, msg| println!("{msg:?}"));
//!     node.start()?;
//!
//!     node.submit(BROADCAST, Payload::Data("hello".into()), Priority::Normal)?;
//!
//!     node.stop().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod handlers;
pub mod node;
pub mod stats;
mod timers;

pub use config::NodeConfig;
pub use error::{Error, Result};
pub use handlers::{Handler, HandlerRegistry};
pub use node::{ConnectionState, NodeHandle, RingNode, Submission};
pub use stats::NodeStatistics;
