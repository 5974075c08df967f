//! Baton Protocol - Ring Messages and Token Passing
//!
//! This crate holds the pure (I/O-free) half of a Baton ring peer: the
//! typed wire envelope, the token that grants exclusive send permission,
//! the per-peer token controller and the duplicate-suppression cache.
//! Sockets and async activities live in `baton-transfer` and `baton-node`.
//!
//! # Overview
//!
//! ## Messages
//!
//! Every datagram carries exactly one JSON-encoded [`Message`]. The `type`
//! field selects a strongly typed [`Payload`] variant which is decoded once,
//! at the boundary, by [`Message::decode`]:
//!
//! ```text
//! {"type":"GAME","from":1,"to":-1,"content":{"action":"play","data":"7H"},
//!  "hops":0,"id":"9f3c0a1b2c3d4e5f","timestamp":1760000000,"priority":1}
//! ```
//!
//! ## Token
//!
//! The [`TokenController`] is the per-peer state machine:
//!
//! ```text
//!            request_token              receive_token
//!   NONE ─────────────────▶ WAITING ───────────────────┐
//!    ▲  │                                              ▼
//!    │  └──────────────── receive_token ─────────▶ HOLDING
//!    │                                              │
//!    └──── finish_pass (grace) ──── PASSING ◀───────┘ pass_token
//! ```
//!
//! # Example
//!
//! ```rust
//! use baton_protocol::{Message, Payload, Priority, Token, TokenController, TokenState};
//!
//! let mut controller = TokenController::new(0, 16);
//! controller.receive_token(Token::new(0)).unwrap();
//! assert_eq!(controller.state(), TokenState::Holding);
//!
//! let outbound = controller.pass_token(1).unwrap();
//! assert!(matches!(outbound.payload, Payload::Token(_)));
//!
//! let bytes = outbound.encode().unwrap();
//! let decoded = Message::decode(&bytes).unwrap();
//! assert_eq!(decoded.priority, Priority::High);
//! ```

pub mod controller;
pub mod dedup;
pub mod error;
pub mod message;
pub mod token;
pub mod wire;

pub use controller::{TokenController, TokenState};
pub use dedup::DedupCache;
pub use error::{Error, Result, TokenError};
pub use message::{
    generate_id, unix_timestamp, AckContent, ErrorContent, GameContent, HeartbeatContent, Message,
    MessageKind, Payload, PeerId, Priority, TokenRequest, BROADCAST,
};
pub use token::Token;
pub use wire::{WireMessage, MAX_DATAGRAM};
