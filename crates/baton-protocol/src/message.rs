//! Message envelope and typed payloads.

use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::token::Token;
use crate::wire::{self, WireMessage};

/// Ring position of a peer.
pub type PeerId = i32;

/// Destination value meaning "deliver to every peer".
pub const BROADCAST: PeerId = -1;

/// Generate a fresh message id: 8 random bytes, hex encoded.
pub fn generate_id() -> String {
    hex::encode(rand::random::<[u8; 8]>())
}

/// Current unix time in seconds.
pub fn unix_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Message type tag, carried in the wire `type` field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    /// The circulating token
    Token,
    /// Opaque application data
    Data,
    /// Game-layer traffic
    Game,
    /// Liveness signal
    Heartbeat,
    /// Application broadcast
    Broadcast,
    /// Error report
    Error,
    /// Acknowledgment
    Ack,
    /// Solicitation for the token
    TokenRequest,
}

impl MessageKind {
    /// All recognized kinds.
    pub const ALL: [MessageKind; 8] = [
        MessageKind::Token,
        MessageKind::Data,
        MessageKind::Game,
        MessageKind::Heartbeat,
        MessageKind::Broadcast,
        MessageKind::Error,
        MessageKind::Ack,
        MessageKind::TokenRequest,
    ];

    /// Wire name of this kind.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Token => "TOKEN",
            Self::Data => "DATA",
            Self::Game => "GAME",
            Self::Heartbeat => "HEARTBEAT",
            Self::Broadcast => "BROADCAST",
            Self::Error => "ERROR",
            Self::Ack => "ACK",
            Self::TokenRequest => "TOKEN_REQUEST",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| Error::InvalidMessage(format!("unknown message type {s:?}")))
    }
}

/// Message priority. Encoded on the wire as 0, 1 or 2.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(try_from = "u8", into = "u8")]
pub enum Priority {
    Low = 0,
    #[default]
    Normal = 1,
    High = 2,
}

impl From<Priority> for u8 {
    fn from(p: Priority) -> Self {
        p as u8
    }
}

impl TryFrom<u8> for Priority {
    type Error = String;

    fn try_from(v: u8) -> std::result::Result<Self, Self::Error> {
        match v {
            0 => Ok(Self::Low),
            1 => Ok(Self::Normal),
            2 => Ok(Self::High),
            other => Err(format!("invalid priority {other}")),
        }
    }
}

/// Content of a GAME message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GameContent {
    pub action: String,
    #[serde(default)]
    pub data: Value,
}

/// Content of a HEARTBEAT message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatContent {
    /// Per-origin heartbeat counter
    pub sequence: u64,
}

/// Content of an ERROR message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorContent {
    pub code: i32,
    pub description: String,
    #[serde(default)]
    pub details: String,
}

/// Content of an ACK message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckContent {
    pub original_message_id: String,
    /// "success" or "error"
    pub status: String,
}

/// Content of a TOKEN_REQUEST message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRequest {
    pub requester: PeerId,
}

/// Typed message content, one variant per [`MessageKind`].
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    Token(Token),
    Data(Value),
    Game(GameContent),
    Heartbeat(HeartbeatContent),
    Broadcast(Value),
    Error(ErrorContent),
    Ack(AckContent),
    TokenRequest(TokenRequest),
}

impl Payload {
    /// The kind tag matching this payload.
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Token(_) => MessageKind::Token,
            Self::Data(_) => MessageKind::Data,
            Self::Game(_) => MessageKind::Game,
            Self::Heartbeat(_) => MessageKind::Heartbeat,
            Self::Broadcast(_) => MessageKind::Broadcast,
            Self::Error(_) => MessageKind::Error,
            Self::Ack(_) => MessageKind::Ack,
            Self::TokenRequest(_) => MessageKind::TokenRequest,
        }
    }

    /// Serialize the content into an untyped JSON value.
    pub fn to_value(&self) -> Result<Value> {
        let value = match self {
            Self::Token(t) => serde_json::to_value(t),
            Self::Data(v) | Self::Broadcast(v) => Ok(v.clone()),
            Self::Game(g) => serde_json::to_value(g),
            Self::Heartbeat(h) => serde_json::to_value(h),
            Self::Error(e) => serde_json::to_value(e),
            Self::Ack(a) => serde_json::to_value(a),
            Self::TokenRequest(r) => serde_json::to_value(r),
        };
        value.map_err(Error::Encoding)
    }

    /// Interpret an untyped JSON value as the content of `kind`.
    pub fn from_value(kind: MessageKind, content: Value) -> Result<Self> {
        let payload = match kind {
            MessageKind::Token => serde_json::from_value(content).map(Self::Token),
            MessageKind::Data => Ok(Self::Data(content)),
            MessageKind::Game => serde_json::from_value(content).map(Self::Game),
            MessageKind::Heartbeat => serde_json::from_value(content).map(Self::Heartbeat),
            MessageKind::Broadcast => Ok(Self::Broadcast(content)),
            MessageKind::Error => serde_json::from_value(content).map(Self::Error),
            MessageKind::Ack => serde_json::from_value(content).map(Self::Ack),
            MessageKind::TokenRequest => serde_json::from_value(content).map(Self::TokenRequest),
        };
        payload.map_err(Error::Decoding)
    }
}

/// A single ring message.
///
/// Created at its origin with `hops == 0`; each non-destination peer bumps
/// `hops` once, and the message is discarded when it reaches the ring-wide
/// hop limit.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    /// Originating peer
    pub from: PeerId,
    /// Destination peer, or [`BROADCAST`]
    pub to: PeerId,
    /// Typed content
    pub payload: Payload,
    /// Forwarding steps taken so far
    pub hops: u32,
    /// Unique per origination
    pub id: String,
    /// Unix seconds at origination
    pub timestamp: i64,
    pub priority: Priority,
}

impl Message {
    /// Create a message with a fresh id, zero hops and the current time.
    pub fn new(from: PeerId, to: PeerId, payload: Payload, priority: Priority) -> Self {
        Self {
            from,
            to,
            payload,
            hops: 0,
            id: generate_id(),
            timestamp: unix_timestamp(),
            priority,
        }
    }

    /// Token hand-off to `to`. Always high priority.
    pub fn token(from: PeerId, to: PeerId, token: Token) -> Self {
        Self::new(from, to, Payload::Token(token), Priority::High)
    }

    pub fn game(from: PeerId, to: PeerId, action: impl Into<String>, data: Value) -> Self {
        let content = GameContent {
            action: action.into(),
            data,
        };
        Self::new(from, to, Payload::Game(content), Priority::Normal)
    }

    /// Error report, sent with high priority.
    pub fn error_report(
        from: PeerId,
        to: PeerId,
        code: i32,
        description: impl Into<String>,
        details: impl Into<String>,
    ) -> Self {
        let content = ErrorContent {
            code,
            description: description.into(),
            details: details.into(),
        };
        Self::new(from, to, Payload::Error(content), Priority::High)
    }

    /// Acknowledge `original_message_id`, sent with high priority.
    pub fn ack(
        from: PeerId,
        to: PeerId,
        original_message_id: impl Into<String>,
        status: impl Into<String>,
    ) -> Self {
        let content = AckContent {
            original_message_id: original_message_id.into(),
            status: status.into(),
        };
        Self::new(from, to, Payload::Ack(content), Priority::High)
    }

    pub fn broadcast(from: PeerId, content: Value) -> Self {
        Self::new(from, BROADCAST, Payload::Broadcast(content), Priority::Normal)
    }

    /// Low-priority liveness signal to every peer.
    pub fn heartbeat(from: PeerId, sequence: u64) -> Self {
        Self::new(
            from,
            BROADCAST,
            Payload::Heartbeat(HeartbeatContent { sequence }),
            Priority::Low,
        )
    }

    /// Ask the ring for the token.
    pub fn token_request(from: PeerId) -> Self {
        Self::new(
            from,
            BROADCAST,
            Payload::TokenRequest(TokenRequest { requester: from }),
            Priority::High,
        )
    }

    /// The type tag of this message.
    pub fn kind(&self) -> MessageKind {
        self.payload.kind()
    }

    /// Encode to a single JSON datagram.
    pub fn encode(&self) -> Result<Vec<u8>> {
        wire::encode(self)
    }

    /// Decode and validate a JSON datagram.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        wire::decode(bytes)
    }

    /// A typed message always has a recognized kind; it is valid once it has an id.
    pub fn is_valid(&self) -> bool {
        !self.id.is_empty()
    }

    pub fn is_broadcast(&self) -> bool {
        self.to == BROADCAST
    }

    /// True if `peer` should handle this message.
    pub fn is_for_peer(&self, peer: PeerId) -> bool {
        self.to == peer || self.to == BROADCAST
    }

    pub fn increment_hops(&mut self) {
        self.hops = self.hops.saturating_add(1);
    }

    /// True once the message has used up the hop budget.
    pub fn should_discard(&self, max_hops: u32) -> bool {
        self.hops >= max_hops
    }

    pub(crate) fn to_wire(&self) -> Result<WireMessage> {
        Ok(WireMessage {
            kind: self.kind().as_str().to_string(),
            from: self.from,
            to: self.to,
            content: self.payload.to_value()?,
            hops: self.hops,
            id: self.id.clone(),
            timestamp: self.timestamp,
            priority: self.priority,
        })
    }
}

impl TryFrom<WireMessage> for Message {
    type Error = Error;

    fn try_from(wire: WireMessage) -> Result<Self> {
        if !wire.is_valid() {
            return Err(Error::InvalidMessage(format!(
                "type {:?} id {:?}",
                wire.kind, wire.id
            )));
        }
        let kind: MessageKind = wire.kind.parse()?;
        Ok(Self {
            from: wire.from,
            to: wire.to,
            payload: Payload::from_value(kind, wire.content)?,
            hops: wire.hops,
            id: wire.id,
            timestamp: wire.timestamp,
            priority: wire.priority,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_message_defaults() {
        let msg = Message::new(2, BROADCAST, Payload::Data(json!("hello")), Priority::Normal);
        assert_eq!(msg.hops, 0);
        assert_eq!(msg.id.len(), 16);
        assert!(msg.timestamp > 0);
        assert!(msg.is_valid());
        assert_eq!(msg.kind(), MessageKind::Data);
    }

    #[test]
    fn test_ids_are_unique() {
        let a = Message::heartbeat(0, 1);
        let b = Message::heartbeat(0, 1);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_is_for_peer() {
        let direct = Message::game(0, 2, "play", json!("7H"));
        assert!(direct.is_for_peer(2));
        assert!(!direct.is_for_peer(1));

        let all = Message::broadcast(0, json!({"round": 3}));
        assert!(all.is_broadcast());
        for peer in 0..4 {
            assert!(all.is_for_peer(peer));
        }
    }

    #[test]
    fn test_hop_limit() {
        let mut msg = Message::heartbeat(1, 0);
        assert!(!msg.should_discard(2));
        msg.increment_hops();
        assert!(!msg.should_discard(2));
        msg.increment_hops();
        assert!(msg.should_discard(2));
    }

    #[test]
    fn test_empty_id_is_invalid() {
        let mut msg = Message::heartbeat(1, 0);
        msg.id.clear();
        assert!(!msg.is_valid());
    }

    #[test]
    fn test_constructor_priorities() {
        assert_eq!(Message::ack(0, 1, "x", "success").priority, Priority::High);
        assert_eq!(
            Message::error_report(0, 1, 3, "bad", "").priority,
            Priority::High
        );
        assert_eq!(Message::heartbeat(0, 0).priority, Priority::Low);
        assert_eq!(Message::token(0, 1, Token::new(0)).priority, Priority::High);
        assert_eq!(Message::broadcast(0, Value::Null).to, BROADCAST);
    }

    #[test]
    fn test_kind_names_round_trip() {
        for kind in MessageKind::ALL {
            assert_eq!(kind.as_str().parse::<MessageKind>().unwrap(), kind);
        }
        assert!("PING".parse::<MessageKind>().is_err());
    }

    #[test]
    fn test_priority_wire_values() {
        assert_eq!(serde_json::to_string(&Priority::High).unwrap(), "2");
        assert_eq!(serde_json::from_str::<Priority>("0").unwrap(), Priority::Low);
        assert!(serde_json::from_str::<Priority>("7").is_err());
    }
}
