//! Framing: one JSON object per UDP datagram.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::message::{Message, MessageKind, PeerId, Priority};

/// Largest UDP payload over IPv4. Encoding refuses anything bigger so the
/// receiver never sees a truncated datagram.
pub const MAX_DATAGRAM: usize = 65_507;

/// Untyped wire form of a [`Message`]: the `content` is still raw JSON and
/// `type` may name a kind we do not know.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub from: PeerId,
    pub to: PeerId,
    #[serde(default)]
    pub content: Value,
    pub hops: u32,
    pub id: String,
    pub timestamp: i64,
    pub priority: Priority,
}

impl WireMessage {
    /// False if the type is unrecognized or the id is empty.
    pub fn is_valid(&self) -> bool {
        !self.id.is_empty() && self.kind.parse::<MessageKind>().is_ok()
    }
}

/// Encode a message into a single datagram.
pub fn encode(msg: &Message) -> Result<Vec<u8>> {
    let bytes = serde_json::to_vec(&msg.to_wire()?).map_err(Error::Encoding)?;
    if bytes.len() > MAX_DATAGRAM {
        return Err(Error::TooLarge {
            size: bytes.len(),
            limit: MAX_DATAGRAM,
        });
    }
    Ok(bytes)
}

/// Decode a datagram, validate it and type its content.
pub fn decode(bytes: &[u8]) -> Result<Message> {
    let wire: WireMessage = serde_json::from_slice(bytes).map_err(Error::Decoding)?;
    Message::try_from(wire)
}
