//! The ring token.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::message::{generate_id, unix_timestamp, PeerId};

/// Exclusive send permission circulating around the ring.
///
/// `sequence` grows by one every time a peer accepts the token, so a stale
/// copy is always distinguishable from a token that completed a lap.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub id: String,
    /// Current (or, while in flight, intended) holder
    pub owner: PeerId,
    /// Unix seconds of the last ownership change
    pub timestamp: i64,
    pub sequence: u64,
    /// Free-form extension data carried with the token
    #[serde(default)]
    pub data: BTreeMap<String, Value>,
}

impl Token {
    /// Mint a new token for `owner`. Only the seed peer does this, once.
    pub fn new(owner: PeerId) -> Self {
        Self {
            id: generate_id(),
            owner,
            timestamp: unix_timestamp(),
            sequence: 0,
            data: BTreeMap::new(),
        }
    }

    /// Attach extension data.
    #[must_use]
    pub fn with_data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_token() {
        let token = Token::new(0);
        assert_eq!(token.owner, 0);
        assert_eq!(token.sequence, 0);
        assert!(!token.id.is_empty());
        assert!(token.data.is_empty());
    }

    #[test]
    fn test_wire_shape() {
        let token = Token::new(3).with_data("round", json!(2));
        let value = serde_json::to_value(&token).unwrap();
        for field in ["id", "owner", "timestamp", "sequence", "data"] {
            assert!(value.get(field).is_some(), "missing {field}");
        }
        assert_eq!(value["data"]["round"], json!(2));
    }

    #[test]
    fn test_data_defaults_when_absent() {
        let token: Token =
            serde_json::from_str(r#"{"id":"t","owner":1,"timestamp":5,"sequence":9}"#).unwrap();
        assert_eq!(token.sequence, 9);
        assert!(token.data.is_empty());
    }
}
