//! Transport-agnostic message shapes
//!
//! Every adapter normalizes its own framing into [`WireMessage`] and then into an
//! [`InboundMessage`] before anything reaches the channel registry.

use crate::error::{RealtimeError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The normalized `{ channel, type, payload }` shape consumed by the registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    pub channel: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl WireMessage {
    /// Parse a JSON text frame, rejecting frames without a channel or type
    pub fn parse(text: &str) -> Result<Self> {
        let msg: WireMessage = serde_json::from_str(text)
            .map_err(|e| RealtimeError::Protocol(format!("malformed frame: {}", e)))?;

        if msg.event_type.is_empty() {
            return Err(RealtimeError::Protocol("frame has an empty type".into()));
        }

        Ok(msg)
    }
}

/// A message received from the backend, immutable once constructed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub channel: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub payload: serde_json::Value,
    pub received_at: DateTime<Utc>,
}

impl InboundMessage {
    /// Build a message stamped with the current time
    pub fn new(
        channel: impl Into<String>,
        event_type: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            channel: channel.into(),
            event_type: event_type.into(),
            payload,
            received_at: Utc::now(),
        }
    }

    /// Check the message type
    pub fn is_type(&self, event_type: &str) -> bool {
        self.event_type == event_type
    }
}

impl From<WireMessage> for InboundMessage {
    fn from(wire: WireMessage) -> Self {
        Self::new(wire.channel, wire.event_type, wire.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_message_parse() {
        let msg = WireMessage::parse(
            r#"{"channel":"leaderboard","type":"rank-change","payload":{"userId":"user-2","newRank":1}}"#,
        )
        .unwrap();

        assert_eq!(msg.channel, "leaderboard");
        assert_eq!(msg.event_type, "rank-change");
        assert_eq!(msg.payload, json!({"userId": "user-2", "newRank": 1}));
    }

    #[test]
    fn test_wire_message_payload_defaults_to_null() {
        let msg = WireMessage::parse(r#"{"channel":"public","type":"class-online"}"#).unwrap();
        assert_eq!(msg.payload, serde_json::Value::Null);
    }

    #[test]
    fn test_wire_message_rejects_missing_fields() {
        assert!(matches!(
            WireMessage::parse(r#"{"type":"x"}"#),
            Err(RealtimeError::Protocol(_))
        ));
        assert!(matches!(
            WireMessage::parse(r#"{"channel":"public","type":""}"#),
            Err(RealtimeError::Protocol(_))
        ));
        assert!(matches!(
            WireMessage::parse("not json"),
            Err(RealtimeError::Protocol(_))
        ));
    }

    #[test]
    fn test_inbound_message_from_wire() {
        let wire = WireMessage {
            channel: "public".into(),
            event_type: "achievement-unlocked".into(),
            payload: json!({"badge": "streak-7"}),
        };
        let msg = InboundMessage::from(wire);

        assert_eq!(msg.channel, "public");
        assert!(msg.is_type("achievement-unlocked"));
        assert!(!msg.is_type("class-online"));
    }

    #[test]
    fn test_inbound_message_serializes_type_field() {
        let msg = InboundMessage::new("public", "class-online", json!({}));
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "class-online");
        assert!(value.get("event_type").is_none());
    }
}
