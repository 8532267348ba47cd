use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;

/// A frame delivered on a broker channel. Presence bookkeeping events and
/// application messages share the wire so one decoder handles both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChannelEvent {
    /// Initial snapshot sent once the broker accepts the subscription.
    SubscriptionSucceeded { members: Vec<Value> },
    MemberAdded { member: Value },
    MemberRemoved { id: String },
    /// Application event published by a procedure handler.
    Message { event: String, payload: Value },
}

impl ChannelEvent {
    pub fn name(&self) -> &str {
        match self {
            Self::SubscriptionSucceeded { .. } => "subscription_succeeded",
            Self::MemberAdded { .. } => "member_added",
            Self::MemberRemoved { .. } => "member_removed",
            Self::Message { event, .. } => event,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Body of a channel-authorization request: socket id, channel name, and any
/// client-supplied partial member fields flattened alongside them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthRequest {
    pub socket_id: String,
    pub channel_name: String,
    #[serde(flatten)]
    pub data: serde_json::Map<String, Value>,
}

/// The opaque error shape the gateway is allowed to put on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireError {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::{AuthRequest, ChannelEvent};
    use serde_json::json;

    #[test]
    fn encode_decode_event_succeeds() {
        let original = ChannelEvent::Message {
            event: "track_started".to_string(),
            payload: json!({"track": "t1", "round": 3}),
        };

        let bytes = original.to_bytes().unwrap();
        let decoded = ChannelEvent::from_bytes(&bytes).unwrap();

        assert_eq!(decoded, original);
        assert_eq!(decoded.name(), "track_started");
    }

    #[test]
    fn encode_decode_member_added_succeeds() {
        let original = ChannelEvent::MemberAdded {
            member: json!({"id": "u1", "name": "Alice"}),
        };

        let decoded = ChannelEvent::from_bytes(&original.to_bytes().unwrap()).unwrap();

        if let ChannelEvent::MemberAdded { member } = decoded {
            assert_eq!(member["id"], "u1");
        } else {
            panic!("decoded wrong event kind");
        }
    }

    #[test]
    fn unknown_kind_fails() {
        assert!(ChannelEvent::from_bytes(br#"{"kind":"mystery"}"#).is_err());
    }

    #[test]
    fn auth_request_flattens_partial_member_fields() {
        let body = json!({
            "socket_id": "123.456",
            "channel_name": "presence-game-abc",
            "isHost": true
        });

        let request: AuthRequest = serde_json::from_value(body).unwrap();

        assert_eq!(request.socket_id, "123.456");
        assert_eq!(request.channel_name, "presence-game-abc");
        assert_eq!(request.data.get("isHost"), Some(&json!(true)));
    }
}
