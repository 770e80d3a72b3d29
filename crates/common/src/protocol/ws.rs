// WebSocket message types for the commune-chat.v1 protocol.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::ChatMessage;

/// All message types in the commune-chat.v1 WebSocket protocol.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsMessage {
    /// Server -> Client: sent once, immediately after the connection is
    /// accepted. The connection id is opaque and process-local.
    Connected {
        connection_id: Uuid,
        server_time: DateTime<Utc>,
    },

    /// Client -> Server: join a room. Joining a room twice is a no-op.
    Join { room_id: Uuid },

    /// Client -> Server: leave a room. Leaving a room that was never
    /// joined is a no-op; other memberships are untouched.
    Leave { room_id: Uuid },

    /// Client -> Server: publish a message to a room. The reply is either
    /// a fanned-out `message_delivered` (the publisher is a room member
    /// like any other) or an `error` frame.
    Publish {
        room_id: Uuid,
        sender_id: Uuid,
        content: String,
    },

    /// Client -> Server: request the durable history of a room.
    FetchHistory { room_id: Uuid },

    /// Server -> Client: a persisted message being fanned out to every
    /// member of its room.
    MessageDelivered { message: ChatMessage },

    /// Server -> Client: reply to `fetch_history`, ascending by creation
    /// time. Sent to the requester only.
    History {
        room_id: Uuid,
        messages: Vec<ChatMessage>,
    },

    /// Server -> Client: error.
    Error {
        code: String,
        message: String,
        retryable: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        room_id: Option<Uuid>,
    },
}

pub fn decode_message(raw: &str) -> Result<WsMessage, serde_json::Error> {
    serde_json::from_str::<WsMessage>(raw)
}

pub fn encode_message(message: &WsMessage) -> Result<String, serde_json::Error> {
    serde_json::to_string(message)
}

#[cfg(test)]
mod tests {
    use super::{decode_message, encode_message, WsMessage};
    use uuid::Uuid;

    #[test]
    fn frames_round_trip_through_json() {
        let room_id = Uuid::new_v4();
        let frame = WsMessage::Join { room_id };

        let encoded = encode_message(&frame).expect("frame should encode");
        let decoded = decode_message(&encoded).expect("frame should decode");

        assert_eq!(decoded, frame);
    }

    #[test]
    fn tag_field_uses_snake_case() {
        let encoded = encode_message(&WsMessage::FetchHistory { room_id: Uuid::new_v4() })
            .expect("frame should encode");
        let value: serde_json::Value =
            serde_json::from_str(&encoded).expect("frame should be valid json");

        assert_eq!(value["type"], "fetch_history");
    }

    #[test]
    fn unknown_frame_type_fails_to_decode() {
        assert!(decode_message(r#"{"type":"subscribe","room_id":"not-even-a-uuid"}"#).is_err());
    }
}
