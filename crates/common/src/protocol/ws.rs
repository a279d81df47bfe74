// WebSocket event types for the coedit room protocol.
//
// Every frame is a JSON text frame shaped `{ "type": ..., "payload": { ... } }`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::ChatEvent;

/// Query parameter carrying the bearer token on the upgrade request.
pub const TOKEN_QUERY_PARAM: &str = "token";

/// Client -> Server events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum ClientEvent {
    /// Enter the room of one document. Accepted once per connection.
    JoinRoom {
        #[serde(rename = "roomId")]
        room_id: String,
    },

    /// Full content snapshot, forwarded verbatim to the other room members.
    ContentChange { content: Value },

    /// Chat line; the relay attaches author and timestamp.
    ChatMessage { message: String },
}

/// Server -> Client events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// Terminal error; the relay closes the connection after sending it.
    Error { message: String },

    /// A peer's content snapshot.
    ContentChange { content: Value },

    /// A chat line from any room member, the receiver included.
    ChatMessage(ChatEvent),
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error { message: message.into() }
    }

    /// Wire name of the event, as it appears in the `type` field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Error { .. } => "error",
            Self::ContentChange { .. } => "content-change",
            Self::ChatMessage(_) => "chat-message",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ClientEvent, ServerEvent};
    use crate::types::ChatEvent;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    #[test]
    fn client_events_decode_from_envelope() {
        let join: ClientEvent =
            serde_json::from_value(json!({ "type": "join-room", "payload": { "roomId": "abc" } }))
                .expect("join-room should decode");
        assert_eq!(join, ClientEvent::JoinRoom { room_id: "abc".to_string() });

        let change: ClientEvent = serde_json::from_value(
            json!({ "type": "content-change", "payload": { "content": "<p>hi</p>" } }),
        )
        .expect("content-change should decode");
        assert_eq!(change, ClientEvent::ContentChange { content: json!("<p>hi</p>") });

        let chat: ClientEvent =
            serde_json::from_value(json!({ "type": "chat-message", "payload": { "message": "hi" } }))
                .expect("chat-message should decode");
        assert_eq!(chat, ClientEvent::ChatMessage { message: "hi".to_string() });
    }

    #[test]
    fn content_is_opaque_json() {
        let change: ClientEvent = serde_json::from_value(json!({
            "type": "content-change",
            "payload": { "content": { "ops": [{ "insert": "x" }] } }
        }))
        .expect("structured content should decode");

        assert_eq!(
            change,
            ClientEvent::ContentChange { content: json!({ "ops": [{ "insert": "x" }] }) }
        );
    }

    #[test]
    fn unknown_types_and_malformed_payloads_fail_to_decode() {
        for raw in [
            json!({ "type": "cursor-move", "payload": { "x": 1 } }),
            json!({ "type": "join-room", "payload": {} }),
            json!({ "type": "chat-message", "payload": { "message": 42 } }),
            json!({ "type": "content-change", "payload": {} }),
            json!({ "payload": { "message": "hi" } }),
            json!("join-room"),
        ] {
            assert!(
                serde_json::from_value::<ClientEvent>(raw.clone()).is_err(),
                "expected decode failure for {raw}"
            );
        }
    }

    #[test]
    fn server_events_encode_to_envelope() {
        let error = serde_json::to_value(ServerEvent::error("Access denied"))
            .expect("error should encode");
        assert_eq!(error, json!({ "type": "error", "payload": { "message": "Access denied" } }));

        let change = serde_json::to_value(ServerEvent::ContentChange { content: json!("hello") })
            .expect("content-change should encode");
        assert_eq!(change, json!({ "type": "content-change", "payload": { "content": "hello" } }));

        let timestamp = Utc.with_ymd_and_hms(2026, 2, 7, 0, 0, 0).unwrap();
        let chat = serde_json::to_value(ServerEvent::ChatMessage(ChatEvent::new(
            "alice", "hi", timestamp,
        )))
        .expect("chat-message should encode");
        assert_eq!(
            chat,
            json!({
                "type": "chat-message",
                "payload": {
                    "user": "alice",
                    "message": "hi",
                    "timestamp": "2026-02-07T00:00:00.000Z"
                }
            })
        );
    }

    #[test]
    fn kind_matches_serialized_type() {
        let events = [
            ServerEvent::error("x"),
            ServerEvent::ContentChange { content: json!(null) },
            ServerEvent::ChatMessage(ChatEvent::new("a", "b", Utc::now())),
        ];
        for event in events {
            let value = serde_json::to_value(&event).expect("event should encode");
            assert_eq!(value["type"], event.kind());
        }
    }
}
