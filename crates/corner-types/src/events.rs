use serde::{Deserialize, Serialize};

use crate::models::{MessageKind, MessageView};

/// Events sent FROM client TO server over the WebSocket channel.
/// Flat internally-tagged JSON, e.g. `{"type":"message","conversation_id":1,...}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Persist a message and fan it out to both participants
    Message {
        conversation_id: i64,
        #[serde(default)]
        message_type: MessageKind,
        #[serde(default)]
        body: Option<String>,
        #[serde(default)]
        media_url: Option<String>,
        #[serde(default)]
        media_metadata: Option<serde_json::Value>,
    },

    /// Typing indicator, relayed to the other participant only
    Typing { conversation_id: i64 },

    /// Mark a message read and notify its original sender
    Read { conversation_id: i64, message_id: i64 },

    /// Liveness probe, answered with `pong` on the same connection
    Heartbeat,
}

/// Events sent FROM server TO client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Connection authenticated; carries every conversation the user
    /// belongs to so the client can prefetch without a listing call
    Connected {
        user_id: i64,
        conversation_ids: Vec<i64>,
    },

    /// A message was persisted in one of the user's conversations
    NewMessage {
        conversation_id: i64,
        message: MessageView,
    },

    /// The other participant is typing
    Typing { conversation_id: i64, user_id: i64 },

    /// The other participant read a message this user sent
    MessageRead { conversation_id: i64, message_id: i64 },

    /// Heartbeat reply
    Pong,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbound_events_use_flat_tagged_json() {
        let event: ClientEvent = serde_json::from_str(
            r#"{"type":"message","conversation_id":1,"body":"hi","message_type":"text"}"#,
        )
        .unwrap();
        match event {
            ClientEvent::Message { conversation_id, message_type, body, .. } => {
                assert_eq!(conversation_id, 1);
                assert_eq!(message_type, MessageKind::Text);
                assert_eq!(body.as_deref(), Some("hi"));
            }
            other => panic!("unexpected event: {other:?}"),
        }

        let event: ClientEvent =
            serde_json::from_str(r#"{"type":"heartbeat"}"#).unwrap();
        assert!(matches!(event, ClientEvent::Heartbeat));
    }

    #[test]
    fn message_type_defaults_to_text() {
        let event: ClientEvent =
            serde_json::from_str(r#"{"type":"message","conversation_id":3,"body":"hey"}"#).unwrap();
        match event {
            ClientEvent::Message { message_type, .. } => {
                assert_eq!(message_type, MessageKind::Text)
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn outbound_events_match_the_wire_protocol() {
        let json = serde_json::to_value(ServerEvent::Pong).unwrap();
        assert_eq!(json, serde_json::json!({"type": "pong"}));

        let json = serde_json::to_value(ServerEvent::Connected {
            user_id: 5,
            conversation_ids: vec![1, 2],
        })
        .unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "connected", "user_id": 5, "conversation_ids": [1, 2]})
        );

        let json = serde_json::to_value(ServerEvent::MessageRead {
            conversation_id: 1,
            message_id: 42,
        })
        .unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "message_read", "conversation_id": 1, "message_id": 42})
        );
    }
}
