use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Rendered in conversation listings instead of an image message's URL.
pub const IMAGE_PREVIEW_PLACEHOLDER: &str = "[Image]";

/// Which seat a user occupies in a conversation. Always derived from
/// conversation membership, never taken from the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Client,
    Coach,
}

impl Role {
    pub fn other(self) -> Role {
        match self {
            Role::Client => Role::Coach,
            Role::Coach => Role::Client,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Client => "client",
            Role::Coach => "coach",
        }
    }

    pub fn parse(value: &str) -> Option<Role> {
        match value {
            "client" => Some(Role::Client),
            "coach" => Some(Role::Coach),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Image => "image",
        }
    }

    pub fn parse(value: &str) -> Option<MessageKind> {
        match value {
            "text" => Some(MessageKind::Text),
            "image" => Some(MessageKind::Image),
            _ => None,
        }
    }
}

/// Validated message payload. Constructing one proves the kind-specific
/// required fields are present: the store never sees a text message
/// without a body or an image without a URL.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageContent {
    Text {
        body: String,
    },
    Image {
        media_url: String,
        media_metadata: Option<serde_json::Value>,
        caption: Option<String>,
    },
}

impl MessageContent {
    /// Build from loose wire fields. Text bodies are trimmed and must be
    /// non-empty; images require a media URL and treat the body as an
    /// optional caption. Returns `None` when a required field is missing.
    pub fn new(
        kind: MessageKind,
        body: Option<String>,
        media_url: Option<String>,
        media_metadata: Option<serde_json::Value>,
    ) -> Option<MessageContent> {
        match kind {
            MessageKind::Text => {
                let body = body?.trim().to_string();
                if body.is_empty() {
                    return None;
                }
                Some(MessageContent::Text { body })
            }
            MessageKind::Image => {
                let media_url = media_url.filter(|url| !url.is_empty())?;
                let caption = body
                    .map(|b| b.trim().to_string())
                    .filter(|b| !b.is_empty());
                Some(MessageContent::Image {
                    media_url,
                    media_metadata,
                    caption,
                })
            }
        }
    }

}

/// Wire shape of a persisted message, shared by the WebSocket channel
/// and the REST facade so both observe identical state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageView {
    pub id: i64,
    pub conversation_id: i64,
    pub sender_role: Role,
    pub sender_user_id: i64,
    pub body: Option<String>,
    pub message_type: MessageKind,
    pub media_url: Option<String>,
    pub media_metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
}
