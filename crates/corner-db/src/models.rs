use chrono::{DateTime, Utc};
use corner_types::models::{MessageKind, MessageView, Role};
use tracing::warn;

/// Database row types — these map directly to SQLite rows, with string
/// timestamps. Conversion to the shared wire shapes happens in
/// `MessageRow::into_view`.

pub struct UserRow {
    pub id: i64,
    pub email: String,
    pub full_name: Option<String>,
    pub role: String,
}

#[derive(Debug, Clone)]
pub struct ConversationRow {
    pub id: i64,
    pub client_user_id: i64,
    pub coach_user_id: i64,
    pub subscription_id: Option<i64>,
    pub updated_at: String,
}

#[derive(Debug, Clone)]
pub struct MessageRow {
    pub id: i64,
    pub conversation_id: i64,
    pub sender_role: String,
    pub sender_user_id: i64,
    pub body: Option<String>,
    pub message_type: String,
    pub media_url: Option<String>,
    pub media_metadata: Option<String>,
    pub created_at: String,
    pub read_at: Option<String>,
}

/// One row of a conversation listing, seat-neutral; the facade renames
/// the partner columns per role.
pub struct ConversationListRow {
    pub id: i64,
    pub partner_user_id: i64,
    pub partner_name: Option<String>,
    pub last_message_preview: Option<String>,
    pub last_message_at: Option<String>,
    pub unread_count: i64,
}

/// Parse a stored RFC 3339 timestamp, logging and defaulting on corruption.
pub fn parse_timestamp(value: &str, context: &str) -> DateTime<Utc> {
    value.parse::<DateTime<Utc>>().unwrap_or_else(|e| {
        warn!("Corrupt timestamp '{}' on {}: {}", value, context, e);
        DateTime::default()
    })
}

impl MessageRow {
    /// Convert to the wire shape shared by the WebSocket channel and the
    /// REST facade.
    pub fn into_view(self) -> MessageView {
        let sender_role = Role::parse(&self.sender_role).unwrap_or_else(|| {
            warn!("Corrupt sender_role '{}' on message {}", self.sender_role, self.id);
            Role::Client
        });
        let message_type = MessageKind::parse(&self.message_type).unwrap_or_else(|| {
            warn!("Corrupt message_type '{}' on message {}", self.message_type, self.id);
            MessageKind::Text
        });
        let media_metadata = self.media_metadata.as_deref().and_then(|raw| {
            serde_json::from_str(raw)
                .map_err(|e| warn!("Corrupt media_metadata on message {}: {}", self.id, e))
                .ok()
        });

        MessageView {
            id: self.id,
            conversation_id: self.conversation_id,
            sender_role,
            sender_user_id: self.sender_user_id,
            body: self.body,
            message_type,
            media_url: self.media_url,
            media_metadata,
            created_at: parse_timestamp(&self.created_at, "message created_at"),
            read_at: self
                .read_at
                .as_deref()
                .map(|v| parse_timestamp(v, "message read_at")),
        }
    }
}
