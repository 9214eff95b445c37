use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{MessageKind, MessageView, Role};

// -- Identity --

/// JWT claims shared across corner-api (REST middleware) and
/// corner-gateway (WebSocket authentication). Canonical definition lives
/// here in corner-types to eliminate duplication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: i64,
    pub exp: usize,
}

/// Authenticated caller: numeric user id plus the role read back from
/// the users table, never from the credential itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser {
    pub id: i64,
    pub role: Role,
}

// -- Conversations --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateConversationRequest {
    /// Omitted: defaults to the coach of the client's latest qualifying
    /// subscription.
    #[serde(default)]
    pub coach_user_id: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreatedConversation {
    pub id: i64,
    pub coach_user_id: i64,
    pub coach_name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateConversationResponse {
    pub conversation: CreatedConversation,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ClientConversationSummary {
    pub id: i64,
    pub coach_user_id: i64,
    pub coach_name: Option<String>,
    pub last_message_preview: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub unread_count: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ClientConversationList {
    pub conversations: Vec<ClientConversationSummary>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CoachConversationSummary {
    pub id: i64,
    pub client_user_id: i64,
    pub client_name: Option<String>,
    pub last_message_preview: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub unread_count: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CoachConversationList {
    pub conversations: Vec<CoachConversationSummary>,
}

// -- Messages --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    #[serde(default)]
    pub message_type: MessageKind,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub media_url: Option<String>,
    #[serde(default)]
    pub media_metadata: Option<serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessagesPage {
    pub messages: Vec<MessageView>,
    pub has_more: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MarkReadResponse {
    pub read: bool,
}
