//! Client-facing messaging routes: list conversations, find-or-create a
//! conversation with a coach, message history, send, mark read.
//!
//! Unlike the WebSocket channel, validation failures here surface as
//! explicit errors — the caller is synchronous and expects a definitive
//! outcome. Both channels share the same delivery core, so the rules
//! are identical.

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
};

use corner_db::models::{ConversationListRow, parse_timestamp};
use corner_types::api::{
    AuthUser, ClientConversationList, ClientConversationSummary, CreateConversationRequest,
    CreateConversationResponse, CreatedConversation, MarkReadResponse, MessagesPage,
    SendMessageRequest,
};
use corner_types::models::{MessageContent, MessageView, Role};

use crate::error::{ApiError, ApiResult};
use crate::middleware::require_role;
use crate::{AppState, MessagesQuery, run_blocking};

fn summarize(row: ConversationListRow) -> ClientConversationSummary {
    ClientConversationSummary {
        id: row.id,
        coach_user_id: row.partner_user_id,
        coach_name: row.partner_name,
        last_message_preview: row.last_message_preview,
        last_message_at: row
            .last_message_at
            .as_deref()
            .map(|v| parse_timestamp(v, "conversation last_message_at")),
        unread_count: row.unread_count,
    }
}

/// GET /client/conversations
///
/// On first contact the conversation with the client's current coach is
/// opened lazily, so a subscribed client never sees an empty list.
pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Json<ClientConversationList>> {
    require_role(&user, Role::Client)?;
    let client_id = user.id;

    let db = state.db.clone();
    let mut rows = run_blocking(move || db.list_conversations_for_client(client_id)).await?;

    if rows.is_empty() {
        let db = state.db.clone();
        let sub = run_blocking(move || db.latest_active_subscription(client_id)).await?;
        if let Some((coach_id, _)) = sub {
            state
                .delivery
                .find_or_create_conversation(client_id, coach_id)
                .await?;
            let db = state.db.clone();
            rows = run_blocking(move || db.list_conversations_for_client(client_id)).await?;
        }
    }

    Ok(Json(ClientConversationList {
        conversations: rows.into_iter().map(summarize).collect(),
    }))
}

/// POST /client/conversations
///
/// Find or create the conversation with a coach. With no explicit coach
/// the latest qualifying subscription decides; without one the request
/// is forbidden.
pub async fn create_conversation(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<CreateConversationRequest>,
) -> ApiResult<Json<CreateConversationResponse>> {
    require_role(&user, Role::Client)?;
    let client_id = user.id;

    let coach_id = match req.coach_user_id {
        Some(id) => id,
        None => {
            let db = state.db.clone();
            run_blocking(move || db.latest_active_subscription(client_id))
                .await?
                .ok_or_else(|| ApiError::Forbidden("No active subscription with a coach".into()))?
                .0
        }
    };

    let conv = state
        .delivery
        .find_or_create_conversation(client_id, coach_id)
        .await?;

    let db = state.db.clone();
    let coach_user_id = conv.coach_user_id;
    let coach_name = run_blocking(move || db.user_display_name(coach_user_id)).await?;

    Ok(Json(CreateConversationResponse {
        conversation: CreatedConversation {
            id: conv.id,
            coach_user_id: conv.coach_user_id,
            coach_name,
        },
    }))
}

/// GET /client/conversations/{conversation_id}/messages
///
/// Newest first; `before=<id>` pages strictly older rows.
pub async fn list_messages(
    State(state): State<AppState>,
    Path(conversation_id): Path<i64>,
    Query(query): Query<MessagesQuery>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Json<MessagesPage>> {
    require_role(&user, Role::Client)?;
    state
        .delivery
        .assert_membership(conversation_id, user.id, Role::Client)
        .await?;

    let db = state.db.clone();
    let limit = query.limit;
    let before = query.before;
    let (rows, has_more) =
        run_blocking(move || db.messages_page(conversation_id, limit, before)).await?;

    Ok(Json(MessagesPage {
        messages: rows.into_iter().map(|row| row.into_view()).collect(),
        has_more,
    }))
}

/// POST /client/conversations/{conversation_id}/messages
pub async fn send_message(
    State(state): State<AppState>,
    Path(conversation_id): Path<i64>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<SendMessageRequest>,
) -> ApiResult<(StatusCode, Json<MessageView>)> {
    require_role(&user, Role::Client)?;

    let content =
        MessageContent::new(req.message_type, req.body, req.media_url, req.media_metadata)
            .ok_or_else(|| {
                ApiError::Validation(
                    "text requires a non-empty body; image requires a media_url".into(),
                )
            })?;

    let message = state
        .delivery
        .send_message(user.id, conversation_id, content)
        .await?;

    Ok((StatusCode::CREATED, Json(message)))
}

/// PATCH /client/conversations/{conversation_id}/messages/{message_id}/read
///
/// Marking an already-read message is a no-op, not an error.
pub async fn mark_read(
    State(state): State<AppState>,
    Path((conversation_id, message_id)): Path<(i64, i64)>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Json<MarkReadResponse>> {
    require_role(&user, Role::Client)?;

    // Membership (and the reader's seat) is re-derived inside the
    // delivery core, exactly as on the WebSocket channel.
    let read = state
        .delivery
        .mark_read(user.id, conversation_id, message_id)
        .await?;

    Ok(Json(MarkReadResponse { read }))
}
