//! Coach-facing messaging routes, mirroring the client router.
//!
//! Conversations are always opened from the client side (creation is
//! gated by the client's subscription), so the coach surface has no
//! create endpoint.

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
};

use corner_db::models::{ConversationListRow, parse_timestamp};
use corner_types::api::{
    AuthUser, CoachConversationList, CoachConversationSummary, MarkReadResponse, MessagesPage,
    SendMessageRequest,
};
use corner_types::models::{MessageContent, MessageView, Role};

use crate::error::{ApiError, ApiResult};
use crate::middleware::require_role;
use crate::{AppState, MessagesQuery, run_blocking};

fn summarize(row: ConversationListRow) -> CoachConversationSummary {
    CoachConversationSummary {
        id: row.id,
        client_user_id: row.partner_user_id,
        client_name: row.partner_name,
        last_message_preview: row.last_message_preview,
        last_message_at: row
            .last_message_at
            .as_deref()
            .map(|v| parse_timestamp(v, "conversation last_message_at")),
        unread_count: row.unread_count,
    }
}

/// GET /coach/conversations
pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Json<CoachConversationList>> {
    require_role(&user, Role::Coach)?;
    let coach_id = user.id;

    let db = state.db.clone();
    let rows = run_blocking(move || db.list_conversations_for_coach(coach_id)).await?;

    Ok(Json(CoachConversationList {
        conversations: rows.into_iter().map(summarize).collect(),
    }))
}

/// GET /coach/conversations/{conversation_id}/messages
pub async fn list_messages(
    State(state): State<AppState>,
    Path(conversation_id): Path<i64>,
    Query(query): Query<MessagesQuery>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Json<MessagesPage>> {
    require_role(&user, Role::Coach)?;
    state
        .delivery
        .assert_membership(conversation_id, user.id, Role::Coach)
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

/// POST /coach/conversations/{conversation_id}/messages
pub async fn send_message(
    State(state): State<AppState>,
    Path(conversation_id): Path<i64>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<SendMessageRequest>,
) -> ApiResult<(StatusCode, Json<MessageView>)> {
    require_role(&user, Role::Coach)?;

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

/// PATCH /coach/conversations/{conversation_id}/messages/{message_id}/read
pub async fn mark_read(
    State(state): State<AppState>,
    Path((conversation_id, message_id)): Path<(i64, i64)>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Json<MarkReadResponse>> {
    require_role(&user, Role::Coach)?;

    let read = state
        .delivery
        .mark_read(user.id, conversation_id, message_id)
        .await?;

    Ok(Json(MarkReadResponse { read }))
}
