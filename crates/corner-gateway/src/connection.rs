//! WebSocket channel: one task per connection.
//!
//! A connection is unauthenticated until the bearer credential passed at
//! upgrade time validates; failure closes the socket with an explicit
//! unauthorized code and no event is ever processed. Once registered,
//! every inbound event runs inside an isolating boundary — malformed or
//! rejected events are logged and dropped, never surfaced as error
//! frames, so a buggy client cannot take the channel down.

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use jsonwebtoken::{DecodingKey, Validation, decode};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use corner_types::api::{AuthUser, Claims};
use corner_types::events::{ClientEvent, ServerEvent};
use corner_types::models::{MessageContent, Role};

use crate::delivery::Delivery;

/// Close code sent when credential validation fails.
const CLOSE_UNAUTHORIZED: u16 = 4001;

pub async fn handle_socket(
    mut socket: WebSocket,
    delivery: Delivery,
    jwt_secret: String,
    token: Option<String>,
) {
    let user = match authenticate(&delivery, &jwt_secret, token.as_deref()).await {
        Some(user) => user,
        None => {
            warn!("WebSocket client failed to authenticate, closing");
            let _ = socket
                .send(Message::Close(Some(CloseFrame {
                    code: CLOSE_UNAUTHORIZED,
                    reason: "Unauthorized".into(),
                })))
                .await;
            return;
        }
    };

    let user_id = user.id;
    let registration = delivery.registry().register(user_id);
    let conn_id = registration.conn_id;
    let reply = registration.reply;
    let mut events = registration.events;

    info!(
        "WS connected: user_id={}, total_connections={}",
        user_id,
        delivery.registry().connection_count()
    );

    // The acknowledgement carries the user's conversation ids so the
    // client can prefetch without a separate listing call.
    let conversation_ids = match delivery.conversation_ids(user_id).await {
        Ok(ids) => ids,
        Err(e) => {
            warn!("WS init error for user {}: {}", user_id, e);
            Vec::new()
        }
    };
    let connected = ServerEvent::Connected {
        user_id,
        conversation_ids,
    };

    let (mut ws_tx, mut ws_rx) = socket.split();

    if ws_tx
        .send(Message::Text(
            serde_json::to_string(&connected).unwrap().into(),
        ))
        .await
        .is_err()
    {
        delivery.registry().unregister(user_id, conn_id);
        return;
    }

    // Forward registry deliveries (and direct replies) to the socket.
    let mut send_task = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    warn!("failed to serialize event: {}", e);
                    continue;
                }
            };
            if ws_tx.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    // Read events from the client.
    let delivery_recv = delivery.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<ClientEvent>(&text) {
                    Ok(event) => handle_event(&delivery_recv, user_id, &reply, event).await,
                    Err(e) => {
                        warn!(
                            "user {} bad event: {} -- raw: {}",
                            user_id,
                            e,
                            &text[..text.len().min(200)]
                        );
                    }
                },
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Either half finishing tears down the other.
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    delivery.registry().unregister(user_id, conn_id);
    info!("WS disconnected: user_id={}", user_id);
}

/// Identity collaborator: decode the bearer credential, then re-read the
/// user row for the role. Any failure is a plain `None` — the caller
/// closes with the unauthorized code.
async fn authenticate(delivery: &Delivery, jwt_secret: &str, token: Option<&str>) -> Option<AuthUser> {
    let token = token?;
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .ok()?;

    let user_id = data.claims.sub;
    let db = delivery.db().clone();
    let row = tokio::task::spawn_blocking(move || db.get_user_auth(user_id))
        .await
        .ok()?
        .ok()??;
    let role = Role::parse(&row.role)?;

    Some(AuthUser { id: row.id, role })
}

/// Process one inbound event. Failures are logged and dropped — absence
/// of an acknowledgement is the only rejection signal on this channel.
async fn handle_event(
    delivery: &Delivery,
    user_id: i64,
    reply: &mpsc::UnboundedSender<ServerEvent>,
    event: ClientEvent,
) {
    match event {
        ClientEvent::Message {
            conversation_id,
            message_type,
            body,
            media_url,
            media_metadata,
        } => {
            let Some(content) = MessageContent::new(message_type, body, media_url, media_metadata)
            else {
                warn!("user {} message event missing required fields", user_id);
                return;
            };
            if let Err(e) = delivery.send_message(user_id, conversation_id, content).await {
                warn!("user {} send failed: {}", user_id, e);
            }
        }

        ClientEvent::Typing { conversation_id } => {
            if let Err(e) = delivery.typing(user_id, conversation_id).await {
                debug!("user {} typing dropped: {}", user_id, e);
            }
        }

        ClientEvent::Read {
            conversation_id,
            message_id,
        } => {
            if let Err(e) = delivery.mark_read(user_id, conversation_id, message_id).await {
                warn!("user {} read failed: {}", user_id, e);
            }
        }

        ClientEvent::Heartbeat => {
            // Direct reply on the originating connection only.
            let _ = reply.send(ServerEvent::Pong);
        }
    }
}
