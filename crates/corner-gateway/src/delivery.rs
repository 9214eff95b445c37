//! The delivery protocol core shared by both channels.
//!
//! The WebSocket adapter and the REST facade both funnel through this
//! service, so membership checks, role derivation and fan-out rules are
//! defined exactly once. It holds no state of its own beyond what it
//! reads from the store; fan-out happens strictly after the durable
//! write commits.

use std::sync::Arc;

use tracing::warn;

use corner_db::Database;
use corner_db::models::ConversationRow;
use corner_types::events::ServerEvent;
use corner_types::models::{MessageContent, MessageView, Role};

use crate::registry::Registry;

/// Why an operation was rejected. The REST facade maps these to HTTP
/// errors; the WebSocket adapter logs and drops them.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// Conversation missing, or the caller does not occupy the expected
    /// seat. Deliberately indistinguishable, so non-members learn
    /// nothing about which conversations exist.
    #[error("conversation not found")]
    NotFound,

    /// No qualifying subscription links this client to this coach.
    #[error("no active subscription with this coach")]
    Forbidden,

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, DeliveryError>;

#[derive(Clone)]
pub struct Delivery {
    db: Arc<Database>,
    registry: Registry,
}

impl Delivery {
    pub fn new(db: Arc<Database>, registry: Registry) -> Self {
        Self { db, registry }
    }

    pub fn db(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Resolve the conversation and the seat `user_id` occupies in it.
    async fn membership(&self, conversation_id: i64, user_id: i64) -> Result<(ConversationRow, Role)> {
        let db = self.db.clone();
        let conv = run_blocking(move || db.get_conversation(conversation_id))
            .await?
            .ok_or(DeliveryError::NotFound)?;

        let role = if user_id == conv.client_user_id {
            Role::Client
        } else if user_id == conv.coach_user_id {
            Role::Coach
        } else {
            return Err(DeliveryError::NotFound);
        };
        Ok((conv, role))
    }

    /// The sole authorization gate for message operations: `NotFound`
    /// unless `user_id` occupies `expected` in the conversation.
    pub async fn assert_membership(
        &self,
        conversation_id: i64,
        user_id: i64,
        expected: Role,
    ) -> Result<ConversationRow> {
        let (conv, role) = self.membership(conversation_id, user_id).await?;
        if role != expected {
            return Err(DeliveryError::NotFound);
        }
        Ok(conv)
    }

    /// Find or create the conversation linking this client to this
    /// coach, gated by the subscription ledger. The upsert touches
    /// last-activity on conflict, so repeated calls are idempotent.
    pub async fn find_or_create_conversation(
        &self,
        client_id: i64,
        coach_id: i64,
    ) -> Result<ConversationRow> {
        let db = self.db.clone();
        run_blocking(move || {
            match db.find_active_subscription(client_id, coach_id)? {
                Some(subscription_id) => {
                    Ok(Some(db.upsert_conversation(client_id, coach_id, Some(subscription_id))?))
                }
                None => Ok(None),
            }
        })
        .await?
        .ok_or(DeliveryError::Forbidden)
    }

    /// Persist a message and push it to every live connection of both
    /// participants. The sender role comes from membership, never from
    /// the caller.
    pub async fn send_message(
        &self,
        sender_id: i64,
        conversation_id: i64,
        content: MessageContent,
    ) -> Result<MessageView> {
        let (conv, sender_role) = self.membership(conversation_id, sender_id).await?;

        let db = self.db.clone();
        let row = run_blocking(move || {
            db.insert_message(conversation_id, sender_role, sender_id, &content)
        })
        .await?;
        let message = row.into_view();

        // Fan-out only after the write committed: a crash in between can
        // strand a delivery (recovered by the next history fetch), never
        // lose or duplicate the stored message.
        let event = ServerEvent::NewMessage {
            conversation_id,
            message: message.clone(),
        };
        let recipient_id = match sender_role {
            Role::Client => conv.coach_user_id,
            Role::Coach => conv.client_user_id,
        };
        self.registry.deliver(sender_id, &event);
        self.registry.deliver(recipient_id, &event);

        Ok(message)
    }

    /// Relay a typing indicator to the other participant's connections.
    /// Nothing is persisted.
    pub async fn typing(&self, sender_id: i64, conversation_id: i64) -> Result<()> {
        let (conv, sender_role) = self.membership(conversation_id, sender_id).await?;
        let recipient_id = match sender_role {
            Role::Client => conv.coach_user_id,
            Role::Coach => conv.client_user_id,
        };
        self.registry.deliver(
            recipient_id,
            &ServerEvent::Typing {
                conversation_id,
                user_id: sender_id,
            },
        );
        Ok(())
    }

    /// Mark a message read. Returns false when nothing transitioned
    /// (own message, or already read) — an expected idempotent outcome.
    /// On true, the original sender is notified exactly once.
    pub async fn mark_read(
        &self,
        reader_id: i64,
        conversation_id: i64,
        message_id: i64,
    ) -> Result<bool> {
        let (_conv, reader_role) = self.membership(conversation_id, reader_id).await?;

        let db = self.db.clone();
        let sender =
            run_blocking(move || db.mark_message_read(conversation_id, message_id, reader_role))
                .await?;

        match sender {
            Some(sender_user_id) => {
                self.registry.deliver(
                    sender_user_id,
                    &ServerEvent::MessageRead {
                        conversation_id,
                        message_id,
                    },
                );
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Conversation ids for the `connected` acknowledgement.
    pub async fn conversation_ids(&self, user_id: i64) -> Result<Vec<i64>> {
        let db = self.db.clone();
        Ok(run_blocking(move || db.conversation_ids_for_user(user_id)).await?)
    }
}

/// Run a blocking store call off the async runtime.
async fn run_blocking<T, F>(f: F) -> anyhow::Result<T>
where
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => result,
        Err(e) => {
            warn!("blocking task join error: {}", e);
            Err(anyhow::anyhow!("blocking task join error: {}", e))
        }
    }
}
