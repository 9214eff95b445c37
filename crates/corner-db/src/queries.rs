use crate::Database;
use crate::models::{ConversationListRow, ConversationRow, MessageRow, UserRow};
use anyhow::Result;
use chrono::Utc;
use corner_types::models::{IMAGE_PREVIEW_PLACEHOLDER, MessageContent, Role};
use rusqlite::Connection;

impl Database {
    // -- Users (identity collaborator surface) --

    pub fn create_user(&self, email: &str, full_name: Option<&str>, role: Role) -> Result<i64> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (email, full_name, role) VALUES (?1, ?2, ?3)",
                rusqlite::params![email, full_name, role.as_str()],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn get_user_auth(&self, id: i64) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, email, full_name, role FROM users WHERE id = ?1",
                [id],
                |row| {
                    Ok(UserRow {
                        id: row.get(0)?,
                        email: row.get(1)?,
                        full_name: row.get(2)?,
                        role: row.get(3)?,
                    })
                },
            )
            .optional()
        })
    }

    pub fn user_display_name(&self, id: i64) -> Result<Option<String>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT COALESCE(full_name, email) FROM users WHERE id = ?1",
                [id],
                |row| row.get(0),
            )
            .optional()
        })
    }

    // -- Subscriptions (ledger collaborator surface) --

    pub fn create_subscription(
        &self,
        client_user_id: i64,
        coach_user_id: i64,
        status: &str,
        ends_at: Option<&str>,
    ) -> Result<i64> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO subscriptions (client_user_id, coach_user_id, status, ends_at, purchased_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    client_user_id,
                    coach_user_id,
                    status,
                    ends_at,
                    Utc::now().to_rfc3339()
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Id of the qualifying (active, unexpired) subscription linking
    /// exactly this pair, if any.
    pub fn find_active_subscription(
        &self,
        client_user_id: i64,
        coach_user_id: i64,
    ) -> Result<Option<i64>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id FROM subscriptions
                 WHERE client_user_id = ?1 AND coach_user_id = ?2
                   AND status = 'active' AND (ends_at IS NULL OR ends_at > ?3)
                 ORDER BY id DESC LIMIT 1",
                rusqlite::params![client_user_id, coach_user_id, Utc::now().to_rfc3339()],
                |row| row.get(0),
            )
            .optional()
        })
    }

    /// The client's current coach: (coach_user_id, subscription_id) of
    /// the most recent qualifying subscription.
    pub fn latest_active_subscription(&self, client_user_id: i64) -> Result<Option<(i64, i64)>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT coach_user_id, id FROM subscriptions
                 WHERE client_user_id = ?1
                   AND status = 'active' AND (ends_at IS NULL OR ends_at > ?2)
                 ORDER BY purchased_at DESC, id DESC LIMIT 1",
                rusqlite::params![client_user_id, Utc::now().to_rfc3339()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
        })
    }

    // -- Conversations --

    /// Upsert keyed on the (client, coach) pair. A conflict touches
    /// last-activity and keeps the originally linked subscription.
    pub fn upsert_conversation(
        &self,
        client_user_id: i64,
        coach_user_id: i64,
        subscription_id: Option<i64>,
    ) -> Result<ConversationRow> {
        self.with_conn(|conn| {
            let row = conn.query_row(
                "INSERT INTO conversations (client_user_id, coach_user_id, subscription_id, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(client_user_id, coach_user_id) DO UPDATE SET updated_at = excluded.updated_at
                 RETURNING id, client_user_id, coach_user_id, subscription_id, updated_at",
                rusqlite::params![
                    client_user_id,
                    coach_user_id,
                    subscription_id,
                    Utc::now().to_rfc3339()
                ],
                map_conversation,
            )?;
            Ok(row)
        })
    }

    pub fn get_conversation(&self, id: i64) -> Result<Option<ConversationRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, client_user_id, coach_user_id, subscription_id, updated_at
                 FROM conversations WHERE id = ?1",
                [id],
                map_conversation,
            )
            .optional()
        })
    }

    /// Every conversation the user belongs to, either seat.
    pub fn conversation_ids_for_user(&self, user_id: i64) -> Result<Vec<i64>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id FROM conversations
                 WHERE client_user_id = ?1 OR coach_user_id = ?1
                 ORDER BY id",
            )?;
            let ids = stmt
                .query_map([user_id], |row| row.get(0))?
                .collect::<std::result::Result<Vec<i64>, _>>()?;
            Ok(ids)
        })
    }

    pub fn list_conversations_for_client(&self, client_user_id: i64) -> Result<Vec<ConversationListRow>> {
        self.with_conn(|conn| query_conversation_list(conn, client_user_id, Role::Client))
    }

    pub fn list_conversations_for_coach(&self, coach_user_id: i64) -> Result<Vec<ConversationListRow>> {
        self.with_conn(|conn| query_conversation_list(conn, coach_user_id, Role::Coach))
    }

    // -- Messages --

    /// Append a message and bump the conversation's last-activity in the
    /// same transaction, so the two can never diverge.
    pub fn insert_message(
        &self,
        conversation_id: i64,
        sender_role: Role,
        sender_user_id: i64,
        content: &MessageContent,
    ) -> Result<MessageRow> {
        let created_at = Utc::now().to_rfc3339();
        let (kind, body, media_url, media_metadata) = match content {
            MessageContent::Text { body } => ("text", Some(body.as_str()), None, None),
            MessageContent::Image { media_url, media_metadata, caption } => (
                "image",
                caption.as_deref(),
                Some(media_url.as_str()),
                media_metadata.as_ref().map(|m| m.to_string()),
            ),
        };

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let id: i64 = tx.query_row(
                "INSERT INTO messages
                    (conversation_id, sender_role, sender_user_id, body, message_type, media_url, media_metadata, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 RETURNING id",
                rusqlite::params![
                    conversation_id,
                    sender_role.as_str(),
                    sender_user_id,
                    body,
                    kind,
                    media_url,
                    media_metadata.as_deref(),
                    created_at
                ],
                |row| row.get(0),
            )?;
            tx.execute(
                "UPDATE conversations SET updated_at = ?1 WHERE id = ?2",
                rusqlite::params![created_at, conversation_id],
            )?;
            tx.commit()?;

            Ok(MessageRow {
                id,
                conversation_id,
                sender_role: sender_role.as_str().to_string(),
                sender_user_id,
                body: body.map(str::to_string),
                message_type: kind.to_string(),
                media_url: media_url.map(str::to_string),
                media_metadata,
                created_at,
                read_at: None,
            })
        })
    }

    /// One page, newest first. `before` excludes that id and everything
    /// newer; one extra row is fetched to compute `has_more` without a
    /// second query. Limit is clamped to [1, 100].
    pub fn messages_page(
        &self,
        conversation_id: i64,
        limit: u32,
        before: Option<i64>,
    ) -> Result<(Vec<MessageRow>, bool)> {
        let limit = limit.clamp(1, 100) as i64;
        self.with_conn(|conn| {
            let mut rows = match before {
                Some(before) => {
                    let mut stmt = conn.prepare(
                        "SELECT id, conversation_id, sender_role, sender_user_id, body,
                                message_type, media_url, media_metadata, created_at, read_at
                         FROM messages
                         WHERE conversation_id = ?1 AND id < ?2
                         ORDER BY id DESC
                         LIMIT ?3",
                    )?;
                    stmt.query_map(
                        rusqlite::params![conversation_id, before, limit + 1],
                        map_message,
                    )?
                    .collect::<std::result::Result<Vec<_>, _>>()?
                }
                None => {
                    let mut stmt = conn.prepare(
                        "SELECT id, conversation_id, sender_role, sender_user_id, body,
                                message_type, media_url, media_metadata, created_at, read_at
                         FROM messages
                         WHERE conversation_id = ?1
                         ORDER BY id DESC
                         LIMIT ?2",
                    )?;
                    stmt.query_map(rusqlite::params![conversation_id, limit + 1], map_message)?
                        .collect::<std::result::Result<Vec<_>, _>>()?
                }
            };

            let has_more = rows.len() as i64 > limit;
            if has_more {
                rows.truncate(limit as usize);
            }
            Ok((rows, has_more))
        })
    }

    /// The single null→now read transition. Returns the original
    /// sender's user id when this call performed the transition, `None`
    /// otherwise (missing row, own message, or already read) — the
    /// latter is an expected idempotent outcome, not a fault.
    pub fn mark_message_read(
        &self,
        conversation_id: i64,
        message_id: i64,
        reader_role: Role,
    ) -> Result<Option<i64>> {
        let sender_role = reader_role.other();
        self.with_conn(|conn| {
            conn.query_row(
                "UPDATE messages SET read_at = ?1
                 WHERE id = ?2 AND conversation_id = ?3 AND sender_role = ?4 AND read_at IS NULL
                 RETURNING sender_user_id",
                rusqlite::params![
                    Utc::now().to_rfc3339(),
                    message_id,
                    conversation_id,
                    sender_role.as_str()
                ],
                |row| row.get(0),
            )
            .optional()
        })
    }
}

fn map_conversation(row: &rusqlite::Row) -> rusqlite::Result<ConversationRow> {
    Ok(ConversationRow {
        id: row.get(0)?,
        client_user_id: row.get(1)?,
        coach_user_id: row.get(2)?,
        subscription_id: row.get(3)?,
        updated_at: row.get(4)?,
    })
}

fn map_message(row: &rusqlite::Row) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        sender_role: row.get(2)?,
        sender_user_id: row.get(3)?,
        body: row.get(4)?,
        message_type: row.get(5)?,
        media_url: row.get(6)?,
        media_metadata: row.get(7)?,
        created_at: row.get(8)?,
        read_at: row.get(9)?,
    })
}

/// Listing for one seat: partner display name, last-message preview
/// (image messages collapse to a fixed placeholder, never the URL), and
/// the count of the other party's messages still unread.
fn query_conversation_list(
    conn: &Connection,
    user_id: i64,
    role: Role,
) -> Result<Vec<ConversationListRow>> {
    let (own_col, partner_col) = match role {
        Role::Client => ("client_user_id", "coach_user_id"),
        Role::Coach => ("coach_user_id", "client_user_id"),
    };
    let sql = format!(
        "SELECT
            c.id,
            c.{partner_col},
            COALESCE(u.full_name, u.email) AS partner_name,
            (SELECT CASE WHEN m.message_type = 'image' THEN '{placeholder}'
                         ELSE substr(m.body, 1, 100) END
               FROM messages m WHERE m.conversation_id = c.id
               ORDER BY m.id DESC LIMIT 1) AS last_message_preview,
            (SELECT m.created_at FROM messages m WHERE m.conversation_id = c.id
               ORDER BY m.id DESC LIMIT 1) AS last_message_at,
            (SELECT COUNT(*) FROM messages m
               WHERE m.conversation_id = c.id AND m.sender_role = '{other}' AND m.read_at IS NULL)
               AS unread_count
         FROM conversations c
         JOIN users u ON u.id = c.{partner_col}
         WHERE c.{own_col} = ?1
         ORDER BY last_message_at DESC NULLS LAST",
        placeholder = IMAGE_PREVIEW_PLACEHOLDER,
        other = role.other().as_str(),
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([user_id], |row| {
            Ok(ConversationListRow {
                id: row.get(0)?,
                partner_user_id: row.get(1)?,
                partner_name: row.get(2)?,
                last_message_preview: row.get(3)?,
                last_message_at: row.get(4)?,
                unread_count: row.get(5)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corner_types::models::MessageKind;

    fn test_db() -> (Database, i64, i64) {
        let db = Database::open_in_memory().unwrap();
        let client = db
            .create_user("cleo@example.com", Some("Cleo Client"), Role::Client)
            .unwrap();
        let coach = db
            .create_user("cora@example.com", Some("Cora Coach"), Role::Coach)
            .unwrap();
        db.create_subscription(client, coach, "active", None).unwrap();
        (db, client, coach)
    }

    fn text(body: &str) -> MessageContent {
        MessageContent::new(MessageKind::Text, Some(body.to_string()), None, None).unwrap()
    }

    #[test]
    fn upsert_is_keyed_on_the_pair() {
        let (db, client, coach) = test_db();
        let first = db.upsert_conversation(client, coach, Some(1)).unwrap();
        let second = db.upsert_conversation(client, coach, Some(1)).unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(db.conversation_ids_for_user(client).unwrap(), vec![first.id]);
    }

    #[test]
    fn upsert_conflict_touches_activity_and_keeps_subscription() {
        let (db, client, coach) = test_db();
        let first = db.upsert_conversation(client, coach, Some(1)).unwrap();
        let second = db.upsert_conversation(client, coach, None).unwrap();
        assert_eq!(second.subscription_id, Some(1));
        assert!(second.updated_at >= first.updated_at);
    }

    #[test]
    fn message_ids_increase_within_a_conversation() {
        let (db, client, coach) = test_db();
        let conv = db.upsert_conversation(client, coach, None).unwrap();

        let mut last = 0;
        for i in 0..5 {
            let row = db
                .insert_message(conv.id, Role::Client, client, &text(&format!("m{i}")))
                .unwrap();
            assert!(row.id > last);
            last = row.id;
        }
    }

    #[test]
    fn insert_bumps_conversation_activity() {
        let (db, client, coach) = test_db();
        let conv = db.upsert_conversation(client, coach, None).unwrap();
        let row = db
            .insert_message(conv.id, Role::Client, client, &text("hello"))
            .unwrap();
        let after = db.get_conversation(conv.id).unwrap().unwrap();
        assert_eq!(after.updated_at, row.created_at);
    }

    #[test]
    fn pagination_round_trip_sees_every_message_once() {
        let (db, client, coach) = test_db();
        let conv = db.upsert_conversation(client, coach, None).unwrap();
        let mut inserted = Vec::new();
        for i in 0..7 {
            inserted.push(
                db.insert_message(conv.id, Role::Client, client, &text(&format!("m{i}")))
                    .unwrap()
                    .id,
            );
        }

        let mut seen = Vec::new();
        let mut cursor = None;
        loop {
            let (page, has_more) = db.messages_page(conv.id, 3, cursor).unwrap();
            // Newest first within each page.
            for pair in page.windows(2) {
                assert!(pair[0].id > pair[1].id);
            }
            cursor = page.last().map(|m| m.id);
            seen.extend(page.into_iter().map(|m| m.id));
            if !has_more {
                break;
            }
        }

        inserted.reverse();
        assert_eq!(seen, inserted);
    }

    #[test]
    fn page_limit_is_clamped() {
        let (db, client, coach) = test_db();
        let conv = db.upsert_conversation(client, coach, None).unwrap();
        for i in 0..3 {
            db.insert_message(conv.id, Role::Client, client, &text(&format!("m{i}")))
                .unwrap();
        }
        let (page, has_more) = db.messages_page(conv.id, 0, None).unwrap();
        assert_eq!(page.len(), 1);
        assert!(has_more);
    }

    #[test]
    fn read_transition_happens_exactly_once() {
        let (db, client, coach) = test_db();
        let conv = db.upsert_conversation(client, coach, None).unwrap();
        let msg = db
            .insert_message(conv.id, Role::Coach, coach, &text("from coach"))
            .unwrap();

        let first = db.mark_message_read(conv.id, msg.id, Role::Client).unwrap();
        assert_eq!(first, Some(coach));

        let second = db.mark_message_read(conv.id, msg.id, Role::Client).unwrap();
        assert_eq!(second, None);

        let (page, _) = db.messages_page(conv.id, 50, None).unwrap();
        assert!(page[0].read_at.is_some());
    }

    #[test]
    fn own_messages_cannot_be_marked_read() {
        let (db, client, coach) = test_db();
        let conv = db.upsert_conversation(client, coach, None).unwrap();
        let msg = db
            .insert_message(conv.id, Role::Client, client, &text("mine"))
            .unwrap();

        // The sender's own role reading it: predicate requires the
        // opposite sender, so nothing transitions.
        assert_eq!(db.mark_message_read(conv.id, msg.id, Role::Client).unwrap(), None);
        let (page, _) = db.messages_page(conv.id, 50, None).unwrap();
        assert!(page[0].read_at.is_none());
    }

    #[test]
    fn listing_previews_image_as_placeholder() {
        let (db, client, coach) = test_db();
        let conv = db.upsert_conversation(client, coach, None).unwrap();
        let content = MessageContent::new(
            MessageKind::Image,
            None,
            Some("https://cdn.example/progress.jpg".into()),
            Some(serde_json::json!({"width": 800})),
        )
        .unwrap();
        db.insert_message(conv.id, Role::Coach, coach, &content).unwrap();

        let rows = db.list_conversations_for_client(client).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].last_message_preview.as_deref(), Some(IMAGE_PREVIEW_PLACEHOLDER));
        assert_eq!(rows[0].partner_name.as_deref(), Some("Cora Coach"));
        assert_eq!(rows[0].unread_count, 1);
        assert_eq!(conv.id, rows[0].id);
    }

    #[test]
    fn listing_truncates_long_previews() {
        let (db, client, coach) = test_db();
        let conv = db.upsert_conversation(client, coach, None).unwrap();
        let long = "x".repeat(250);
        db.insert_message(conv.id, Role::Coach, coach, &text(&long)).unwrap();

        let rows = db.list_conversations_for_client(client).unwrap();
        assert_eq!(rows[0].last_message_preview.as_ref().unwrap().len(), 100);
        assert_eq!(conv.id, rows[0].id);
    }

    #[test]
    fn unread_counts_only_the_other_party() {
        let (db, client, coach) = test_db();
        let conv = db.upsert_conversation(client, coach, None).unwrap();
        db.insert_message(conv.id, Role::Client, client, &text("one")).unwrap();
        db.insert_message(conv.id, Role::Client, client, &text("two")).unwrap();
        let from_coach = db
            .insert_message(conv.id, Role::Coach, coach, &text("three"))
            .unwrap();

        let client_side = db.list_conversations_for_client(client).unwrap();
        assert_eq!(client_side[0].unread_count, 1);
        let coach_side = db.list_conversations_for_coach(coach).unwrap();
        assert_eq!(coach_side[0].unread_count, 2);

        db.mark_message_read(conv.id, from_coach.id, Role::Client).unwrap();
        let client_side = db.list_conversations_for_client(client).unwrap();
        assert_eq!(client_side[0].unread_count, 0);
    }

    #[test]
    fn subscription_must_be_active_and_unexpired() {
        let db = Database::open_in_memory().unwrap();
        let client = db.create_user("c1@example.com", None, Role::Client).unwrap();
        let coach = db.create_user("k1@example.com", None, Role::Coach).unwrap();

        assert_eq!(db.find_active_subscription(client, coach).unwrap(), None);

        db.create_subscription(client, coach, "canceled", None).unwrap();
        assert_eq!(db.find_active_subscription(client, coach).unwrap(), None);

        db.create_subscription(client, coach, "active", Some("2000-01-01T00:00:00+00:00"))
            .unwrap();
        assert_eq!(db.find_active_subscription(client, coach).unwrap(), None);

        let live = db
            .create_subscription(client, coach, "active", Some("2099-01-01T00:00:00+00:00"))
            .unwrap();
        assert_eq!(db.find_active_subscription(client, coach).unwrap(), Some(live));
        assert_eq!(
            db.latest_active_subscription(client).unwrap(),
            Some((coach, live))
        );
    }

    #[test]
    fn conversation_ids_cover_both_seats() {
        let (db, client, coach) = test_db();
        let conv = db.upsert_conversation(client, coach, None).unwrap();
        assert_eq!(db.conversation_ids_for_user(client).unwrap(), vec![conv.id]);
        assert_eq!(db.conversation_ids_for_user(coach).unwrap(), vec![conv.id]);
        assert!(db.conversation_ids_for_user(999).unwrap().is_empty());
    }
}
