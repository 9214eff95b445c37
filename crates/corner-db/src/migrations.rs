use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        -- users and subscriptions are owned by the identity and ledger
        -- surfaces; the messenger only reads them.
        CREATE TABLE IF NOT EXISTS users (
            id          INTEGER PRIMARY KEY,
            email       TEXT NOT NULL UNIQUE,
            full_name   TEXT,
            role        TEXT NOT NULL CHECK (role IN ('client', 'coach')),
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS subscriptions (
            id              INTEGER PRIMARY KEY,
            client_user_id  INTEGER NOT NULL REFERENCES users(id),
            coach_user_id   INTEGER NOT NULL REFERENCES users(id),
            status          TEXT NOT NULL,
            ends_at         TEXT,
            purchased_at    TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_subscriptions_pair
            ON subscriptions(client_user_id, coach_user_id);

        CREATE TABLE IF NOT EXISTS conversations (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            client_user_id  INTEGER NOT NULL REFERENCES users(id),
            coach_user_id   INTEGER NOT NULL REFERENCES users(id),
            subscription_id INTEGER REFERENCES subscriptions(id),
            updated_at      TEXT NOT NULL,
            UNIQUE(client_user_id, coach_user_id)
        );

        CREATE INDEX IF NOT EXISTS idx_conversations_client
            ON conversations(client_user_id);
        CREATE INDEX IF NOT EXISTS idx_conversations_coach
            ON conversations(coach_user_id);

        CREATE TABLE IF NOT EXISTS messages (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            conversation_id INTEGER NOT NULL REFERENCES conversations(id),
            sender_role     TEXT NOT NULL CHECK (sender_role IN ('client', 'coach')),
            sender_user_id  INTEGER NOT NULL REFERENCES users(id),
            body            TEXT,
            message_type    TEXT NOT NULL DEFAULT 'text' CHECK (message_type IN ('text', 'image')),
            media_url       TEXT,
            media_metadata  TEXT,
            created_at      TEXT NOT NULL,
            read_at         TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages(conversation_id, id);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
