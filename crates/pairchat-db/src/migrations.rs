use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id          TEXT PRIMARY KEY,
            username    TEXT NOT NULL UNIQUE,
            password    TEXT NOT NULL,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- pair_key is the canonical room key of the two users, so the
        -- UNIQUE constraint allows one row per unordered pair.
        CREATE TABLE IF NOT EXISTS friendships (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            requester_id    TEXT NOT NULL REFERENCES users(id),
            recipient_id    TEXT NOT NULL REFERENCES users(id),
            pair_key        TEXT NOT NULL UNIQUE,
            status          TEXT NOT NULL DEFAULT 'pending'
                                CHECK (status IN ('pending', 'accepted')),
            created_at      TEXT NOT NULL,
            CHECK (requester_id <> recipient_id)
        );

        CREATE INDEX IF NOT EXISTS idx_friendships_recipient
            ON friendships(recipient_id, status);

        CREATE INDEX IF NOT EXISTS idx_friendships_requester
            ON friendships(requester_id, status);

        CREATE TABLE IF NOT EXISTS messages (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            pair_key        TEXT NOT NULL,
            sender_id       TEXT NOT NULL REFERENCES users(id),
            receiver_id     TEXT NOT NULL REFERENCES users(id),
            content         TEXT NOT NULL,
            created_at      TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_pair
            ON messages(pair_key, created_at, id);

        CREATE INDEX IF NOT EXISTS idx_messages_created
            ON messages(created_at);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
