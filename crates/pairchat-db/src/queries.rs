use crate::models::{
    AcceptFriendship, CreateUser, FriendRow, FriendshipRow, InsertFriendship, MessageRow, PendingRow, UserRow,
};
use crate::{Database, now_timestamp};
use anyhow::Result;
use rusqlite::{Connection, Row};

const FRIENDSHIP_COLUMNS: &str = "id, requester_id, recipient_id, status, created_at";

impl Database {
    // -- Users --

    /// Insert a user unless `username` is taken. The uniqueness check is the
    /// insert itself, so concurrent registrations cannot both succeed.
    pub fn create_user(&self, id: &str, username: &str, password_hash: &str) -> Result<CreateUser> {
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT INTO users (id, username, password) VALUES (?1, ?2, ?3)
                 ON CONFLICT(username) DO NOTHING",
                (id, username, password_hash),
            )?;
            Ok(if inserted == 0 {
                CreateUser::Duplicate
            } else {
                CreateUser::Created
            })
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "username", username))
    }

    // -- Friendships --

    /// Insert a pending friendship unless one already exists for `pair_key`.
    pub fn insert_friendship(
        &self,
        requester_id: &str,
        recipient_id: &str,
        pair_key: &str,
    ) -> Result<InsertFriendship> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            if query_friendship(&tx, "pair_key", pair_key)?.is_some() {
                return Ok(InsertFriendship::Duplicate);
            }

            let known: i64 = tx.query_row(
                "SELECT COUNT(*) FROM users WHERE id IN (?1, ?2)",
                (requester_id, recipient_id),
                |row| row.get(0),
            )?;
            if known != 2 {
                return Ok(InsertFriendship::UnknownUser);
            }

            let created_at = now_timestamp();
            tx.execute(
                "INSERT INTO friendships (requester_id, recipient_id, pair_key, status, created_at)
                 VALUES (?1, ?2, ?3, 'pending', ?4)",
                (requester_id, recipient_id, pair_key, &created_at),
            )?;
            let id = tx.last_insert_rowid();
            tx.commit()?;

            Ok(InsertFriendship::Inserted(FriendshipRow {
                id,
                requester_id: requester_id.to_string(),
                recipient_id: recipient_id.to_string(),
                status: "pending".to_string(),
                created_at,
            }))
        })
    }

    pub fn get_friendship(&self, id: i64) -> Result<Option<FriendshipRow>> {
        self.with_conn(|conn| query_friendship(conn, "id", id))
    }

    pub fn get_friendship_by_pair(&self, pair_key: &str) -> Result<Option<FriendshipRow>> {
        self.with_conn(|conn| query_friendship(conn, "pair_key", pair_key))
    }

    /// Flip a pending friendship to accepted. Only a `pending` row is updated,
    /// so two racing accepts cannot both report success.
    pub fn accept_friendship(&self, id: i64) -> Result<AcceptFriendship> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let changed = tx.execute(
                "UPDATE friendships SET status = 'accepted' WHERE id = ?1 AND status = 'pending'",
                [id],
            )?;

            let outcome = match query_friendship(&tx, "id", id)? {
                None => AcceptFriendship::NotFound,
                Some(row) if changed == 1 => AcceptFriendship::Accepted(row),
                Some(row) => AcceptFriendship::AlreadyAccepted(row),
            };

            tx.commit()?;
            Ok(outcome)
        })
    }

    pub fn list_friends(&self, user_id: &str) -> Result<Vec<FriendRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT u.id, u.username
                 FROM friendships f
                 JOIN users u ON u.id = CASE WHEN f.requester_id = ?1
                                             THEN f.recipient_id
                                             ELSE f.requester_id END
                 WHERE (f.requester_id = ?1 OR f.recipient_id = ?1)
                   AND f.status = 'accepted'
                 ORDER BY f.id ASC",
            )?;

            let rows = stmt
                .query_map([user_id], |row| {
                    Ok(FriendRow {
                        user_id: row.get(0)?,
                        username: row.get(1)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    /// Pending requests addressed to `user_id`, oldest first.
    pub fn list_pending_for_recipient(&self, user_id: &str) -> Result<Vec<PendingRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT f.id, u.id, u.username, f.created_at
                 FROM friendships f
                 JOIN users u ON u.id = f.requester_id
                 WHERE f.recipient_id = ?1 AND f.status = 'pending'
                 ORDER BY f.created_at ASC, f.id ASC",
            )?;

            let rows = stmt
                .query_map([user_id], |row| {
                    Ok(PendingRow {
                        friendship_id: row.get(0)?,
                        requester_id: row.get(1)?,
                        requester_username: row.get(2)?,
                        created_at: row.get(3)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    // -- Messages --

    /// Append a message and return the stored row. The timestamp is assigned
    /// here and clamped to the latest stored one, so `created_at` never
    /// decreases in insertion (id) order even if the wall clock steps back.
    pub fn append_message(
        &self,
        pair_key: &str,
        sender_id: &str,
        receiver_id: &str,
        content: &str,
    ) -> Result<MessageRow> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let latest: Option<String> =
                tx.query_row("SELECT MAX(created_at) FROM messages", [], |row| row.get(0))?;
            let now = now_timestamp();
            let created_at = match latest {
                Some(latest) if latest > now => latest,
                _ => now,
            };

            tx.execute(
                "INSERT INTO messages (pair_key, sender_id, receiver_id, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                (pair_key, sender_id, receiver_id, content, &created_at),
            )?;
            let id = tx.last_insert_rowid();
            tx.commit()?;

            Ok(MessageRow {
                id,
                sender_id: sender_id.to_string(),
                receiver_id: receiver_id.to_string(),
                content: content.to_string(),
                created_at,
            })
        })
    }

    /// Full history of one conversation, oldest first, id as tiebreak.
    pub fn get_conversation(&self, pair_key: &str) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, sender_id, receiver_id, content, created_at
                 FROM messages
                 WHERE pair_key = ?1
                 ORDER BY created_at ASC, id ASC",
            )?;

            let rows = stmt
                .query_map([pair_key], |row| {
                    Ok(MessageRow {
                        id: row.get(0)?,
                        sender_id: row.get(1)?,
                        receiver_id: row.get(2)?,
                        content: row.get(3)?,
                        created_at: row.get(4)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }
}

// `column` is always one of the literals above, never user input.
fn query_user<P: rusqlite::ToSql>(conn: &Connection, column: &str, value: P) -> Result<Option<UserRow>> {
    let sql = format!("SELECT id, username, password, created_at FROM users WHERE {} = ?1", column);
    let mut stmt = conn.prepare(&sql)?;

    let row = stmt
        .query_row([value], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                username: row.get(1)?,
                password: row.get(2)?,
                created_at: row.get(3)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn query_friendship<P: rusqlite::ToSql>(
    conn: &Connection,
    column: &str,
    value: P,
) -> Result<Option<FriendshipRow>> {
    let sql = format!("SELECT {} FROM friendships WHERE {} = ?1", FRIENDSHIP_COLUMNS, column);
    let mut stmt = conn.prepare(&sql)?;

    let row = stmt.query_row([value], friendship_from_row).optional()?;
    Ok(row)
}

fn friendship_from_row(row: &Row<'_>) -> rusqlite::Result<FriendshipRow> {
    Ok(FriendshipRow {
        id: row.get(0)?,
        requester_id: row.get(1)?,
        recipient_id: row.get(2)?,
        status: row.get(3)?,
        created_at: row.get(4)?,
    })
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
