//! Durable-store contracts the core is written against, plus their SQLite
//! implementation on [`pairchat_db::Database`].

use std::sync::Arc;

use anyhow::{Context, anyhow};
use chrono::{DateTime, NaiveDateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use pairchat_db::Database;
use pairchat_db::models::{AcceptFriendship, FriendshipRow, InsertFriendship, MessageRow};
use pairchat_types::models::{
    Friendship, FriendshipStatus, Message, PendingRequest, RoomKey, UserSummary,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record already exists")]
    Duplicate,

    #[error("record not found")]
    NotFound,

    #[error("record is already accepted")]
    AlreadyAccepted,

    #[error("unknown user")]
    UnknownUser,

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Friendship records. Pure data access; policy lives in `FriendshipEngine`.
pub trait RelationshipStore: Send + Sync + 'static {
    /// Create a `pending` row. Fails with `Duplicate` if any row exists for
    /// the unordered pair.
    fn insert(&self, requester_id: Uuid, recipient_id: Uuid) -> Result<Friendship, StoreError>;

    fn get(&self, id: i64) -> Result<Option<Friendship>, StoreError>;

    /// Move a `pending` row to `accepted`.
    fn set_accepted(&self, id: i64) -> Result<Friendship, StoreError>;

    fn find_by_users(&self, a: Uuid, b: Uuid) -> Result<Option<Friendship>, StoreError>;

    /// The other party of every accepted row involving `user_id`.
    fn list_accepted(&self, user_id: Uuid) -> Result<Vec<UserSummary>, StoreError>;

    /// Pending rows addressed to `user_id`, oldest first.
    fn list_pending_for_recipient(&self, user_id: Uuid) -> Result<Vec<PendingRequest>, StoreError>;
}

/// Append-only message log.
pub trait MessageStore: Send + Sync + 'static {
    /// Store a message, assigning its id and server timestamp.
    fn append(&self, sender_id: Uuid, receiver_id: Uuid, content: &str) -> Result<Message, StoreError>;

    /// Every message between `a` and `b`, ascending by timestamp then id.
    fn history(&self, a: Uuid, b: Uuid) -> Result<Vec<Message>, StoreError>;
}

/// Run a blocking store call off the async runtime.
pub(crate) async fn blocking<S, T, F>(store: &Arc<S>, f: F) -> Result<T, StoreError>
where
    S: Send + Sync + 'static,
    T: Send + 'static,
    F: FnOnce(&S) -> Result<T, StoreError> + Send + 'static,
{
    let store = Arc::clone(store);
    tokio::task::spawn_blocking(move || f(&store))
        .await
        .map_err(|e| StoreError::Backend(anyhow!("spawn_blocking join error: {}", e)))?
}

// -- SQLite --

fn pair_key(a: Uuid, b: Uuid) -> Result<RoomKey, StoreError> {
    RoomKey::for_pair(a, b).ok_or_else(|| anyhow!("pair of identical users {}", a).into())
}

fn parse_uuid(raw: &str) -> anyhow::Result<Uuid> {
    Uuid::parse_str(raw).with_context(|| format!("corrupt user id '{}'", raw))
}

fn parse_timestamp(raw: &str) -> anyhow::Result<DateTime<Utc>> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            // SQLite's datetime('now') has no timezone; it is UTC.
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .with_context(|| format!("corrupt timestamp '{}'", raw))
}

fn friendship_from_row(row: FriendshipRow) -> anyhow::Result<Friendship> {
    Ok(Friendship {
        id: row.id,
        requester_id: parse_uuid(&row.requester_id)?,
        recipient_id: parse_uuid(&row.recipient_id)?,
        status: FriendshipStatus::parse(&row.status)
            .ok_or_else(|| anyhow!("corrupt status '{}' on friendship {}", row.status, row.id))?,
        created_at: parse_timestamp(&row.created_at)?,
    })
}

fn message_from_row(row: MessageRow) -> anyhow::Result<Message> {
    Ok(Message {
        id: row.id,
        sender_id: parse_uuid(&row.sender_id)?,
        receiver_id: parse_uuid(&row.receiver_id)?,
        content: row.content,
        created_at: parse_timestamp(&row.created_at)?,
    })
}

impl RelationshipStore for Database {
    fn insert(&self, requester_id: Uuid, recipient_id: Uuid) -> Result<Friendship, StoreError> {
        let key = pair_key(requester_id, recipient_id)?;
        match self.insert_friendship(
            &requester_id.to_string(),
            &recipient_id.to_string(),
            key.as_str(),
        )? {
            InsertFriendship::Inserted(row) => Ok(friendship_from_row(row)?),
            InsertFriendship::Duplicate => Err(StoreError::Duplicate),
            InsertFriendship::UnknownUser => Err(StoreError::UnknownUser),
        }
    }

    fn get(&self, id: i64) -> Result<Option<Friendship>, StoreError> {
        Ok(self.get_friendship(id)?.map(friendship_from_row).transpose()?)
    }

    fn set_accepted(&self, id: i64) -> Result<Friendship, StoreError> {
        match self.accept_friendship(id)? {
            AcceptFriendship::Accepted(row) => Ok(friendship_from_row(row)?),
            AcceptFriendship::AlreadyAccepted(_) => Err(StoreError::AlreadyAccepted),
            AcceptFriendship::NotFound => Err(StoreError::NotFound),
        }
    }

    fn find_by_users(&self, a: Uuid, b: Uuid) -> Result<Option<Friendship>, StoreError> {
        let Some(key) = RoomKey::for_pair(a, b) else {
            return Ok(None);
        };
        Ok(self
            .get_friendship_by_pair(key.as_str())?
            .map(friendship_from_row)
            .transpose()?)
    }

    fn list_accepted(&self, user_id: Uuid) -> Result<Vec<UserSummary>, StoreError> {
        let rows = self.list_friends(&user_id.to_string())?;
        let friends = rows
            .into_iter()
            .map(|row| {
                Ok(UserSummary {
                    id: parse_uuid(&row.user_id)?,
                    username: row.username,
                })
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(friends)
    }

    fn list_pending_for_recipient(&self, user_id: Uuid) -> Result<Vec<PendingRequest>, StoreError> {
        let rows = pairchat_db::Database::list_pending_for_recipient(self, &user_id.to_string())?;
        let pending = rows
            .into_iter()
            .map(|row| {
                Ok(PendingRequest {
                    friendship_id: row.friendship_id,
                    requester: UserSummary {
                        id: parse_uuid(&row.requester_id)?,
                        username: row.requester_username,
                    },
                    created_at: parse_timestamp(&row.created_at)?,
                })
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(pending)
    }
}

impl MessageStore for Database {
    fn append(&self, sender_id: Uuid, receiver_id: Uuid, content: &str) -> Result<Message, StoreError> {
        let key = pair_key(sender_id, receiver_id)?;
        let row = self.append_message(
            key.as_str(),
            &sender_id.to_string(),
            &receiver_id.to_string(),
            content,
        )?;
        Ok(message_from_row(row)?)
    }

    fn history(&self, a: Uuid, b: Uuid) -> Result<Vec<Message>, StoreError> {
        let key = pair_key(a, b)?;
        let messages = self
            .get_conversation(key.as_str())?
            .into_iter()
            .map(message_from_row)
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(messages)
    }
}
