use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Public identity of a registered user. The credential never leaves the
/// identity layer, so this is all other components get to see.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: Uuid,
    pub username: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FriendshipStatus {
    Pending,
    Accepted,
}

impl FriendshipStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(FriendshipStatus::Pending),
            "accepted" => Some(FriendshipStatus::Accepted),
            _ => None,
        }
    }
}

/// A relationship between an ordered (requester, recipient) pair.
/// At most one exists per unordered pair of users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Friendship {
    pub id: i64,
    pub requester_id: Uuid,
    pub recipient_id: Uuid,
    pub status: FriendshipStatus,
    pub created_at: DateTime<Utc>,
}

impl Friendship {
    pub fn is_accepted(&self) -> bool {
        self.status == FriendshipStatus::Accepted
    }
}

/// A pending request as seen by its recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRequest {
    pub friendship_id: i64,
    pub requester: UserSummary,
    pub created_at: DateTime<Utc>,
}

/// A stored direct message. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

const ROOM_PREFIX: &str = "dm:";
const ROOM_SEPARATOR: char = ':';

/// Canonical address of a two-party conversation.
///
/// Both ids are rendered as fixed-width hyphenated UUIDs, lower id first,
/// so the key depends only on the unordered pair and no two pairs can
/// produce the same key (`:` never appears inside a UUID).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomKey(String);

impl RoomKey {
    /// Returns `None` when both ids are the same user.
    pub fn for_pair(a: Uuid, b: Uuid) -> Option<Self> {
        if a == b {
            return None;
        }
        let (lo, hi) = if a < b { (a, b) } else { (b, a) };
        Some(Self(format!(
            "{}{}{}{}",
            ROOM_PREFIX,
            lo.hyphenated(),
            ROOM_SEPARATOR,
            hi.hyphenated()
        )))
    }

    /// Whether `user_id` is one of the two participants.
    pub fn contains(&self, user_id: Uuid) -> bool {
        let id = user_id.hyphenated().to_string();
        self.0[ROOM_PREFIX.len()..]
            .split(ROOM_SEPARATOR)
            .any(|member| member == id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidRoomKey(pub String);

impl fmt::Display for InvalidRoomKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid room key '{}'", self.0)
    }
}

impl std::error::Error for InvalidRoomKey {}

impl TryFrom<String> for RoomKey {
    type Error = InvalidRoomKey;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let parsed = value
            .strip_prefix(ROOM_PREFIX)
            .and_then(|rest| rest.split_once(ROOM_SEPARATOR))
            .and_then(|(a, b)| Some((Uuid::parse_str(a).ok()?, Uuid::parse_str(b).ok()?)))
            .and_then(|(a, b)| RoomKey::for_pair(a, b));

        // Reject anything that is not already in canonical form.
        match parsed {
            Some(key) if key.0 == value => Ok(key),
            _ => Err(InvalidRoomKey(value)),
        }
    }
}

impl From<RoomKey> for String {
    fn from(key: RoomKey) -> Self {
        key.0
    }
}
