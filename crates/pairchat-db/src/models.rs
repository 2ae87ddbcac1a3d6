/// Database row types — these map directly to SQLite rows.
/// Distinct from pairchat-types models to keep the DB layer independent.

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub password: String,
    pub created_at: String,
}

pub struct FriendshipRow {
    pub id: i64,
    pub requester_id: String,
    pub recipient_id: String,
    pub status: String,
    pub created_at: String,
}

/// The other party of an accepted friendship.
pub struct FriendRow {
    pub user_id: String,
    pub username: String,
}

pub struct PendingRow {
    pub friendship_id: i64,
    pub requester_id: String,
    pub requester_username: String,
    pub created_at: String,
}

pub struct MessageRow {
    pub id: i64,
    pub sender_id: String,
    pub receiver_id: String,
    pub content: String,
    pub created_at: String,
}

pub enum CreateUser {
    Created,
    /// The username is already registered.
    Duplicate,
}

pub enum InsertFriendship {
    Inserted(FriendshipRow),
    /// A row already exists for this pair, in either direction and status.
    Duplicate,
    /// One of the two user ids has no account.
    UnknownUser,
}

pub enum AcceptFriendship {
    Accepted(FriendshipRow),
    AlreadyAccepted(FriendshipRow),
    NotFound,
}
