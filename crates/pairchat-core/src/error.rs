use thiserror::Error;

use crate::coordinator::MAX_CONTENT_BYTES;

/// Every way a core operation can be rejected. None of these are retried
/// internally.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("a user cannot pair with themselves")]
    InvalidPair,

    #[error("a friendship already exists between these users")]
    DuplicateRequest,

    #[error("friendship not found")]
    NotFound,

    #[error("user is not permitted to do this")]
    NotAuthorized,

    #[error("friendship is already accepted")]
    AlreadyAccepted,

    #[error("users are not friends")]
    NotFriends,

    #[error("message content is empty")]
    EmptyContent,

    #[error("message content exceeds {} bytes", MAX_CONTENT_BYTES)]
    ContentTooLong,

    #[error("unknown user")]
    UnknownUser,

    #[error("connection is closed")]
    ConnectionClosed,

    #[error("failed to persist: {0}")]
    PersistenceFailed(#[source] anyhow::Error),

    #[error("lookup failed: {0}")]
    LookupFailed(#[source] anyhow::Error),
}

impl ChatError {
    /// Stable machine-readable name, used on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            ChatError::InvalidPair => "InvalidPair",
            ChatError::DuplicateRequest => "DuplicateRequest",
            ChatError::NotFound => "NotFound",
            ChatError::NotAuthorized => "NotAuthorized",
            ChatError::AlreadyAccepted => "AlreadyAccepted",
            ChatError::NotFriends => "NotFriends",
            ChatError::EmptyContent => "EmptyContent",
            ChatError::ContentTooLong => "ContentTooLong",
            ChatError::UnknownUser => "UnknownUser",
            ChatError::ConnectionClosed => "ConnectionClosed",
            ChatError::PersistenceFailed(_) => "PersistenceFailed",
            ChatError::LookupFailed(_) => "LookupFailed",
        }
    }
}
