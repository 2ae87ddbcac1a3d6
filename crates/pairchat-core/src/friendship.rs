use std::sync::Arc;

use tracing::{error, info};
use uuid::Uuid;

use pairchat_types::models::{Friendship, PendingRequest, UserSummary};

use crate::error::ChatError;
use crate::store::{RelationshipStore, StoreError, blocking};

/// Request/accept state machine over a [`RelationshipStore`].
///
/// `pending -> accepted` is the only transition; rows are never deleted.
pub struct FriendshipEngine<R> {
    store: Arc<R>,
}

impl<R> Clone for FriendshipEngine<R> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

fn lookup_failed(e: StoreError) -> ChatError {
    error!("relationship lookup failed: {}", e);
    ChatError::LookupFailed(e.into())
}

fn persistence_failed(e: StoreError) -> ChatError {
    error!("relationship write failed: {}", e);
    ChatError::PersistenceFailed(e.into())
}

impl<R: RelationshipStore> FriendshipEngine<R> {
    pub fn new(store: Arc<R>) -> Self {
        Self { store }
    }

    /// Create a pending request from `requester_id` to `recipient_id`.
    /// A second request for the same pair, in either direction, is rejected.
    pub async fn request(&self, requester_id: Uuid, recipient_id: Uuid) -> Result<Friendship, ChatError> {
        if requester_id == recipient_id {
            return Err(ChatError::InvalidPair);
        }

        let friendship = blocking(&self.store, move |s| s.insert(requester_id, recipient_id))
            .await
            .map_err(|e| match e {
                StoreError::Duplicate => ChatError::DuplicateRequest,
                StoreError::UnknownUser => ChatError::UnknownUser,
                other => persistence_failed(other),
            })?;

        info!(
            "friend request {} created: {} -> {}",
            friendship.id, requester_id, recipient_id
        );
        Ok(friendship)
    }

    /// Accept request `friendship_id` on behalf of `acting_user_id`, who must
    /// be its recipient.
    pub async fn accept(&self, friendship_id: i64, acting_user_id: Uuid) -> Result<Friendship, ChatError> {
        let current = blocking(&self.store, move |s| s.get(friendship_id))
            .await
            .map_err(lookup_failed)?
            .ok_or(ChatError::NotFound)?;

        if current.recipient_id != acting_user_id {
            return Err(ChatError::NotAuthorized);
        }
        if current.is_accepted() {
            return Err(ChatError::AlreadyAccepted);
        }

        let accepted = blocking(&self.store, move |s| s.set_accepted(friendship_id))
            .await
            .map_err(|e| match e {
                // Lost a race with a concurrent accept.
                StoreError::AlreadyAccepted => ChatError::AlreadyAccepted,
                StoreError::NotFound => ChatError::NotFound,
                other => persistence_failed(other),
            })?;

        info!(
            "friend request {} accepted by {}",
            friendship_id, acting_user_id
        );
        Ok(accepted)
    }

    /// Everyone who shares an accepted friendship with `user_id`.
    pub async fn list_friends(&self, user_id: Uuid) -> Result<Vec<UserSummary>, ChatError> {
        blocking(&self.store, move |s| s.list_accepted(user_id))
            .await
            .map_err(lookup_failed)
    }

    /// Requests waiting on `user_id`'s answer, oldest first.
    pub async fn list_pending_requests(&self, user_id: Uuid) -> Result<Vec<PendingRequest>, ChatError> {
        blocking(&self.store, move |s| s.list_pending_for_recipient(user_id))
            .await
            .map_err(lookup_failed)
    }

    /// Only an accepted friendship counts; a pending request does not.
    pub async fn are_friends(&self, a: Uuid, b: Uuid) -> Result<bool, ChatError> {
        if a == b {
            return Err(ChatError::InvalidPair);
        }
        let found = blocking(&self.store, move |s| s.find_by_users(a, b))
            .await
            .map_err(lookup_failed)?;
        Ok(found.is_some_and(|f| f.is_accepted()))
    }

    pub async fn require_friends(&self, a: Uuid, b: Uuid) -> Result<(), ChatError> {
        if self.are_friends(a, b).await? {
            Ok(())
        } else {
            Err(ChatError::NotFriends)
        }
    }
}
