use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::anyhow;
use tracing::{debug, error, info};
use uuid::Uuid;

use pairchat_types::events::GatewayEvent;
use pairchat_types::models::{Message, RoomKey};

use crate::error::ChatError;
use crate::friendship::FriendshipEngine;
use crate::router::{ConnectionId, RoomRouter, room_key_for};
use crate::store::{MessageStore, RelationshipStore, blocking};

/// Upper bound on a message body, in bytes.
pub const MAX_CONTENT_BYTES: usize = 4096;

/// Glues the message log to live rooms.
///
/// Sending is persist-then-broadcast; opening a conversation is
/// join-then-backfill. Together they guarantee that a connection which has
/// opened a conversation sees every message of it at least once, either in
/// its backfill or live.
pub struct DeliveryCoordinator<S> {
    inner: Arc<CoordinatorInner<S>>,
}

struct CoordinatorInner<S> {
    store: Arc<S>,
    friendships: FriendshipEngine<S>,
    router: RoomRouter,
    /// Per-room send turn. Held across persist + broadcast so that
    /// broadcast order matches commit order within a room.
    sequencers: Mutex<HashMap<RoomKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl<S> Clone for DeliveryCoordinator<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// History of one conversation as read right after joining its room.
/// Finite and consumed once; later messages arrive by broadcast.
///
/// The rows are read in one query before this is returned, so iterating
/// never touches the store. The store serializes on a single connection,
/// and a streamed read would hold it for as long as the caller iterates.
#[derive(Debug)]
pub struct Backfill {
    room: RoomKey,
    peer_id: Uuid,
    messages: std::vec::IntoIter<Message>,
}

impl Backfill {
    pub fn room(&self) -> &RoomKey {
        &self.room
    }

    pub fn peer_id(&self) -> Uuid {
        self.peer_id
    }
}

impl Iterator for Backfill {
    type Item = Message;

    fn next(&mut self) -> Option<Message> {
        self.messages.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.messages.size_hint()
    }
}

impl ExactSizeIterator for Backfill {}

fn validate_content(content: &str) -> Result<(), ChatError> {
    if content.trim().is_empty() {
        return Err(ChatError::EmptyContent);
    }
    if content.len() > MAX_CONTENT_BYTES {
        return Err(ChatError::ContentTooLong);
    }
    Ok(())
}

impl<S> DeliveryCoordinator<S>
where
    S: RelationshipStore + MessageStore,
{
    pub fn new(store: Arc<S>, router: RoomRouter) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                friendships: FriendshipEngine::new(Arc::clone(&store)),
                store,
                router,
                sequencers: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn friendships(&self) -> &FriendshipEngine<S> {
        &self.inner.friendships
    }

    pub fn router(&self) -> &RoomRouter {
        &self.inner.router
    }

    /// Subscribe `conn_id` to the conversation between `user_id` and
    /// `peer_id`, then read its history.
    ///
    /// The join happens before the read starts, so a message committed
    /// while the read is in flight is either in the backfill or delivered
    /// live (possibly both; ids are unique for de-duplication).
    pub async fn open_conversation(
        &self,
        user_id: Uuid,
        peer_id: Uuid,
        conn_id: ConnectionId,
    ) -> Result<Backfill, ChatError> {
        let room = room_key_for(user_id, peer_id)?;
        self.inner.friendships.require_friends(user_id, peer_id).await?;

        self.inner.router.join(conn_id, &room)?;

        match blocking(&self.inner.store, move |s| s.history(user_id, peer_id)).await {
            Ok(messages) => {
                debug!(
                    "connection {} opened {} with {} messages of history",
                    conn_id,
                    room,
                    messages.len()
                );
                Ok(Backfill {
                    room,
                    peer_id,
                    messages: messages.into_iter(),
                })
            }
            Err(e) => {
                // Back to Closed; a half-open view would hide the missing history.
                self.inner.router.leave(conn_id, &room);
                error!("history read for {} failed: {}", room, e);
                Err(ChatError::LookupFailed(e.into()))
            }
        }
    }

    /// Stop live delivery of `room` to `conn_id`. Stored data is untouched.
    pub fn close_conversation(&self, conn_id: ConnectionId, room: &RoomKey) -> bool {
        self.inner.router.leave(conn_id, room)
    }

    /// Stored history between two friends, without joining the room.
    pub async fn conversation_history(&self, user_id: Uuid, peer_id: Uuid) -> Result<Vec<Message>, ChatError> {
        room_key_for(user_id, peer_id)?;
        self.inner.friendships.require_friends(user_id, peer_id).await?;

        blocking(&self.inner.store, move |s| s.history(user_id, peer_id))
            .await
            .map_err(|e| {
                error!("history read between {} and {} failed: {}", user_id, peer_id, e);
                ChatError::LookupFailed(e.into())
            })
    }

    /// Persist a message from `sender_id` to `receiver_id`, then broadcast
    /// the stored record to their room.
    ///
    /// Once validation passes, the persist and broadcast run on their own
    /// task: dropping the returned future does not cancel them. If the
    /// persist fails nothing is broadcast.
    pub async fn send_message(
        &self,
        sender_id: Uuid,
        receiver_id: Uuid,
        content: String,
    ) -> Result<Message, ChatError> {
        let room = room_key_for(sender_id, receiver_id)?;
        self.inner.friendships.require_friends(sender_id, receiver_id).await?;
        validate_content(&content)?;

        let this = self.clone();
        tokio::spawn(async move { this.persist_and_broadcast(room, sender_id, receiver_id, content).await })
            .await
            .map_err(|e| ChatError::PersistenceFailed(anyhow!("send task failed: {}", e)))?
    }

    async fn persist_and_broadcast(
        &self,
        room: RoomKey,
        sender_id: Uuid,
        receiver_id: Uuid,
        content: String,
    ) -> Result<Message, ChatError> {
        let sequencer = self.sequencer(&room);
        let turn = sequencer.lock().await;

        let stored = blocking(&self.inner.store, move |s| s.append(sender_id, receiver_id, &content)).await;

        let result = match stored {
            Ok(message) => {
                let delivered = self.inner.router.broadcast(
                    &room,
                    GatewayEvent::MessageCreate {
                        room: room.clone(),
                        message: message.clone(),
                    },
                );
                info!(
                    "message {} stored in {}, delivered to {} connections",
                    message.id, room, delivered
                );
                Ok(message)
            }
            Err(e) => {
                error!("failed to persist message in {}: {}", room, e);
                Err(ChatError::PersistenceFailed(e.into()))
            }
        };

        drop(turn);
        drop(sequencer);
        self.release_sequencer(&room);
        result
    }

    fn sequencer(&self, room: &RoomKey) -> Arc<tokio::sync::Mutex<()>> {
        let mut sequencers = self
            .inner
            .sequencers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        sequencers.entry(room.clone()).or_default().clone()
    }

    // Drop the room's sequencer once nobody else holds or awaits it.
    fn release_sequencer(&self, room: &RoomKey) {
        let mut sequencers = self
            .inner
            .sequencers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if sequencers
            .get(room)
            .is_some_and(|seq| Arc::strong_count(seq) == 1)
        {
            sequencers.remove(room);
        }
    }
}
