use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use tokio::sync::mpsc;
use tracing::{debug, trace};
use uuid::Uuid;

use pairchat_types::events::GatewayEvent;
use pairchat_types::models::RoomKey;

use crate::error::ChatError;

/// Identifies one live connection, independent of which user owns it.
pub type ConnectionId = Uuid;

/// Canonical room of a two-party conversation. Both participants get the
/// same key whichever of them calls this.
pub fn room_key_for(a: Uuid, b: Uuid) -> Result<RoomKey, ChatError> {
    RoomKey::for_pair(a, b).ok_or(ChatError::InvalidPair)
}

/// Live room subscriptions and fan-out.
///
/// A connection stays subscribed to every room it has joined until it
/// leaves that room or disconnects. Switching conversations does not leave
/// the previous one, so a conversation opened earlier keeps receiving
/// messages in the background.
#[derive(Clone, Default)]
pub struct RoomRouter {
    inner: Arc<RouterInner>,
}

#[derive(Default)]
struct RouterInner {
    /// connection -> its outbound queue and the rooms it has joined.
    /// Held for the whole of every join/leave, which serializes
    /// membership changes.
    connections: Mutex<HashMap<ConnectionId, Membership>>,

    /// room -> subscribers. The map lock is only held to look a room up;
    /// fan-out runs under the room's own lock.
    rooms: RwLock<HashMap<RoomKey, Arc<Mutex<Room>>>>,
}

struct Membership {
    tx: mpsc::UnboundedSender<GatewayEvent>,
    rooms: HashSet<RoomKey>,
}

#[derive(Default)]
struct Room {
    subscribers: HashMap<ConnectionId, mpsc::UnboundedSender<GatewayEvent>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl RoomRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection. Returns its id and the receiver that
    /// yields every event routed to it.
    pub fn connect(&self) -> (ConnectionId, mpsc::UnboundedReceiver<GatewayEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.inner.connections).insert(
            conn_id,
            Membership {
                tx,
                rooms: HashSet::new(),
            },
        );
        debug!("connection {} registered", conn_id);
        (conn_id, rx)
    }

    /// Subscribe `conn_id` to `room`. Returns `false` if it was already
    /// subscribed; joining twice never duplicates delivery.
    pub fn join(&self, conn_id: ConnectionId, room: &RoomKey) -> Result<bool, ChatError> {
        let mut connections = lock(&self.inner.connections);
        let membership = connections
            .get_mut(&conn_id)
            .ok_or(ChatError::ConnectionClosed)?;

        if !membership.rooms.insert(room.clone()) {
            return Ok(false);
        }

        let entry = {
            let mut rooms = self.inner.rooms.write().unwrap_or_else(PoisonError::into_inner);
            rooms.entry(room.clone()).or_default().clone()
        };
        lock(&entry).subscribers.insert(conn_id, membership.tx.clone());

        debug!("connection {} joined {}", conn_id, room);
        Ok(true)
    }

    /// Unsubscribe `conn_id` from `room`. Returns `false` if it was not subscribed.
    pub fn leave(&self, conn_id: ConnectionId, room: &RoomKey) -> bool {
        let mut connections = lock(&self.inner.connections);
        let Some(membership) = connections.get_mut(&conn_id) else {
            return false;
        };
        if !membership.rooms.remove(room) {
            return false;
        }

        self.remove_subscriber(conn_id, room);
        debug!("connection {} left {}", conn_id, room);
        true
    }

    /// Unsubscribe `conn_id` from every room. The connection stays
    /// registered and may join again.
    pub fn leave_all(&self, conn_id: ConnectionId) -> Vec<RoomKey> {
        let mut connections = lock(&self.inner.connections);
        let Some(membership) = connections.get_mut(&conn_id) else {
            return Vec::new();
        };

        let left: Vec<RoomKey> = membership.rooms.drain().collect();
        for room in &left {
            self.remove_subscriber(conn_id, room);
        }

        debug!("connection {} left {} rooms", conn_id, left.len());
        left
    }

    /// `leave_all` plus dropping the connection's outbound queue.
    pub fn disconnect(&self, conn_id: ConnectionId) {
        let mut connections = lock(&self.inner.connections);
        let Some(membership) = connections.remove(&conn_id) else {
            return;
        };

        for room in &membership.rooms {
            self.remove_subscriber(conn_id, room);
        }

        debug!(
            "connection {} disconnected from {} rooms",
            conn_id,
            membership.rooms.len()
        );
    }

    // Caller holds the connections lock.
    fn remove_subscriber(&self, conn_id: ConnectionId, room: &RoomKey) {
        let mut rooms = self.inner.rooms.write().unwrap_or_else(PoisonError::into_inner);
        let Some(entry) = rooms.get(room) else {
            return;
        };

        let now_empty = {
            let mut state = lock(entry);
            state.subscribers.remove(&conn_id);
            state.subscribers.is_empty()
        };
        if now_empty {
            rooms.remove(room);
        }
    }

    /// Deliver `event` to every connection subscribed to `room` right now.
    /// Returns how many connections it was handed to.
    ///
    /// Fan-out for one room happens under that room's lock, so two
    /// broadcasts to the same room reach every subscriber in call order.
    pub fn broadcast(&self, room: &RoomKey, event: GatewayEvent) -> usize {
        let entry = {
            let rooms = self.inner.rooms.read().unwrap_or_else(PoisonError::into_inner);
            match rooms.get(room) {
                Some(entry) => entry.clone(),
                None => return 0,
            }
        };

        let mut state = lock(&entry);
        let mut delivered = 0;
        state.subscribers.retain(|conn_id, tx| {
            if tx.send(event.clone()).is_ok() {
                delivered += 1;
                true
            } else {
                // Receiver dropped without a disconnect; stop targeting it.
                trace!("dropping closed subscriber {} from {}", conn_id, room);
                false
            }
        });

        trace!("broadcast to {} reached {} connections", room, delivered);
        delivered
    }

    /// Send an event to one connection only.
    pub fn deliver(&self, conn_id: ConnectionId, event: GatewayEvent) -> bool {
        let connections = lock(&self.inner.connections);
        connections
            .get(&conn_id)
            .is_some_and(|membership| membership.tx.send(event).is_ok())
    }

    pub fn subscriber_count(&self, room: &RoomKey) -> usize {
        let rooms = self.inner.rooms.read().unwrap_or_else(PoisonError::into_inner);
        rooms
            .get(room)
            .map_or(0, |entry| lock(entry).subscribers.len())
    }
}
