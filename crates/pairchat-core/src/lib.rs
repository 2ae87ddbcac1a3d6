//! Social graph and real-time delivery for one-to-one chat.
//!
//! [`FriendshipEngine`] owns the request/accept state machine,
//! [`RoomRouter`] owns live room subscriptions, and
//! [`DeliveryCoordinator`] ties both to the message log.

pub mod coordinator;
pub mod error;
pub mod friendship;
pub mod router;
pub mod store;

pub use coordinator::{Backfill, DeliveryCoordinator, MAX_CONTENT_BYTES};
pub use error::ChatError;
pub use friendship::FriendshipEngine;
pub use router::{ConnectionId, RoomRouter, room_key_for};
pub use store::{MessageStore, RelationshipStore, StoreError};
