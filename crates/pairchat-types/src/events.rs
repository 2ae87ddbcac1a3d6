use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Message, RoomKey};

/// Events sent over the WebSocket gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms successful authentication
    Ready { user_id: Uuid, username: String },

    /// Reply to `OpenConversation`: the connection is now subscribed to
    /// `room`, and `history` holds everything stored before the read.
    ConversationOpened {
        room: RoomKey,
        peer_id: Uuid,
        history: Vec<Message>,
    },

    /// Reply to `CloseConversation`
    ConversationClosed { room: RoomKey },

    /// A new message was stored in a room this connection has joined
    MessageCreate { room: RoomKey, message: Message },

    /// A command was rejected. `kind` is the stable error name.
    Error { kind: String, message: String },
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Authenticate the WebSocket connection
    Identify { token: String },

    /// Subscribe to the conversation with `peer_id` and fetch its history
    OpenConversation { peer_id: Uuid },

    /// Stop receiving live messages for `room`
    CloseConversation { room: RoomKey },

    /// Store a message and fan it out to the room
    SendMessage { receiver_id: Uuid, content: String },
}
