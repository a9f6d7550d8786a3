use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Message, ReactionMap};

/// Commands sent FROM client TO server over the WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ClientCommand {
    /// Bind a display name to this connection. Must precede every other
    /// command except `GetInitialState`.
    Join { name: String },

    /// Request the current user list and room snapshot (sent on page load).
    /// Answered to the caller only.
    GetInitialState,

    /// Send a direct message to a named user.
    SendDirect { to: String, content: String },

    /// Send a message to a room.
    SendRoom { room: String, content: String },

    /// Create a room and join it.
    CreateRoom { room: String },

    /// Leave the currently occupied room (if any) and join another.
    JoinRoom { room: String },

    /// Add or remove the caller's reaction mark for one emoji on a message.
    ToggleReaction { message_id: Uuid, emoji: String },
}

/// Events sent FROM server TO clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ServerEvent {
    /// Join accepted; greets the new connection.
    Welcome { name: String },

    /// Join rejected. The connection stays open and may retry with a
    /// different name.
    JoinError { reason: String },

    /// Display names of all live connections, in bind order.
    UserList { users: Vec<String> },

    /// Full room snapshot: room name -> member names.
    RoomList { rooms: BTreeMap<String, Vec<String>> },

    /// Membership of a single room after a change.
    RoomMembers { room: String, members: Vec<String> },

    /// A direct message, delivered to sender and receiver.
    DirectMessage { message: Message },

    /// A room message, delivered to all room subscribers.
    RoomMessage { message: Message },

    /// Canonical reaction state of a message after a toggle.
    ReactionUpdated {
        message_id: Uuid,
        reactions: ReactionMap,
    },

    /// A request failed; reported to the originator only.
    Error { message: String },
}
