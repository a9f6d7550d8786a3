use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard, mpsc};
use tracing::{info, warn};
use uuid::Uuid;

use parley_types::events::ServerEvent;
use parley_types::models::{Message, Target};

use crate::registry::Registry;
use crate::rooms::RoomDirectory;

/// The coordination hub: live connections, presence, room membership, and
/// event fan-out.
#[derive(Clone, Default)]
pub struct Hub {
    state: Arc<RwLock<HubState>>,
}

/// All coordination state behind one lock. Every mutation is short and the
/// guard is never held across a store call, which keeps registry and
/// directory updates effectively non-preemptive — recipients are always
/// re-resolved at emit time, after any store suspension point.
#[derive(Default)]
pub struct HubState {
    pub registry: Registry,
    pub rooms: RoomDirectory,
    channels: HashMap<Uuid, mpsc::UnboundedSender<ServerEvent>>,
}

impl HubState {
    fn send_to(&self, conn_id: Uuid, event: ServerEvent) {
        if let Some(tx) = self.channels.get(&conn_id) {
            // A closed receiver means the connection is tearing down;
            // skipping it is not an error.
            let _ = tx.send(event);
        }
    }

    fn send_all(&self, event: ServerEvent) {
        for tx in self.channels.values() {
            let _ = tx.send(event.clone());
        }
    }
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn read(&self) -> RwLockReadGuard<'_, HubState> {
        self.state.read().await
    }

    pub async fn write(&self) -> RwLockWriteGuard<'_, HubState> {
        self.state.write().await
    }

    /// Register a connection's send channel. Returns the receiver end that
    /// the socket's send loop drains.
    pub async fn register(&self, conn_id: Uuid) -> mpsc::UnboundedReceiver<ServerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.write().await.channels.insert(conn_id, tx);
        rx
    }

    /// Full teardown cascade for a closed socket: drop the send channel,
    /// unbind the name, leave every room, then push fresh presence
    /// snapshots. Safe to call more than once.
    pub async fn disconnect(&self, conn_id: Uuid) {
        let name = {
            let mut state = self.state.write().await;
            state.channels.remove(&conn_id);
            let name = state.registry.remove(conn_id);
            if let Some(name) = &name {
                state.rooms.leave_all(conn_id, name);
            }
            name
        };

        // An unnamed connection changed nothing anyone can observe.
        if let Some(name) = name {
            info!("{} ({}) left", name, conn_id);
            self.broadcast_room_list().await;
            self.broadcast_user_list().await;
        }
    }

    pub async fn send_to_conn(&self, conn_id: Uuid, event: ServerEvent) {
        self.state.read().await.send_to(conn_id, event);
    }

    pub async fn broadcast_all(&self, event: ServerEvent) {
        self.state.read().await.send_all(event);
    }

    /// Push to every live connection of `sender` and `receiver`. An
    /// offline receiver resolves to no connections and is skipped — the
    /// message stays queryable via history.
    pub async fn route_direct(&self, sender: &str, receiver: &str, event: ServerEvent) {
        let state = self.state.read().await;
        let mut targets = state.registry.connections_of(sender);
        targets.extend(state.registry.connections_of(receiver));
        for conn_id in targets {
            state.send_to(conn_id, event.clone());
        }
    }

    /// Push to all transport subscribers of `room`.
    pub async fn route_room(&self, room: &str, event: ServerEvent) {
        let state = self.state.read().await;
        for conn_id in state.rooms.subscribers(room) {
            state.send_to(conn_id, event.clone());
        }
    }

    /// Rebroadcast the canonical reaction state of a message. The target
    /// is derived from the stored message itself, never from caller hints.
    pub async fn route_reaction_update(&self, message: &Message) {
        let event = ServerEvent::ReactionUpdated {
            message_id: message.id,
            reactions: message.reactions.clone(),
        };
        match message.target() {
            Some(Target::Direct { receiver }) => {
                self.route_direct(&message.sender, &receiver, event).await;
            }
            Some(Target::Room { room }) => {
                self.route_room(&room, event).await;
            }
            None => warn!("message {} has no delivery target", message.id),
        }
    }

    pub async fn broadcast_user_list(&self) {
        let state = self.state.read().await;
        let users = state.registry.all_names();
        state.send_all(ServerEvent::UserList { users });
    }

    pub async fn broadcast_room_list(&self) {
        let state = self.state.read().await;
        let rooms = state.rooms.snapshot();
        state.send_all(ServerEvent::RoomList { rooms });
    }

    /// Push a room's member list to its subscribers. A vanished (emptied)
    /// room broadcasts nothing; the room-list push covers its removal.
    pub async fn broadcast_room_members(&self, room: &str) {
        let state = self.state.read().await;
        let Some(members) = state.rooms.members(room) else {
            return;
        };
        let event = ServerEvent::RoomMembers {
            room: room.to_string(),
            members,
        };
        for conn_id in state.rooms.subscribers(room) {
            state.send_to(conn_id, event.clone());
        }
    }
}
