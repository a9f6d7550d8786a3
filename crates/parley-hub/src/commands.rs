use anyhow::anyhow;
use tracing::{info, warn};
use uuid::Uuid;

use parley_types::error::HubError;
use parley_types::events::{ClientCommand, ServerEvent};
use parley_types::models::{Message, NewMessage, Target};

use crate::AppState;

/// Per-connection session state, owned by the socket's receive loop.
/// The display name is bound at most once (a bound name never changes).
pub struct Session {
    pub conn_id: Uuid,
    pub name: Option<String>,
}

impl Session {
    pub fn new(conn_id: Uuid) -> Self {
        Self {
            conn_id,
            name: None,
        }
    }
}

/// Dispatch one inbound command. Commands are fire-and-forget: failures
/// are reported to the originator as events and never tear down the
/// session or the process.
pub async fn handle(state: &AppState, session: &mut Session, cmd: ClientCommand) {
    match cmd {
        ClientCommand::Join { name } => join(state, session, name).await,
        ClientCommand::GetInitialState => initial_state(state, session.conn_id).await,
        ClientCommand::SendDirect { to, content } => {
            if let Some(name) = require_name(state, session).await {
                send_direct(state, &name, &to, &content).await;
            }
        }
        ClientCommand::SendRoom { room, content } => {
            if let Some(name) = require_name(state, session).await {
                send_room(state, &name, &room, &content).await;
            }
        }
        ClientCommand::CreateRoom { room } => {
            if let Some(name) = require_name(state, session).await {
                create_room(state, session.conn_id, &name, &room).await;
            }
        }
        ClientCommand::JoinRoom { room } => {
            if let Some(name) = require_name(state, session).await {
                join_room(state, session.conn_id, &name, &room).await;
            }
        }
        ClientCommand::ToggleReaction { message_id, emoji } => {
            if let Some(name) = require_name(state, session).await {
                toggle_reaction(state, session.conn_id, &name, message_id, &emoji).await;
            }
        }
    }
}

/// Every command except Join and GetInitialState needs a bound name.
async fn require_name(state: &AppState, session: &Session) -> Option<String> {
    match &session.name {
        Some(name) => Some(name.clone()),
        None => {
            state
                .hub
                .send_to_conn(
                    session.conn_id,
                    ServerEvent::Error {
                        message: "join before sending other commands".into(),
                    },
                )
                .await;
            None
        }
    }
}

async fn join(state: &AppState, session: &mut Session, name: String) {
    if session.name.is_some() {
        state
            .hub
            .send_to_conn(
                session.conn_id,
                ServerEvent::Error {
                    message: "already joined".into(),
                },
            )
            .await;
        return;
    }

    let bound = {
        let mut hub = state.hub.write().await;
        hub.registry.bind(session.conn_id, &name)
    };

    match bound {
        Ok(()) => {
            info!("{} joined as {}", session.conn_id, name);
            session.name = Some(name.clone());
            state
                .hub
                .send_to_conn(session.conn_id, ServerEvent::Welcome { name })
                .await;
            state.hub.broadcast_user_list().await;
        }
        Err(HubError::NameTaken) => {
            state
                .hub
                .send_to_conn(
                    session.conn_id,
                    ServerEvent::JoinError {
                        reason: "display name already taken".into(),
                    },
                )
                .await;
        }
        Err(e) => {
            warn!("{} join failed: {}", session.conn_id, e);
            state
                .hub
                .send_to_conn(
                    session.conn_id,
                    ServerEvent::Error {
                        message: e.to_string(),
                    },
                )
                .await;
        }
    }
}

/// Current user list and room snapshot, to the caller only.
async fn initial_state(state: &AppState, conn_id: Uuid) {
    let (users, rooms) = {
        let hub = state.hub.read().await;
        (hub.registry.all_names(), hub.rooms.snapshot())
    };
    state
        .hub
        .send_to_conn(conn_id, ServerEvent::UserList { users })
        .await;
    state
        .hub
        .send_to_conn(conn_id, ServerEvent::RoomList { rooms })
        .await;
}

async fn send_direct(state: &AppState, name: &str, to: &str, content: &str) {
    let new = NewMessage {
        sender: name.to_string(),
        target: Target::Direct {
            receiver: to.to_string(),
        },
        content: content.to_string(),
    };

    // Persist first; only a saved message is ever delivered.
    match persist(state, new).await {
        Ok(message) => {
            let sender = message.sender.clone();
            let receiver = message.receiver.clone().unwrap_or_default();
            state
                .hub
                .route_direct(&sender, &receiver, ServerEvent::DirectMessage { message })
                .await;
        }
        Err(e) => report_store_failure(state, name, e).await,
    }
}

async fn send_room(state: &AppState, name: &str, room: &str, content: &str) {
    let new = NewMessage {
        sender: name.to_string(),
        target: Target::Room {
            room: room.to_string(),
        },
        content: content.to_string(),
    };

    match persist(state, new).await {
        Ok(message) => {
            let room = message.room.clone().unwrap_or_default();
            state
                .hub
                .route_room(&room, ServerEvent::RoomMessage { message })
                .await;
        }
        Err(e) => report_store_failure(state, name, e).await,
    }
}

async fn create_room(state: &AppState, conn_id: Uuid, name: &str, room: &str) {
    let outcome = {
        let mut hub = state.hub.write().await;
        hub.rooms.create_or_get(room);
        hub.rooms.join(room, name, conn_id)
    };
    info!("{} created room {}", name, room);

    state.hub.broadcast_room_list().await;
    for left in &outcome.left_rooms {
        state.hub.broadcast_room_members(left).await;
    }
    state
        .hub
        .send_to_conn(
            conn_id,
            ServerEvent::RoomMembers {
                room: room.to_string(),
                members: outcome.members,
            },
        )
        .await;
}

async fn join_room(state: &AppState, conn_id: Uuid, name: &str, room: &str) {
    let outcome = {
        let mut hub = state.hub.write().await;
        hub.rooms.join(room, name, conn_id)
    };
    info!("{} joined room {}", name, room);

    if outcome.newly_joined || !outcome.left_rooms.is_empty() {
        state.hub.broadcast_room_list().await;
    }
    for left in &outcome.left_rooms {
        state.hub.broadcast_room_members(left).await;
    }

    if outcome.newly_joined {
        // Reaches every subscriber, the joiner included.
        state.hub.broadcast_room_members(room).await;
    } else {
        // Already a member: the caller still always gets the list.
        state
            .hub
            .send_to_conn(
                conn_id,
                ServerEvent::RoomMembers {
                    room: room.to_string(),
                    members: outcome.members,
                },
            )
            .await;
    }
}

async fn toggle_reaction(
    state: &AppState,
    conn_id: Uuid,
    name: &str,
    message_id: Uuid,
    emoji: &str,
) {
    match state.reactions.toggle(message_id, emoji, name).await {
        Ok(message) => {
            state.hub.route_reaction_update(&message).await;
        }
        Err(HubError::NotFound) => {
            state
                .hub
                .send_to_conn(
                    conn_id,
                    ServerEvent::Error {
                        message: "message not found".into(),
                    },
                )
                .await;
        }
        Err(e) => {
            warn!("{} reaction toggle on {} failed: {}", name, message_id, e);
            state
                .hub
                .send_to_conn(
                    conn_id,
                    ServerEvent::Error {
                        message: "reaction could not be saved".into(),
                    },
                )
                .await;
        }
    }
}

/// Run the blocking append off the async runtime.
async fn persist(state: &AppState, new: NewMessage) -> Result<Message, HubError> {
    let db = state.db.clone();
    tokio::task::spawn_blocking(move || db.append(&new))
        .await
        .map_err(|e| HubError::Store(anyhow!("store task failed: {e}")))?
        .map_err(HubError::from)
}

/// A failed append aborts the send wholesale: no broadcast, error to the
/// originator only.
async fn report_store_failure(state: &AppState, name: &str, err: HubError) {
    warn!("message from {} not persisted: {}", name, err);
    for conn_id in {
        let hub = state.hub.read().await;
        hub.registry.connections_of(name)
    } {
        state
            .hub
            .send_to_conn(
                conn_id,
                ServerEvent::Error {
                    message: "message could not be saved".into(),
                },
            )
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_db::Database;
    use tokio::sync::mpsc::UnboundedReceiver;

    async fn connect(state: &AppState) -> (Session, UnboundedReceiver<ServerEvent>) {
        let conn_id = Uuid::new_v4();
        let rx = state.hub.register(conn_id).await;
        (Session::new(conn_id), rx)
    }

    async fn join_as(state: &AppState, session: &mut Session, name: &str) {
        handle(
            state,
            session,
            ClientCommand::Join {
                name: name.to_string(),
            },
        )
        .await;
    }

    fn drain(rx: &mut UnboundedReceiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn state() -> AppState {
        AppState::new(Database::open_in_memory().unwrap())
    }

    #[tokio::test]
    async fn conflicting_join_yields_name_taken_without_mutation() {
        let state = state();
        let (mut alice, _alice_rx) = connect(&state).await;
        let (mut bob, _bob_rx) = connect(&state).await;
        let (mut impostor, mut impostor_rx) = connect(&state).await;

        join_as(&state, &mut alice, "alice").await;
        join_as(&state, &mut bob, "bob").await;
        join_as(&state, &mut impostor, "bob").await;

        assert!(impostor.name.is_none());
        let events = drain(&mut impostor_rx);
        assert!(
            events
                .iter()
                .any(|e| matches!(e, ServerEvent::JoinError { .. })),
            "impostor should be rejected: {events:?}"
        );

        // "bob" stays connected and bound
        let hub = state.hub.read().await;
        assert_eq!(hub.registry.all_names(), vec!["alice", "bob"]);
    }

    #[tokio::test]
    async fn direct_message_reaches_both_parties_and_history() {
        let state = state();
        let (mut alice, mut alice_rx) = connect(&state).await;
        let (mut bob, mut bob_rx) = connect(&state).await;
        join_as(&state, &mut alice, "alice").await;
        join_as(&state, &mut bob, "bob").await;
        drain(&mut alice_rx);
        drain(&mut bob_rx);

        handle(
            &state,
            &mut alice,
            ClientCommand::SendDirect {
                to: "bob".into(),
                content: "hi".into(),
            },
        )
        .await;

        for rx in [&mut alice_rx, &mut bob_rx] {
            let events = drain(rx);
            let delivered = events.iter().find_map(|e| match e {
                ServerEvent::DirectMessage { message } => Some(message),
                _ => None,
            });
            let message = delivered.expect("both parties receive the record");
            assert_eq!(message.sender, "alice");
            assert_eq!(message.content, "hi");
        }

        let history = state.db.direct_history("alice", "bob").unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "hi");
    }

    #[tokio::test]
    async fn direct_message_to_offline_receiver_is_persisted_not_delivered() {
        let state = state();
        let (mut alice, mut alice_rx) = connect(&state).await;
        join_as(&state, &mut alice, "alice").await;
        drain(&mut alice_rx);

        handle(
            &state,
            &mut alice,
            ClientCommand::SendDirect {
                to: "ghost".into(),
                content: "anyone there?".into(),
            },
        )
        .await;

        // Sender still gets the echo; no error surfaced
        let events = drain(&mut alice_rx);
        assert!(
            events
                .iter()
                .any(|e| matches!(e, ServerEvent::DirectMessage { .. }))
        );
        assert!(!events.iter().any(|e| matches!(e, ServerEvent::Error { .. })));

        assert_eq!(state.db.direct_history("alice", "ghost").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn room_migration_scenario() {
        let state = state();
        let (mut alice, mut alice_rx) = connect(&state).await;
        let (mut bob, mut bob_rx) = connect(&state).await;
        join_as(&state, &mut alice, "alice").await;
        join_as(&state, &mut bob, "bob").await;

        handle(&state, &mut alice, ClientCommand::CreateRoom { room: "team".into() }).await;
        {
            let hub = state.hub.read().await;
            assert_eq!(hub.rooms.members("team"), Some(vec!["alice".to_string()]));
        }

        handle(&state, &mut bob, ClientCommand::JoinRoom { room: "team".into() }).await;
        {
            let hub = state.hub.read().await;
            assert_eq!(
                hub.rooms.members("team"),
                Some(vec!["alice".to_string(), "bob".to_string()])
            );
        }

        handle(&state, &mut bob, ClientCommand::JoinRoom { room: "ops".into() }).await;
        let hub = state.hub.read().await;
        assert_eq!(hub.rooms.members("team"), Some(vec!["alice".to_string()]));
        assert_eq!(hub.rooms.members("ops"), Some(vec!["bob".to_string()]));
        drop(hub);

        // Both got membership pushes along the way
        assert!(
            drain(&mut alice_rx)
                .iter()
                .any(|e| matches!(e, ServerEvent::RoomMembers { .. }))
        );
        assert!(
            drain(&mut bob_rx)
                .iter()
                .any(|e| matches!(e, ServerEvent::RoomMembers { .. }))
        );
    }

    #[tokio::test]
    async fn room_message_reaches_subscribers_only() {
        let state = state();
        let (mut alice, mut alice_rx) = connect(&state).await;
        let (mut bob, mut bob_rx) = connect(&state).await;
        let (mut carol, mut carol_rx) = connect(&state).await;
        join_as(&state, &mut alice, "alice").await;
        join_as(&state, &mut bob, "bob").await;
        join_as(&state, &mut carol, "carol").await;

        handle(&state, &mut alice, ClientCommand::CreateRoom { room: "team".into() }).await;
        handle(&state, &mut bob, ClientCommand::JoinRoom { room: "team".into() }).await;
        drain(&mut alice_rx);
        drain(&mut bob_rx);
        drain(&mut carol_rx);

        handle(
            &state,
            &mut alice,
            ClientCommand::SendRoom {
                room: "team".into(),
                content: "standup time".into(),
            },
        )
        .await;

        for rx in [&mut alice_rx, &mut bob_rx] {
            assert!(
                drain(rx)
                    .iter()
                    .any(|e| matches!(e, ServerEvent::RoomMessage { .. }))
            );
        }
        assert!(
            !drain(&mut carol_rx)
                .iter()
                .any(|e| matches!(e, ServerEvent::RoomMessage { .. }))
        );

        assert_eq!(state.db.room_history("team").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn reaction_toggle_rebroadcasts_canonical_state_to_the_room() {
        let state = state();
        let (mut alice, mut alice_rx) = connect(&state).await;
        let (mut bob, mut bob_rx) = connect(&state).await;
        join_as(&state, &mut alice, "alice").await;
        join_as(&state, &mut bob, "bob").await;
        handle(&state, &mut alice, ClientCommand::CreateRoom { room: "team".into() }).await;
        handle(&state, &mut bob, ClientCommand::JoinRoom { room: "team".into() }).await;
        handle(
            &state,
            &mut alice,
            ClientCommand::SendRoom {
                room: "team".into(),
                content: "react to this".into(),
            },
        )
        .await;
        let message_id = state.db.room_history("team").unwrap()[0].id;
        drain(&mut alice_rx);
        drain(&mut bob_rx);

        handle(
            &state,
            &mut bob,
            ClientCommand::ToggleReaction {
                message_id,
                emoji: "👍".into(),
            },
        )
        .await;

        for rx in [&mut alice_rx, &mut bob_rx] {
            let events = drain(rx);
            let update = events
                .iter()
                .find_map(|e| match e {
                    ServerEvent::ReactionUpdated {
                        message_id: id,
                        reactions,
                    } if *id == message_id => Some(reactions),
                    _ => None,
                })
                .expect("reaction update delivered to room");
            assert_eq!(update["👍"], vec!["bob"]);
        }
    }

    #[tokio::test]
    async fn reaction_toggle_on_stale_id_reports_not_found() {
        let state = state();
        let (mut alice, mut alice_rx) = connect(&state).await;
        join_as(&state, &mut alice, "alice").await;
        drain(&mut alice_rx);

        handle(
            &state,
            &mut alice,
            ClientCommand::ToggleReaction {
                message_id: Uuid::new_v4(),
                emoji: "👍".into(),
            },
        )
        .await;

        assert!(
            drain(&mut alice_rx)
                .iter()
                .any(|e| matches!(e, ServerEvent::Error { .. }))
        );
    }

    #[tokio::test]
    async fn commands_before_join_are_rejected() {
        let state = state();
        let (mut nameless, mut rx) = connect(&state).await;

        handle(
            &state,
            &mut nameless,
            ClientCommand::SendDirect {
                to: "bob".into(),
                content: "sneaky".into(),
            },
        )
        .await;

        assert!(
            drain(&mut rx)
                .iter()
                .any(|e| matches!(e, ServerEvent::Error { .. }))
        );
        // Nothing was persisted on behalf of the nameless connection
        assert!(state.db.direct_history("sneaky", "bob").unwrap().is_empty());
    }

    #[tokio::test]
    async fn disconnect_cleans_up_presence_and_rooms() {
        let state = state();
        let (mut alice, _alice_rx) = connect(&state).await;
        let (mut bob, _bob_rx) = connect(&state).await;
        join_as(&state, &mut alice, "alice").await;
        join_as(&state, &mut bob, "bob").await;
        handle(&state, &mut alice, ClientCommand::CreateRoom { room: "team".into() }).await;
        handle(&state, &mut bob, ClientCommand::JoinRoom { room: "team".into() }).await;

        state.hub.disconnect(bob.conn_id).await;
        {
            let hub = state.hub.read().await;
            assert_eq!(hub.registry.all_names(), vec!["alice"]);
            assert_eq!(hub.rooms.members("team"), Some(vec!["alice".to_string()]));
        }

        state.hub.disconnect(alice.conn_id).await;
        // Idempotent teardown
        state.hub.disconnect(alice.conn_id).await;

        let hub = state.hub.read().await;
        assert!(hub.registry.all_names().is_empty());
        assert!(hub.rooms.snapshot().is_empty());
    }

    #[tokio::test]
    async fn initial_state_goes_to_the_caller_only() {
        let state = state();
        let (mut alice, mut alice_rx) = connect(&state).await;
        let (mut curious, mut curious_rx) = connect(&state).await;
        join_as(&state, &mut alice, "alice").await;
        drain(&mut alice_rx);
        drain(&mut curious_rx);

        handle(&state, &mut curious, ClientCommand::GetInitialState).await;

        let events = drain(&mut curious_rx);
        assert!(events.iter().any(|e| matches!(e, ServerEvent::UserList { .. })));
        assert!(events.iter().any(|e| matches!(e, ServerEvent::RoomList { .. })));
        assert!(drain(&mut alice_rx).is_empty());
    }
}
