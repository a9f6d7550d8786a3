use std::collections::{BTreeMap, HashMap};

use uuid::Uuid;

/// One named room: member list in join order plus the transport-level
/// subscriber table (conn_id -> display name). Logical membership is the
/// canonical, observable state; subscription is a delivery detail.
#[derive(Debug, Default)]
struct Room {
    members: Vec<String>,
    subscribers: HashMap<Uuid, String>,
}

/// Tracks room membership and enforces at-most-one-room-per-connection.
///
/// Membership is tied strictly to live connections: a name with zero live
/// connections is not a member, even transiently. That trades "membership
/// survives reconnect" for simplicity — documented policy, not a defect.
#[derive(Debug, Default)]
pub struct RoomDirectory {
    rooms: HashMap<String, Room>,
}

/// Result of moving a connection into a room.
#[derive(Debug)]
pub struct JoinOutcome {
    /// Full member list of the target room, always returned to the caller.
    pub members: Vec<String>,
    /// Whether the name was newly added (vs. an already-member re-join).
    pub newly_joined: bool,
    /// Rooms whose member list changed by the implicit leave. Rooms left
    /// empty are already deleted and will be absent from `members()`.
    pub left_rooms: Vec<String>,
}

impl RoomDirectory {
    /// Idempotent create.
    pub fn create_or_get(&mut self, room: &str) {
        self.rooms.entry(room.to_string()).or_default();
    }

    /// Move a connection into `room`, leaving whatever other room it
    /// currently occupies, then subscribe it and add `name` to the members
    /// if absent. Rejoining the occupied room leaves membership untouched
    /// and still returns the full list.
    pub fn join(&mut self, room: &str, name: &str, conn_id: Uuid) -> JoinOutcome {
        let left_rooms = self.leave_others(conn_id, name, Some(room));

        let entry = self.rooms.entry(room.to_string()).or_default();
        entry.subscribers.insert(conn_id, name.to_string());

        let newly_joined = if entry.members.iter().any(|m| m == name) {
            false
        } else {
            entry.members.push(name.to_string());
            true
        };

        JoinOutcome {
            members: entry.members.clone(),
            newly_joined,
            left_rooms,
        }
    }

    /// Unsubscribe a connection from every room it occupies, dropping
    /// `name` from a room's member list when no other live connection
    /// holds it there. Emptied rooms are deleted. Returns the names of
    /// rooms whose member list changed.
    pub fn leave_all(&mut self, conn_id: Uuid, name: &str) -> Vec<String> {
        self.leave_others(conn_id, name, None)
    }

    /// Leave sweep, optionally sparing one room so a rejoin of the
    /// occupied room never churns its membership.
    fn leave_others(&mut self, conn_id: Uuid, name: &str, keep: Option<&str>) -> Vec<String> {
        let occupied: Vec<String> = self
            .rooms
            .iter()
            .filter(|(room_name, room)| {
                keep != Some(room_name.as_str()) && room.subscribers.contains_key(&conn_id)
            })
            .map(|(room_name, _)| room_name.clone())
            .collect();

        let mut changed = Vec::new();
        for room_name in occupied {
            let Some(room) = self.rooms.get_mut(&room_name) else {
                continue;
            };
            room.subscribers.remove(&conn_id);

            let still_held = room.subscribers.values().any(|n| n == name);
            if !still_held && room.members.iter().any(|m| m == name) {
                room.members.retain(|m| m != name);
                changed.push(room_name.clone());
            }

            if room.members.is_empty() {
                self.rooms.remove(&room_name);
            }
        }
        changed
    }

    pub fn members(&self, room: &str) -> Option<Vec<String>> {
        self.rooms.get(room).map(|r| r.members.clone())
    }

    pub fn subscribers(&self, room: &str) -> Vec<Uuid> {
        self.rooms
            .get(room)
            .map(|r| r.subscribers.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Full membership snapshot, for presence pushes and initial state.
    pub fn snapshot(&self) -> BTreeMap<String, Vec<String>> {
        self.rooms
            .iter()
            .map(|(name, room)| (name.clone(), room.members.clone()))
            .collect()
    }
}
