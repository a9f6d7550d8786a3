use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Emoji symbol -> ordered list of reactor display names.
///
/// Sparse by invariant: an absent key means an empty set, and an empty
/// list is never stored — the key is removed instead.
pub type ReactionMap = BTreeMap<String, Vec<String>>;

/// A persisted chat message. Exactly one of `receiver` / `room` is set
/// (enforced by the store schema). Identity and timestamp are assigned by
/// the store; only `reactions` mutates after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub sender: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub reactions: ReactionMap,
}

impl Message {
    /// The delivery target, reconstructed from the persisted row.
    /// `None` only for a row that violates the exactly-one-of schema check.
    pub fn target(&self) -> Option<Target> {
        match (&self.receiver, &self.room) {
            (Some(receiver), None) => Some(Target::Direct {
                receiver: receiver.clone(),
            }),
            (None, Some(room)) => Some(Target::Room { room: room.clone() }),
            _ => None,
        }
    }
}

/// Message contents as submitted by a client, before the store assigns an
/// id and timestamp.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub sender: String,
    pub target: Target,
    pub content: String,
}

/// Where a message is addressed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// One named user. Receiver being offline skips live delivery only;
    /// the message stays queryable via history.
    Direct { receiver: String },
    /// All current transport subscribers of a room.
    Room { room: String },
}
