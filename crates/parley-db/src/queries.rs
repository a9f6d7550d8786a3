use anyhow::{Context, Result};
use chrono::Utc;
use uuid::Uuid;

use parley_types::models::{Message, NewMessage, ReactionMap, Target};

use crate::Database;
use crate::models::MessageRow;

impl Database {
    /// Append a message. The store assigns the id and timestamp; the
    /// returned record is exactly what a subsequent `get` would yield.
    pub fn append(&self, new: &NewMessage) -> Result<Message> {
        let id = Uuid::new_v4();
        let created_at = Utc::now();

        let (receiver, room) = match &new.target {
            Target::Direct { receiver } => (Some(receiver.as_str()), None),
            Target::Room { room } => (None, Some(room.as_str())),
        };

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, sender, receiver, room, content, created_at, reactions)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, '{}')",
                rusqlite::params![
                    id.to_string(),
                    new.sender,
                    receiver,
                    room,
                    new.content,
                    created_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })?;

        Ok(Message {
            id,
            sender: new.sender.clone(),
            receiver: receiver.map(str::to_string),
            room: room.map(str::to_string),
            content: new.content.clone(),
            created_at,
            reactions: ReactionMap::new(),
        })
    }

    pub fn get(&self, id: Uuid) -> Result<Option<Message>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, sender, receiver, room, content, created_at, reactions
                 FROM messages WHERE id = ?1",
            )?;
            let row = stmt.query_row([id.to_string()], map_row).optional()?;
            row.map(row_to_message).transpose()
        })
    }

    /// Direct history between two names, either direction, oldest first.
    pub fn direct_history(&self, a: &str, b: &str) -> Result<Vec<Message>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, sender, receiver, room, content, created_at, reactions
                 FROM messages
                 WHERE receiver IS NOT NULL
                   AND ((sender = ?1 AND receiver = ?2) OR (sender = ?2 AND receiver = ?1))
                 ORDER BY created_at, rowid",
            )?;
            collect_messages(stmt.query_map([a, b], map_row)?)
        })
    }

    /// Room history, oldest first.
    pub fn room_history(&self, room: &str) -> Result<Vec<Message>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, sender, receiver, room, content, created_at, reactions
                 FROM messages
                 WHERE room = ?1
                 ORDER BY created_at, rowid",
            )?;
            collect_messages(stmt.query_map([room], map_row)?)
        })
    }

    /// Whole-map replace of a message's reaction map. Callers always supply
    /// the fully recomputed map. Returns false when no such message exists.
    pub fn set_reactions(&self, id: Uuid, reactions: &ReactionMap) -> Result<bool> {
        let json = serde_json::to_string(reactions)?;
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE messages SET reactions = ?1 WHERE id = ?2",
                rusqlite::params![json, id.to_string()],
            )?;
            Ok(changed > 0)
        })
    }
}

fn map_row(row: &rusqlite::Row) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        sender: row.get(1)?,
        receiver: row.get(2)?,
        room: row.get(3)?,
        content: row.get(4)?,
        created_at: row.get(5)?,
        reactions: row.get(6)?,
    })
}

fn row_to_message(row: MessageRow) -> Result<Message> {
    Ok(Message {
        id: row
            .id
            .parse()
            .with_context(|| format!("corrupt message id '{}'", row.id))?,
        sender: row.sender,
        receiver: row.receiver,
        room: row.room,
        content: row.content,
        created_at: row
            .created_at
            .parse()
            .with_context(|| format!("corrupt created_at on message '{}'", row.id))?,
        reactions: serde_json::from_str(&row.reactions)
            .with_context(|| format!("corrupt reactions on message '{}'", row.id))?,
    })
}

fn collect_messages(
    rows: impl Iterator<Item = rusqlite::Result<MessageRow>>,
) -> Result<Vec<Message>> {
    rows.map(|row| row_to_message(row?)).collect()
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
