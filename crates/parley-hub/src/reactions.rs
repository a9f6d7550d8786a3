use std::collections::HashMap;
use std::sync::Arc;

use anyhow::anyhow;
use tokio::sync::Mutex;
use uuid::Uuid;

use parley_db::Database;
use parley_types::error::HubError;
use parley_types::models::Message;

/// Per-message reaction toggles.
///
/// A toggle is a read-modify-write across the blocking store boundary:
/// load the map, flip one reactor mark, write the whole map back. Two
/// toggles on the same message issued before the first write lands would
/// race and silently drop one update, so the engine serializes them with
/// a per-message-id mutex. Toggles on different messages run freely.
pub struct ReactionEngine {
    db: Arc<Database>,
    locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl ReactionEngine {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Toggle `reactor`'s mark for `emoji` on a message and persist the
    /// recomputed map. Returns the message with its updated reaction map
    /// for fan-out — only after the store write succeeded. Any failure
    /// aborts wholesale; no partial state escapes.
    pub async fn toggle(
        &self,
        message_id: Uuid,
        emoji: &str,
        reactor: &str,
    ) -> Result<Message, HubError> {
        let lock = self.lock_for(message_id).await;
        let guard = lock.lock().await;

        let result = self.toggle_locked(message_id, emoji, reactor).await;

        drop(guard);
        self.release(message_id, lock).await;
        result
    }

    async fn toggle_locked(
        &self,
        message_id: Uuid,
        emoji: &str,
        reactor: &str,
    ) -> Result<Message, HubError> {
        let db = self.db.clone();
        let mut message = tokio::task::spawn_blocking(move || db.get(message_id))
            .await
            .map_err(|e| HubError::Store(anyhow!("store task failed: {e}")))??
            .ok_or(HubError::NotFound)?;

        let reactors = message.reactions.entry(emoji.to_string()).or_default();
        if let Some(pos) = reactors.iter().position(|name| name == reactor) {
            reactors.remove(pos);
        } else {
            reactors.push(reactor.to_string());
        }
        if reactors.is_empty() {
            // Sparse invariant: never persist an empty reactor list.
            message.reactions.remove(emoji);
        }

        let db = self.db.clone();
        let id = message.id;
        let map = message.reactions.clone();
        let found = tokio::task::spawn_blocking(move || db.set_reactions(id, &map))
            .await
            .map_err(|e| HubError::Store(anyhow!("store task failed: {e}")))??;
        if !found {
            return Err(HubError::NotFound);
        }

        Ok(message)
    }

    async fn lock_for(&self, message_id: Uuid) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .await
            .entry(message_id)
            .or_default()
            .clone()
    }

    /// Drop the lock table entry once no other toggle holds it, so the
    /// table does not grow with every message ever reacted to.
    async fn release(&self, message_id: Uuid, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().await;
        drop(lock);
        if let Some(entry) = locks.get(&message_id) {
            if Arc::strong_count(entry) == 1 {
                locks.remove(&message_id);
            }
        }
    }
}
