use std::collections::{HashMap, HashSet};

use uuid::Uuid;

use parley_types::error::HubError;

/// Binds live connection ids to display names.
///
/// A name is unique among live connections only — it frees up the moment
/// its connection is removed, and is never reserved globally. Comparison
/// is case-sensitive exact match.
#[derive(Debug, Default)]
pub struct Registry {
    names: HashMap<Uuid, String>,
    /// Bind order, for stable user lists.
    order: Vec<Uuid>,
}

impl Registry {
    /// Bind `name` to a connection. Fails without mutation when any live
    /// connection already holds the name. A bound name never changes;
    /// rebinding is guarded at the command layer.
    pub fn bind(&mut self, conn_id: Uuid, name: &str) -> Result<(), HubError> {
        if self.names.values().any(|n| n == name) {
            return Err(HubError::NameTaken);
        }
        if self.names.insert(conn_id, name.to_string()).is_none() {
            self.order.push(conn_id);
        }
        Ok(())
    }

    /// Unbind a connection. Idempotent.
    pub fn remove(&mut self, conn_id: Uuid) -> Option<String> {
        let name = self.names.remove(&conn_id);
        if name.is_some() {
            self.order.retain(|id| *id != conn_id);
        }
        name
    }

    pub fn name_of(&self, conn_id: Uuid) -> Option<&str> {
        self.names.get(&conn_id).map(String::as_str)
    }

    /// All live connections bound to `name`. Singleton under current
    /// invariants; set-typed for future multi-session support.
    pub fn connections_of(&self, name: &str) -> HashSet<Uuid> {
        self.names
            .iter()
            .filter(|(_, n)| n.as_str() == name)
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn all_names(&self) -> Vec<String> {
        self.order
            .iter()
            .filter_map(|id| self.names.get(id).cloned())
            .collect()
    }
}
