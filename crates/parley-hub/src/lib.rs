pub mod commands;
pub mod connection;
pub mod dispatcher;
pub mod reactions;
pub mod registry;
pub mod rooms;

use std::sync::Arc;

use parley_db::Database;

use crate::dispatcher::Hub;
use crate::reactions::ReactionEngine;

/// Shared handles for every connection task and API handler.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub hub: Hub,
    pub reactions: Arc<ReactionEngine>,
}

impl AppState {
    pub fn new(db: Database) -> Self {
        let db = Arc::new(db);
        Self {
            hub: Hub::new(),
            reactions: Arc::new(ReactionEngine::new(db.clone())),
            db,
        }
    }
}
