/// Database row types — these map directly to SQLite rows.
/// Distinct from the parley-types wire model so query code stays close to
/// the schema; conversion happens in one place (`queries::row_to_message`).
pub struct MessageRow {
    pub id: String,
    pub sender: String,
    pub receiver: Option<String>,
    pub room: Option<String>,
    pub content: String,
    pub created_at: String,
    pub reactions: String,
}
