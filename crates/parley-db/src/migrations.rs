use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS messages (
            id          TEXT PRIMARY KEY,
            sender      TEXT NOT NULL,
            receiver    TEXT,
            room        TEXT,
            content     TEXT NOT NULL,
            created_at  TEXT NOT NULL,
            reactions   TEXT NOT NULL DEFAULT '{}',
            CHECK ((receiver IS NULL) <> (room IS NULL))
        );

        CREATE INDEX IF NOT EXISTS idx_messages_direct
            ON messages(sender, receiver, created_at);

        CREATE INDEX IF NOT EXISTS idx_messages_room
            ON messages(room, created_at);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
