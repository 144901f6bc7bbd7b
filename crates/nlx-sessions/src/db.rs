use rusqlite::Connection;

use crate::error::Result;

/// Initialise the session KV and archive tables.
///
/// Safe to call on every startup — uses `IF NOT EXISTS` throughout.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS sessions (
            session_id TEXT PRIMARY KEY,
            payload    TEXT NOT NULL,
            expires_at INTEGER NOT NULL
        );
        CREATE TABLE IF NOT EXISTS archives (
            user_id TEXT NOT NULL,
            id      INTEGER NOT NULL,
            payload TEXT NOT NULL,
            PRIMARY KEY (user_id, id)
        );
        CREATE INDEX IF NOT EXISTS idx_archives_user
            ON archives(user_id, id DESC);",
    )?;
    Ok(())
}
