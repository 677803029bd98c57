// src/db/state.rs
// Key-value server state (git monitor cursor and friends)

use rusqlite::{Connection, OptionalExtension, params};

/// Key for the last commit the git monitor has recorded.
pub const LAST_PROCESSED_COMMIT_OID: &str = "last_processed_commit_oid";

/// Get a server state value.
pub fn get_state_sync(conn: &Connection, key: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        "SELECT value FROM server_state WHERE key = ?1",
        params![key],
        |row| row.get(0),
    )
    .optional()
}

/// Set a server state value (upsert).
pub fn set_state_sync(conn: &Connection, key: &str, value: &str) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO server_state (key, value, updated_at)
         VALUES (?1, ?2, datetime('now'))
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        params![key, value],
    )?;
    Ok(())
}
