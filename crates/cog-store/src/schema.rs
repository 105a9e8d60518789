use rusqlite::{Connection, OptionalExtension};

use crate::error::{Result, StoreError};

pub const SCHEMA_VERSION: i64 = 1;

pub fn initialize(conn: &Connection) -> Result<()> {
    conn.execute_batch("PRAGMA journal_mode = WAL;")?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.pragma_update(None, "busy_timeout", 5000)?;

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS metadata (
            key   TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS memory_sets (
            set_id      TEXT PRIMARY KEY,
            description TEXT NOT NULL DEFAULT '',
            created_at  REAL NOT NULL
        );

        CREATE TABLE IF NOT EXISTS coglets (
            id           TEXT PRIMARY KEY,
            set_id       TEXT NOT NULL REFERENCES memory_sets(set_id) ON DELETE CASCADE,
            content      TEXT NOT NULL,
            weight       REAL NOT NULL,
            last_update  REAL NOT NULL,
            access_count INTEGER NOT NULL DEFAULT 0,
            created_at   REAL NOT NULL,
            extra        TEXT NOT NULL DEFAULT '{}'
        );

        CREATE INDEX IF NOT EXISTS idx_coglets_set ON coglets(set_id);
        ",
    )?;

    conn.execute(
        "INSERT OR IGNORE INTO metadata (key, value) VALUES ('schema_version', ?1)",
        [SCHEMA_VERSION.to_string()],
    )?;

    Ok(())
}

pub fn get_schema_version(conn: &Connection) -> Result<Option<i64>> {
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM metadata WHERE key = 'schema_version'",
            [],
            |row| row.get(0),
        )
        .optional()?;
    value
        .map(|v| {
            v.parse::<i64>()
                .map_err(|_| StoreError::InvalidData(format!("bad schema_version '{v}'")))
        })
        .transpose()
}

/// Refuse databases written by a newer schema.
pub fn check_version(conn: &Connection) -> Result<()> {
    match get_schema_version(conn)? {
        Some(found) if found > SCHEMA_VERSION => Err(StoreError::InvalidData(format!(
            "database schema version {found} is newer than supported version {SCHEMA_VERSION}"
        ))),
        _ => Ok(()),
    }
}
