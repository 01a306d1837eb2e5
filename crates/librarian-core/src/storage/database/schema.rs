use rusqlite::Connection;

use crate::error::Result;

pub const SCHEMA_VERSION: u32 = 1;

pub fn apply_pragmas(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        PRAGMA busy_timeout = 5000;
        ",
    )?;
    Ok(())
}

/// `normalized_title` and `unique_id` carry UNIQUE constraints so the store
/// itself rejects a duplicate even when a caller's pre-check was stale.
/// SQLite treats NULLs as distinct, so records without a unique id coexist.
pub fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version    INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS records (
            id               TEXT PRIMARY KEY,
            type             TEXT NOT NULL DEFAULT 'unknown',
            title            TEXT NOT NULL,
            normalized_title TEXT NOT NULL UNIQUE,
            authors          TEXT NOT NULL DEFAULT '[]',
            year             INTEGER,
            source           TEXT,
            unique_id        TEXT UNIQUE,
            search_topic     TEXT,
            added_by         TEXT NOT NULL,
            added_at         TEXT NOT NULL,
            embedding        BLOB
        );
        ",
    )?;
    Ok(())
}

pub fn create_indexes(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE INDEX IF NOT EXISTS idx_records_added_by ON records(added_by);
        CREATE INDEX IF NOT EXISTS idx_records_added_at ON records(added_at);
        CREATE INDEX IF NOT EXISTS idx_records_type     ON records(type);
        CREATE INDEX IF NOT EXISTS idx_records_search_topic ON records(search_topic);
        ",
    )?;
    Ok(())
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    create_tables(conn)?;
    create_indexes(conn)?;
    Ok(())
}
