//! Database schema and migrations
//!
//! Uses SQLite with embedded migrations managed via PRAGMA user_version.

use rusqlite::Connection;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

/// SQL migrations, indexed by version number
const MIGRATIONS: &[&str] = &[
    // Version 1: tracked activity and flat key/value state
    r#"
    -- Flat namespace for scalar and record values
    -- (pagesVisited, timeTracked, walletState, tokenBalance)
    CREATE TABLE IF NOT EXISTS kv (
        key              TEXT PRIMARY KEY,
        value            TEXT NOT NULL,
        updated_at       DATETIME NOT NULL
    );

    -- Ordered navigation log; rowid order is insertion order
    CREATE TABLE IF NOT EXISTS navigation_entries (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        url              TEXT NOT NULL,
        title            TEXT NOT NULL,
        domain           TEXT NOT NULL,
        timestamp_ms     INTEGER NOT NULL,
        visit_start_ms   INTEGER NOT NULL,
        event_type       TEXT NOT NULL,
        time_spent       INTEGER NOT NULL DEFAULT 0,
        interactions     INTEGER NOT NULL DEFAULT 0,
        referrer         TEXT,
        fallback         INTEGER NOT NULL DEFAULT 0,
        time_end_ms      INTEGER
    );

    -- Captured prompts, capped by the store on insert
    CREATE TABLE IF NOT EXISTS captured_prompts (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        kind             TEXT NOT NULL,
        url              TEXT NOT NULL,
        domain           TEXT NOT NULL,
        prompt           TEXT NOT NULL,
        timestamp_ms     INTEGER NOT NULL,
        conversation_id  TEXT NOT NULL,
        prompt_length    INTEGER NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_navigation_url_ts ON navigation_entries(url, timestamp_ms);
    CREATE INDEX IF NOT EXISTS idx_prompts_ts ON captured_prompts(timestamp_ms);
    "#,
    // Version 2: window focus history
    r#"
    CREATE TABLE IF NOT EXISTS session_events (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        kind             TEXT NOT NULL,
        timestamp_ms     INTEGER NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_session_events_ts ON session_events(timestamp_ms);
    "#,
];

/// Run all pending migrations
pub fn run_migrations(conn: &Connection) -> crate::error::Result<()> {
    let current_version: i32 = conn
        .query_row("PRAGMA user_version", [], |r| r.get(0))
        .unwrap_or(0);

    tracing::info!(
        current_version,
        target_version = SCHEMA_VERSION,
        "Checking database migrations"
    );

    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let version = (i + 1) as i32;
        if version > current_version {
            tracing::info!(version, "Running migration");
            conn.execute_batch(migration)?;
            conn.execute_batch(&format!("PRAGMA user_version = {}", version))?;
        }
    }

    if current_version < SCHEMA_VERSION {
        tracing::info!(
            from = current_version,
            to = SCHEMA_VERSION,
            "Migrations complete"
        );
    }

    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> crate::error::Result<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    Ok(version)
}
