//! Rollup database schema and migrations
//!
//! Uses SQLite with embedded migrations managed via PRAGMA user_version.
//! Timestamps are stored as RFC 3339 TEXT in UTC; with a fixed format they
//! compare lexicographically in chronological order.

use rusqlite::Connection;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// SQL migrations, indexed by version number
const MIGRATIONS: &[&str] = &[
    // Version 1: rollup tables at each width, fragment ledger, dead letters
    r#"
    CREATE TABLE IF NOT EXISTS usage_1m (
        account_id      TEXT NOT NULL,
        device_id       TEXT NOT NULL,
        bucket_start    TEXT NOT NULL,
        kind            TEXT NOT NULL,
        key             TEXT NOT NULL,
        secs_sum        REAL NOT NULL DEFAULT 0,
        fragment_count  INTEGER NOT NULL DEFAULT 0,
        last_ts         TEXT,
        PRIMARY KEY (account_id, device_id, bucket_start, kind, key)
    );

    CREATE INDEX IF NOT EXISTS idx_usage_1m_lookup
        ON usage_1m (account_id, device_id, bucket_start DESC);

    CREATE TABLE IF NOT EXISTS usage_5m (
        account_id      TEXT NOT NULL,
        device_id       TEXT NOT NULL,
        bucket_start    TEXT NOT NULL,
        kind            TEXT NOT NULL,
        key             TEXT NOT NULL,
        secs_sum        REAL NOT NULL DEFAULT 0,
        fragment_count  INTEGER NOT NULL DEFAULT 0,
        last_ts         TEXT,
        PRIMARY KEY (account_id, device_id, bucket_start, kind, key)
    );

    CREATE INDEX IF NOT EXISTS idx_usage_5m_lookup
        ON usage_5m (account_id, device_id, bucket_start DESC);

    CREATE TABLE IF NOT EXISTS usage_60m (
        account_id      TEXT NOT NULL,
        device_id       TEXT NOT NULL,
        bucket_start    TEXT NOT NULL,
        kind            TEXT NOT NULL,
        key             TEXT NOT NULL,
        secs_sum        REAL NOT NULL DEFAULT 0,
        fragment_count  INTEGER NOT NULL DEFAULT 0,
        last_ts         TEXT,
        PRIMARY KEY (account_id, device_id, bucket_start, kind, key)
    );

    CREATE INDEX IF NOT EXISTS idx_usage_60m_lookup
        ON usage_60m (account_id, device_id, bucket_start DESC);

    -- Stable business keys of every fragment ever aggregated; the safety net
    -- against double counting after the dedup cache evicts an identifier.
    CREATE TABLE IF NOT EXISTS seen_fragments (
        device_id       TEXT NOT NULL,
        event_id        TEXT NOT NULL,
        seen_at         TEXT NOT NULL,
        PRIMARY KEY (device_id, event_id)
    );

    -- Events failing post-ingest validation, isolated from the main pipeline.
    CREATE TABLE IF NOT EXISTS dead_letter (
        id              TEXT PRIMARY KEY,
        device_id       TEXT NOT NULL,
        event_id        TEXT,
        reason          TEXT NOT NULL,
        payload         JSON NOT NULL,
        failed_at       TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_dead_letter_device
        ON dead_letter (device_id, failed_at);
    "#,
];

/// Run any pending migrations on the connection.
pub fn run_migrations(conn: &Connection) -> rusqlite::Result<()> {
    let current: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

    for (index, migration) in MIGRATIONS.iter().enumerate() {
        let version = index as i32 + 1;
        if version <= current {
            continue;
        }
        tracing::info!(version, "Applying rollup schema migration");
        conn.execute_batch(migration)?;
        conn.pragma_update(None, "user_version", version)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_apply_cleanly() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        let version: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0)).unwrap();
        assert_eq!(version, SCHEMA_VERSION);

        // Re-running is a no-op
        run_migrations(&conn).unwrap();
    }
}
