//! Database migrations

use crate::error::Result;
use rusqlite::Connection;

/// Current schema version
const CURRENT_VERSION: i32 = 4;

/// Run all pending migrations
pub fn run(conn: &mut Connection) -> Result<()> {
    let version = get_version(conn)?;

    if version < 1 {
        migrate(conn, 1, V1)?;
    }
    if version < 2 {
        migrate(conn, 2, V2)?;
    }
    if version < 3 {
        migrate(conn, 3, V3)?;
    }
    if version < 4 {
        migrate(conn, 4, V4)?;
    }

    Ok(())
}

/// Get the current schema version
fn get_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get(0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;
    Ok(version)
}

fn migrate(conn: &mut Connection, version: i32, statements: &str) -> Result<()> {
    let tx = conn.transaction()?;
    tx.execute_batch(statements)?;
    tx.execute(
        "INSERT INTO schema_version (version) VALUES (?)",
        [version],
    )?;
    tx.commit()?;

    tracing::info!("Migrated database to version {version} (latest {CURRENT_VERSION})");
    Ok(())
}

/// Version 1: records table
const V1: &str = "
    CREATE TABLE IF NOT EXISTS schema_version (
        version INTEGER PRIMARY KEY
    );
    CREATE TABLE IF NOT EXISTS records (
        table_name TEXT NOT NULL,
        id TEXT NOT NULL,
        payload TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        synced_at INTEGER,
        sync_state TEXT NOT NULL CHECK (sync_state IN ('synced', 'pending', 'failed')),
        last_sync_error TEXT,
        PRIMARY KEY (table_name, id)
    );
    CREATE INDEX IF NOT EXISTS idx_records_state ON records(table_name, sync_state);
    CREATE INDEX IF NOT EXISTS idx_records_updated ON records(table_name, updated_at DESC);
";

/// Version 2: per-actor down-sync checkpoints
const V2: &str = "
    CREATE TABLE IF NOT EXISTS sync_checkpoints (
        actor_id TEXT NOT NULL,
        table_name TEXT NOT NULL,
        last_synced_at INTEGER NOT NULL,
        PRIMARY KEY (actor_id, table_name)
    );
";

/// Version 3: conflict log
const V3: &str = "
    CREATE TABLE IF NOT EXISTS sync_conflicts (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        table_name TEXT NOT NULL,
        record_id TEXT NOT NULL,
        local_updated_at INTEGER NOT NULL,
        incoming_updated_at INTEGER NOT NULL,
        resolved_at INTEGER NOT NULL,
        strategy TEXT NOT NULL,
        winner TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_sync_conflicts_record ON sync_conflicts(table_name, record_id);
    CREATE INDEX IF NOT EXISTS idx_sync_conflicts_resolved_at ON sync_conflicts(resolved_at DESC);
";

/// Version 4: last payload confirmed by the remote, the base for collection merges
const V4: &str = "
    ALTER TABLE records ADD COLUMN synced_payload TEXT;
    UPDATE records SET synced_payload = payload WHERE sync_state = 'synced';
";

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> Connection {
        Connection::open_in_memory().unwrap()
    }

    #[test]
    fn test_migrations() {
        let mut conn = setup();
        run(&mut conn).unwrap();

        let version = get_version(&conn).unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }

    #[test]
    fn test_migrations_idempotent() {
        let mut conn = setup();
        run(&mut conn).unwrap();
        run(&mut conn).unwrap();

        let version = get_version(&conn).unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }

    #[test]
    fn test_records_reject_unknown_sync_state() {
        let mut conn = setup();
        run(&mut conn).unwrap();

        let result = conn.execute(
            "INSERT INTO records (table_name, id, payload, created_at, updated_at, sync_state)
             VALUES ('tasks', 'a', '{}', 1, 1, 'dirty')",
            [],
        );
        assert!(result.is_err());
    }
}
