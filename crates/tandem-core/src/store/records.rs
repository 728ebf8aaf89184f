//! Record repository implementation

use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::models::{ConflictWinner, Record, RecordId, SyncConflict, SyncState};

const RECORD_COLUMNS: &str =
    "table_name, id, payload, created_at, updated_at, synced_at, sync_state, last_sync_error";

/// Sync-state counts for one entity type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateCounts {
    pub table: String,
    pub synced: usize,
    pub pending: usize,
    pub failed: usize,
}

/// Trait for record storage operations
pub trait RecordRepository {
    /// Get a record by table and ID
    fn get(&self, table: &str, id: &RecordId) -> Result<Option<Record>>;

    /// List all records of a table, newest first
    fn list(&self, table: &str) -> Result<Vec<Record>>;

    /// List records of a table in the given sync state
    fn list_in_state(&self, table: &str, state_tag: &str) -> Result<Vec<Record>>;

    /// List failed records across all tables
    fn list_failed(&self) -> Result<Vec<Record>>;

    /// Insert or fully replace a record
    fn put(&self, record: &Record) -> Result<()>;

    /// Payload as last confirmed by the remote, if the record was ever synced
    fn synced_payload(&self, table: &str, id: &RecordId) -> Result<Option<Map<String, Value>>>;

    /// Delete a record, returning whether it existed
    fn delete(&self, table: &str, id: &RecordId) -> Result<bool>;

    /// Set `synced` when the row is still at `expected_updated_at`; the
    /// current payload becomes the synced base
    fn mark_synced_if_unchanged(
        &self,
        table: &str,
        id: &RecordId,
        expected_updated_at: i64,
        synced_at: i64,
    ) -> Result<bool>;

    /// Set `failed` when the row is still at `expected_updated_at`
    fn mark_failed_if_unchanged(
        &self,
        table: &str,
        id: &RecordId,
        expected_updated_at: i64,
        message: &str,
    ) -> Result<bool>;

    /// Count records per table and sync state
    fn counts_by_state(&self) -> Result<Vec<StateCounts>>;

    /// Read the down-sync checkpoint for an actor and table
    fn checkpoint(&self, actor_id: &str, table: &str) -> Result<Option<i64>>;

    /// Move the checkpoint forward (never backwards)
    fn advance_checkpoint(&self, actor_id: &str, table: &str, synced_at: i64) -> Result<()>;

    /// Drop every checkpoint for an actor
    fn clear_checkpoints(&self, actor_id: &str) -> Result<usize>;

    /// Append a resolved conflict to the log
    fn log_conflict(&self, conflict: &NewConflict<'_>) -> Result<()>;

    /// List recently resolved conflicts, newest first
    fn list_conflicts(&self, limit: usize) -> Result<Vec<SyncConflict>>;
}

/// Conflict row to be appended to the log.
#[derive(Debug, Clone)]
pub struct NewConflict<'a> {
    pub table: &'a str,
    pub record_id: &'a RecordId,
    pub local_updated_at: i64,
    pub incoming_updated_at: i64,
    pub resolved_at: i64,
    pub strategy: &'a str,
    pub winner: ConflictWinner,
}

/// `SQLite` implementation of `RecordRepository`
///
/// Works on a plain connection or, through deref, on an open transaction.
pub struct SqliteRecordRepository<'a> {
    conn: &'a Connection,
}

struct RecordRow {
    table: String,
    id: String,
    payload: String,
    created_at: i64,
    updated_at: i64,
    synced_at: Option<i64>,
    sync_state: String,
    last_sync_error: Option<String>,
}

impl TryFrom<RecordRow> for Record {
    type Error = Error;

    fn try_from(row: RecordRow) -> Result<Self> {
        let id = row
            .id
            .parse()
            .map_err(|_| Error::InvalidInput(format!("Invalid record ID: {}", row.id)))?;
        let payload: Map<String, Value> = serde_json::from_str(&row.payload)?;
        Ok(Self {
            table: row.table,
            id,
            payload,
            created_at: row.created_at,
            updated_at: row.updated_at,
            synced_at: row.synced_at,
            sync_state: SyncState::from_columns(&row.sync_state, row.last_sync_error)?,
        })
    }
}

impl<'a> SqliteRecordRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RecordRow> {
        Ok(RecordRow {
            table: row.get(0)?,
            id: row.get(1)?,
            payload: row.get(2)?,
            created_at: row.get(3)?,
            updated_at: row.get(4)?,
            synced_at: row.get(5)?,
            sync_state: row.get(6)?,
            last_sync_error: row.get(7)?,
        })
    }

    fn query_records(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<Record>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt
            .query_map(params, Self::parse_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(Record::try_from).collect()
    }
}

impl RecordRepository for SqliteRecordRepository<'_> {
    fn get(&self, table: &str, id: &RecordId) -> Result<Option<Record>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {RECORD_COLUMNS} FROM records WHERE table_name = ? AND id = ?"),
                params![table, id.as_str()],
                Self::parse_row,
            )
            .optional()?;
        row.map(Record::try_from).transpose()
    }

    fn list(&self, table: &str) -> Result<Vec<Record>> {
        self.query_records(
            &format!(
                "SELECT {RECORD_COLUMNS} FROM records WHERE table_name = ? ORDER BY updated_at DESC"
            ),
            params![table],
        )
    }

    fn list_in_state(&self, table: &str, state_tag: &str) -> Result<Vec<Record>> {
        self.query_records(
            &format!(
                "SELECT {RECORD_COLUMNS} FROM records
                 WHERE table_name = ? AND sync_state = ?
                 ORDER BY updated_at ASC"
            ),
            params![table, state_tag],
        )
    }

    fn list_failed(&self) -> Result<Vec<Record>> {
        self.query_records(
            &format!(
                "SELECT {RECORD_COLUMNS} FROM records
                 WHERE sync_state = ?
                 ORDER BY table_name ASC, updated_at ASC"
            ),
            params![SyncState::FAILED_TAG],
        )
    }

    fn put(&self, record: &Record) -> Result<()> {
        let payload = serde_json::to_string(&record.payload)?;
        // Only a synced write moves the base; local edits keep the old one.
        let synced_payload = (record.sync_state == SyncState::Synced).then_some(payload.as_str());
        self.conn.execute(
            &format!(
                "INSERT INTO records ({RECORD_COLUMNS}, synced_payload)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(table_name, id) DO UPDATE SET
                    payload = excluded.payload,
                    created_at = excluded.created_at,
                    updated_at = excluded.updated_at,
                    synced_at = excluded.synced_at,
                    sync_state = excluded.sync_state,
                    last_sync_error = excluded.last_sync_error,
                    synced_payload = COALESCE(excluded.synced_payload, records.synced_payload)"
            ),
            params![
                record.table,
                record.id.as_str(),
                payload,
                record.created_at,
                record.updated_at,
                record.synced_at,
                record.sync_state.tag(),
                record.sync_state.last_error(),
                synced_payload,
            ],
        )?;
        Ok(())
    }

    fn synced_payload(&self, table: &str, id: &RecordId) -> Result<Option<Map<String, Value>>> {
        let raw: Option<Option<String>> = self
            .conn
            .query_row(
                "SELECT synced_payload FROM records WHERE table_name = ? AND id = ?",
                params![table, id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        raw.flatten()
            .map(|payload| serde_json::from_str(&payload).map_err(Error::from))
            .transpose()
    }

    fn delete(&self, table: &str, id: &RecordId) -> Result<bool> {
        let rows = self.conn.execute(
            "DELETE FROM records WHERE table_name = ? AND id = ?",
            params![table, id.as_str()],
        )?;
        Ok(rows > 0)
    }

    fn mark_synced_if_unchanged(
        &self,
        table: &str,
        id: &RecordId,
        expected_updated_at: i64,
        synced_at: i64,
    ) -> Result<bool> {
        let rows = self.conn.execute(
            "UPDATE records
             SET sync_state = 'synced', synced_at = ?, last_sync_error = NULL,
                 synced_payload = payload
             WHERE table_name = ? AND id = ? AND updated_at = ?",
            params![synced_at, table, id.as_str(), expected_updated_at],
        )?;
        Ok(rows > 0)
    }

    fn mark_failed_if_unchanged(
        &self,
        table: &str,
        id: &RecordId,
        expected_updated_at: i64,
        message: &str,
    ) -> Result<bool> {
        let rows = self.conn.execute(
            "UPDATE records
             SET sync_state = 'failed', last_sync_error = ?
             WHERE table_name = ? AND id = ? AND updated_at = ?",
            params![message, table, id.as_str(), expected_updated_at],
        )?;
        Ok(rows > 0)
    }

    fn counts_by_state(&self) -> Result<Vec<StateCounts>> {
        let mut stmt = self.conn.prepare(
            "SELECT table_name,
                    SUM(sync_state = 'synced'),
                    SUM(sync_state = 'pending'),
                    SUM(sync_state = 'failed')
             FROM records
             GROUP BY table_name
             ORDER BY table_name ASC",
        )?;

        let counts = stmt
            .query_map([], |row| {
                Ok(StateCounts {
                    table: row.get(0)?,
                    synced: row.get(1)?,
                    pending: row.get(2)?,
                    failed: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(counts)
    }

    fn checkpoint(&self, actor_id: &str, table: &str) -> Result<Option<i64>> {
        Ok(self
            .conn
            .query_row(
                "SELECT last_synced_at FROM sync_checkpoints WHERE actor_id = ? AND table_name = ?",
                params![actor_id, table],
                |row| row.get(0),
            )
            .optional()?)
    }

    fn advance_checkpoint(&self, actor_id: &str, table: &str, synced_at: i64) -> Result<()> {
        self.conn.execute(
            "INSERT INTO sync_checkpoints (actor_id, table_name, last_synced_at)
             VALUES (?, ?, ?)
             ON CONFLICT(actor_id, table_name)
             DO UPDATE SET last_synced_at = MAX(last_synced_at, excluded.last_synced_at)",
            params![actor_id, table, synced_at],
        )?;
        Ok(())
    }

    fn clear_checkpoints(&self, actor_id: &str) -> Result<usize> {
        Ok(self.conn.execute(
            "DELETE FROM sync_checkpoints WHERE actor_id = ?",
            params![actor_id],
        )?)
    }

    fn log_conflict(&self, conflict: &NewConflict<'_>) -> Result<()> {
        self.conn.execute(
            "INSERT INTO sync_conflicts (
                table_name, record_id, local_updated_at, incoming_updated_at,
                resolved_at, strategy, winner
             ) VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                conflict.table,
                conflict.record_id.as_str(),
                conflict.local_updated_at,
                conflict.incoming_updated_at,
                conflict.resolved_at,
                conflict.strategy,
                conflict.winner.as_str(),
            ],
        )?;
        Ok(())
    }

    #[allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT
    fn list_conflicts(&self, limit: usize) -> Result<Vec<SyncConflict>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, table_name, record_id, local_updated_at, incoming_updated_at,
                    resolved_at, strategy, winner
             FROM sync_conflicts
             ORDER BY resolved_at DESC, id DESC
             LIMIT ?",
        )?;

        let conflicts = stmt
            .query_map(params![limit as i64], |row| {
                let winner: String = row.get(7)?;
                Ok(SyncConflict {
                    id: row.get(0)?,
                    table: row.get(1)?,
                    record_id: row.get(2)?,
                    local_updated_at: row.get(3)?,
                    incoming_updated_at: row.get(4)?,
                    resolved_at: row.get(5)?,
                    strategy: row.get(6)?,
                    winner: if winner == "remote" {
                        ConflictWinner::Remote
                    } else {
                        ConflictWinner::Local
                    },
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(conflicts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::migrations;

    fn setup() -> Connection {
        let mut conn = Connection::open_in_memory().unwrap();
        migrations::run(&mut conn).unwrap();
        conn
    }

    fn sample(table: &str, state: SyncState) -> Record {
        let mut payload = Map::new();
        payload.insert("title".to_string(), Value::from("hello"));
        let mut record = Record::new_local(table, payload, 1_000);
        record.sync_state = state;
        record
    }

    #[test]
    fn test_put_and_get() {
        let conn = setup();
        let repo = SqliteRecordRepository::new(&conn);

        let record = sample("tasks", SyncState::Pending);
        repo.put(&record).unwrap();

        let fetched = repo.get("tasks", &record.id).unwrap().unwrap();
        assert_eq!(fetched, record);
        assert!(repo.get("listings", &record.id).unwrap().is_none());
    }

    #[test]
    fn test_failed_state_keeps_message() {
        let conn = setup();
        let repo = SqliteRecordRepository::new(&conn);

        let record = sample("tasks", SyncState::Pending);
        repo.put(&record).unwrap();
        assert!(repo
            .mark_failed_if_unchanged("tasks", &record.id, record.updated_at, "HTTP 500")
            .unwrap());

        let failed = repo.list_failed().unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].sync_state.last_error(), Some("HTTP 500"));
    }

    #[test]
    fn test_mark_synced_requires_unchanged_version() {
        let conn = setup();
        let repo = SqliteRecordRepository::new(&conn);

        let record = sample("tasks", SyncState::Pending);
        repo.put(&record).unwrap();

        assert!(!repo
            .mark_synced_if_unchanged("tasks", &record.id, record.updated_at + 1, 2_000)
            .unwrap());
        assert_eq!(
            repo.get("tasks", &record.id).unwrap().unwrap().sync_state,
            SyncState::Pending
        );

        assert!(repo
            .mark_synced_if_unchanged("tasks", &record.id, record.updated_at, 2_000)
            .unwrap());
        let synced = repo.get("tasks", &record.id).unwrap().unwrap();
        assert_eq!(synced.sync_state, SyncState::Synced);
        assert_eq!(synced.synced_at, Some(2_000));
    }

    #[test]
    fn test_local_edits_keep_the_synced_base() {
        let conn = setup();
        let repo = SqliteRecordRepository::new(&conn);

        let mut record = sample("tasks", SyncState::Synced);
        repo.put(&record).unwrap();
        let base = record.payload.clone();
        assert_eq!(repo.synced_payload("tasks", &record.id).unwrap(), Some(base.clone()));

        record.payload.insert("title".to_string(), Value::from("edited"));
        record.updated_at += 1;
        record.sync_state = SyncState::Pending;
        repo.put(&record).unwrap();
        assert_eq!(repo.synced_payload("tasks", &record.id).unwrap(), Some(base));

        assert!(repo
            .mark_synced_if_unchanged("tasks", &record.id, record.updated_at, 3_000)
            .unwrap());
        assert_eq!(
            repo.synced_payload("tasks", &record.id).unwrap(),
            Some(record.payload)
        );
    }

    #[test]
    fn test_never_synced_record_has_no_base() {
        let conn = setup();
        let repo = SqliteRecordRepository::new(&conn);

        let record = sample("tasks", SyncState::Pending);
        repo.put(&record).unwrap();
        assert_eq!(repo.synced_payload("tasks", &record.id).unwrap(), None);
        assert_eq!(repo.synced_payload("tasks", &RecordId::new()).unwrap(), None);
    }

    #[test]
    fn test_counts_by_state() {
        let conn = setup();
        let repo = SqliteRecordRepository::new(&conn);

        repo.put(&sample("tasks", SyncState::Pending)).unwrap();
        repo.put(&sample("tasks", SyncState::Synced)).unwrap();
        repo.put(&sample("tasks", SyncState::Synced)).unwrap();
        repo.put(&sample("listings", SyncState::Synced)).unwrap();

        let counts = repo.counts_by_state().unwrap();
        assert_eq!(counts.len(), 2);
        let tasks = counts.iter().find(|count| count.table == "tasks").unwrap();
        assert_eq!((tasks.synced, tasks.pending, tasks.failed), (2, 1, 0));
    }

    #[test]
    fn test_checkpoint_never_moves_backwards() {
        let conn = setup();
        let repo = SqliteRecordRepository::new(&conn);

        assert_eq!(repo.checkpoint("actor", "tasks").unwrap(), None);
        repo.advance_checkpoint("actor", "tasks", 500).unwrap();
        repo.advance_checkpoint("actor", "tasks", 300).unwrap();
        assert_eq!(repo.checkpoint("actor", "tasks").unwrap(), Some(500));

        assert_eq!(repo.clear_checkpoints("actor").unwrap(), 1);
        assert_eq!(repo.checkpoint("actor", "tasks").unwrap(), None);
    }

    #[test]
    fn test_conflict_log_roundtrip() {
        let conn = setup();
        let repo = SqliteRecordRepository::new(&conn);
        let id = RecordId::new();

        repo.log_conflict(&NewConflict {
            table: "tasks",
            record_id: &id,
            local_updated_at: 10,
            incoming_updated_at: 20,
            resolved_at: 30,
            strategy: "local-authoritative",
            winner: ConflictWinner::Local,
        })
        .unwrap();

        let conflicts = repo.list_conflicts(10).unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].record_id, id.as_str());
        assert_eq!(conflicts[0].winner, ConflictWinner::Local);
    }
}
