//! Local store handle

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rusqlite::{Connection, Transaction};
use serde_json::{Map, Value};
use tokio::sync::Mutex;

use super::migrations;
use super::records::{RecordRepository, SqliteRecordRepository, StateCounts};
use crate::error::{Error, Result};
use crate::models::{
    decode_payload, encode_payload, ActorId, Record, RecordId, SyncConflict, SyncState, Syncable,
};
use crate::util::now_millis;

/// Thread-safe handle to the embedded record store.
///
/// Cloning shares the same connection. The presentation layer reads through
/// this handle directly; sync passes only hold the connection for the
/// duration of one batch.
#[derive(Clone)]
pub struct LocalStore {
    conn: Arc<Mutex<Option<Connection>>>,
    path: Option<PathBuf>,
}

/// One entity-type batch running inside a single transaction.
pub struct StoreBatch<'a> {
    tx: &'a Transaction<'a>,
}

impl StoreBatch<'_> {
    /// Repository bound to the batch transaction.
    pub fn records(&self) -> SqliteRecordRepository<'_> {
        SqliteRecordRepository::new(self.tx)
    }
}

impl LocalStore {
    /// Open a store at the given path, creating it if it doesn't exist
    ///
    /// Runs migrations automatically.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut conn = Connection::open(&path)?;
        configure(&conn)?;
        migrations::run(&mut conn)?;
        tracing::debug!("Opened local store at {}", path.display());

        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
            path: Some(path),
        })
    }

    /// Open an in-memory store (useful for testing)
    pub async fn open_in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        configure(&conn)?;
        migrations::run(&mut conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
            path: None,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run reads or single-statement writes against the connection.
    pub async fn with_repo<T>(
        &self,
        f: impl FnOnce(&SqliteRecordRepository<'_>) -> Result<T>,
    ) -> Result<T> {
        let guard = self.conn.lock().await;
        let conn = guard.as_ref().ok_or(Error::StoreClosed)?;
        f(&SqliteRecordRepository::new(conn))
    }

    /// Run `f` inside one transaction; any error rolls the whole batch back.
    pub async fn apply_batch<T>(
        &self,
        f: impl FnOnce(&StoreBatch<'_>) -> Result<T>,
    ) -> Result<T> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or(Error::StoreClosed)?;
        let tx = conn.transaction()?;
        let value = f(&StoreBatch { tx: &tx })?;
        tx.commit()?;
        Ok(value)
    }

    /// Release the connection. Later calls fail with [`Error::StoreClosed`].
    pub async fn close(&self) -> Result<()> {
        let conn = self.conn.lock().await.take();
        if let Some(conn) = conn {
            conn.close().map_err(|(_, error)| Error::Database(error))?;
            tracing::debug!("Closed local store");
        }
        Ok(())
    }

    pub async fn is_closed(&self) -> bool {
        self.conn.lock().await.is_none()
    }

    /// Create a record locally; it starts `pending`.
    pub async fn insert_local<T: Syncable>(&self, value: &T) -> Result<Record> {
        self.insert_local_payload(T::TABLE, encode_payload(value)?)
            .await
    }

    /// Create an untyped record locally; it starts `pending`.
    pub async fn insert_local_payload(
        &self,
        table: &str,
        payload: Map<String, Value>,
    ) -> Result<Record> {
        let record = Record::new_local(table, payload, now_millis());
        self.with_repo(|repo| repo.put(&record)).await?;
        Ok(record)
    }

    /// Replace a record's business fields and mark it `pending`.
    pub async fn update_local<T: Syncable>(&self, id: &RecordId, value: &T) -> Result<Record> {
        self.update_local_payload(T::TABLE, id, encode_payload(value)?)
            .await
    }

    /// Replace an untyped record's payload and mark it `pending`.
    pub async fn update_local_payload(
        &self,
        table: &str,
        id: &RecordId,
        payload: Map<String, Value>,
    ) -> Result<Record> {
        self.apply_batch(|batch| {
            let repo = batch.records();
            let mut record = repo
                .get(table, id)?
                .ok_or_else(|| Error::NotFound(format!("{table}/{id}")))?;
            record.payload = payload;
            touch(&mut record);
            repo.put(&record)?;
            Ok(record)
        })
        .await
    }

    /// Mark a record dirty without changing its fields, e.g. after a
    /// relationship membership change on the other side.
    pub async fn mark_pending(&self, table: &str, id: &RecordId) -> Result<Record> {
        self.apply_batch(|batch| {
            let repo = batch.records();
            let mut record = repo
                .get(table, id)?
                .ok_or_else(|| Error::NotFound(format!("{table}/{id}")))?;
            touch(&mut record);
            repo.put(&record)?;
            Ok(record)
        })
        .await
    }

    pub async fn get_record(&self, table: &str, id: &RecordId) -> Result<Option<Record>> {
        self.with_repo(|repo| repo.get(table, id)).await
    }

    pub async fn get<T: Syncable>(&self, id: &RecordId) -> Result<Option<T>> {
        self.get_record(T::TABLE, id)
            .await?
            .map(|record| decode_payload(&record.payload))
            .transpose()
    }

    pub async fn list_records(&self, table: &str) -> Result<Vec<Record>> {
        self.with_repo(|repo| repo.list(table)).await
    }

    pub async fn list<T: Syncable>(&self) -> Result<Vec<(RecordId, T)>> {
        self.list_records(T::TABLE)
            .await?
            .into_iter()
            .map(|record| Ok((record.id, decode_payload(&record.payload)?)))
            .collect()
    }

    pub async fn records_in_state(&self, table: &str, state_tag: &str) -> Result<Vec<Record>> {
        self.with_repo(|repo| repo.list_in_state(table, state_tag))
            .await
    }

    /// Failed records across all tables, for retry affordances.
    pub async fn failed_records(&self) -> Result<Vec<Record>> {
        self.with_repo(|repo| repo.list_failed()).await
    }

    pub async fn counts_by_state(&self) -> Result<Vec<StateCounts>> {
        self.with_repo(|repo| repo.counts_by_state()).await
    }

    pub async fn checkpoint(&self, actor: &ActorId, table: &str) -> Result<Option<i64>> {
        self.with_repo(|repo| repo.checkpoint(actor.as_str(), table))
            .await
    }

    pub async fn clear_checkpoints(&self, actor: &ActorId) -> Result<usize> {
        self.with_repo(|repo| repo.clear_checkpoints(actor.as_str()))
            .await
    }

    pub async fn list_conflicts(&self, limit: usize) -> Result<Vec<SyncConflict>> {
        self.with_repo(|repo| repo.list_conflicts(limit)).await
    }
}

/// Advance `updated_at` monotonically and mark the record dirty.
fn touch(record: &mut Record) {
    record.updated_at = now_millis().max(record.updated_at + 1);
    record.sync_state = SyncState::Pending;
}

/// Configure `SQLite` for local-first access
fn configure(conn: &Connection) -> Result<()> {
    // In-memory databases report "memory" here; the pragma result is not needed.
    conn.query_row("PRAGMA journal_mode = WAL;", [], |_| Ok(()))
        .ok();
    conn.execute_batch(
        "PRAGMA synchronous = NORMAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;",
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Listing {
        title: String,
    }

    impl Syncable for Listing {
        const TABLE: &'static str = "listings";
    }

    #[tokio::test]
    async fn test_insert_local_starts_pending() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let record = store
            .insert_local(&Listing {
                title: "Loft".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(record.sync_state, SyncState::Pending);
        let fetched: Listing = store.get(&record.id).await.unwrap().unwrap();
        assert_eq!(fetched.title, "Loft");
    }

    #[tokio::test]
    async fn test_update_local_bumps_updated_at_monotonically() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let record = store
            .insert_local(&Listing {
                title: "Loft".to_string(),
            })
            .await
            .unwrap();

        let first = store
            .update_local(
                &record.id,
                &Listing {
                    title: "Studio".to_string(),
                },
            )
            .await
            .unwrap();
        let second = store.mark_pending("listings", &record.id).await.unwrap();

        assert!(first.updated_at > record.updated_at);
        assert!(second.updated_at > first.updated_at);
        assert_eq!(second.sync_state, SyncState::Pending);
    }

    #[tokio::test]
    async fn test_update_missing_record_is_not_found() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let result = store.mark_pending("listings", &RecordId::new()).await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_failed_batch_rolls_back() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let record = Record::new_local("listings", Map::new(), 10);

        let result: Result<()> = store
            .apply_batch(|batch| {
                batch.records().put(&record)?;
                Err(Error::InvalidInput("boom".to_string()))
            })
            .await;

        assert!(result.is_err());
        assert!(store
            .get_record("listings", &record.id)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_close_releases_handle() {
        let store = LocalStore::open_in_memory().await.unwrap();
        store.close().await.unwrap();
        assert!(store.is_closed().await);
        assert!(matches!(
            store.list_records("listings").await,
            Err(Error::StoreClosed)
        ));
    }

    #[tokio::test]
    async fn test_open_on_disk_creates_parent_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("tandem.db");
        let store = LocalStore::open(&path).await.unwrap();
        assert_eq!(store.path(), Some(path.as_path()));
        assert!(path.exists());
    }
}
