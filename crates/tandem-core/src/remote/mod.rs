//! Tabular read/write/subscribe API over the hosted backend.

mod memory;
mod postgrest;
mod realtime_socket;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::models::{Record, RecordId, SyncState};
use crate::util::millis_to_datetime;
use crate::version::VersionPolicy;

pub use memory::{InMemoryRemote, RemoteCall};
pub use postgrest::PostgrestRemote;
pub(crate) use postgrest::ensure_success;

/// Errors from the remote backend.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("Invalid remote configuration: {0}")]
    Configuration(String),
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Remote API error: {message} (HTTP {status})")]
    Status { status: u16, message: String },
    #[error("Realtime channel error: {0}")]
    Realtime(String),
    #[error("Invalid remote payload: {0}")]
    Decode(String),
    #[error("Remote unavailable: {0}")]
    Unavailable(String),
}

impl RemoteError {
    /// Whether backing off and retrying may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(error) => error.is_timeout() || error.is_connect() || error.is_request(),
            Self::Status { status, .. } => matches!(status, 408 | 425 | 429 | 500..=599),
            Self::Realtime(_) | Self::Unavailable(_) => true,
            Self::Configuration(_) | Self::Decode(_) => false,
        }
    }
}

pub type RemoteResult<T> = Result<T, RemoteError>;

/// Raw realtime frames; decoding and version checks belong to the listener.
pub type RealtimeStream = BoxStream<'static, RemoteResult<Value>>;

/// Row filter for `select`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteFilter {
    All,
    /// Rows with `updated_at` strictly greater than the timestamp (Unix ms)
    UpdatedAfter(i64),
}

impl RemoteFilter {
    #[must_use]
    pub const fn from_checkpoint(checkpoint: Option<i64>) -> Self {
        match checkpoint {
            Some(millis) => Self::UpdatedAfter(millis),
            None => Self::All,
        }
    }

    #[must_use]
    pub fn matches(&self, row: &RemoteRow) -> bool {
        match self {
            Self::All => true,
            Self::UpdatedAfter(millis) => row.updated_at_millis() > *millis,
        }
    }
}

/// One remote row: coordinator-owned columns plus flattened business fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRow {
    pub id: RecordId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl RemoteRow {
    #[must_use]
    pub fn from_record(record: &Record) -> Self {
        Self {
            id: record.id,
            created_at: millis_to_datetime(record.created_at),
            updated_at: millis_to_datetime(record.updated_at),
            fields: record.payload.clone(),
        }
    }

    /// Materialize the row as a local record confirmed at `synced_at`.
    #[must_use]
    pub fn to_record(&self, table: &str, synced_at: i64) -> Record {
        Record {
            table: table.to_string(),
            id: self.id,
            payload: self.fields.clone(),
            created_at: self.created_at_millis(),
            updated_at: self.updated_at_millis(),
            synced_at: Some(synced_at),
            sync_state: SyncState::Synced,
        }
    }

    /// Whether the local record already holds exactly this remote version.
    #[must_use]
    pub fn matches_record(&self, record: &Record) -> bool {
        record.sync_state == SyncState::Synced
            && record.updated_at == self.updated_at_millis()
            && record.payload == self.fields
    }

    #[must_use]
    pub fn created_at_millis(&self) -> i64 {
        self.created_at.timestamp_millis()
    }

    #[must_use]
    pub fn updated_at_millis(&self) -> i64 {
        self.updated_at.timestamp_millis()
    }
}

/// Acknowledgement for an idempotent upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertAck {
    pub rows: usize,
}

/// Per-entity-type access to the hosted backend.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Fetch rows of `table` matching `filter`, oldest `updated_at` first.
    async fn select(&self, table: &str, filter: RemoteFilter) -> RemoteResult<Vec<RemoteRow>>;

    /// Insert or update rows by primary key.
    async fn upsert(&self, table: &str, rows: &[RemoteRow]) -> RemoteResult<UpsertAck>;

    /// Open the realtime broadcast channel for `topic`.
    async fn subscribe(&self, topic: &str) -> RemoteResult<RealtimeStream>;

    /// Server-held version requirements for a client platform.
    async fn version_policy(&self, platform: &str) -> RemoteResult<VersionPolicy>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Record;

    #[test]
    fn test_transient_classification() {
        let status = |status| RemoteError::Status {
            status,
            message: String::new(),
        };
        assert!(status(503).is_transient());
        assert!(status(429).is_transient());
        assert!(!status(409).is_transient());
        assert!(!RemoteError::Decode("bad".to_string()).is_transient());
        assert!(RemoteError::Unavailable("offline".to_string()).is_transient());
    }

    #[test]
    fn test_remote_row_flattens_payload() {
        let mut payload = Map::new();
        payload.insert("title".to_string(), Value::from("Loft"));
        let record = Record::new_local("listings", payload, 1_700_000_000_000);

        let row = RemoteRow::from_record(&record);
        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["title"], "Loft");
        assert_eq!(json["id"], record.id.as_str());

        let parsed: RemoteRow = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.updated_at_millis(), record.updated_at);
        assert_eq!(parsed.fields.get("title"), Some(&Value::from("Loft")));
        assert!(!parsed.fields.contains_key("id"));
    }

    #[test]
    fn test_filter_from_checkpoint() {
        assert_eq!(RemoteFilter::from_checkpoint(None), RemoteFilter::All);
        assert_eq!(
            RemoteFilter::from_checkpoint(Some(5)),
            RemoteFilter::UpdatedAfter(5)
        );
    }
}
