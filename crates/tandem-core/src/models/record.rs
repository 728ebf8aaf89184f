//! Record model

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Error, Result};

/// A globally unique record identifier, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(Uuid);

impl RecordId {
    /// Create a new unique record ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RecordId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Identity of the local writer, compared against realtime origin ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActorId(String);

impl ActorId {
    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into().trim().to_string();
        if value.is_empty() {
            return Err(Error::InvalidInput("Actor id cannot be empty".to_string()));
        }
        Ok(Self(value))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Monotonic sync run token. Later runs compare greater.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SyncRunId(u64);

impl SyncRunId {
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SyncRunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Per-record sync state, the only dirty-detection signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SyncState {
    /// Local state matches the remote as of `synced_at`
    Synced,
    /// Local edits not yet confirmed by the remote
    Pending,
    /// Last push failed; the message is kept for retry affordances
    Failed { message: String },
}

impl SyncState {
    pub const SYNCED_TAG: &'static str = "synced";
    pub const PENDING_TAG: &'static str = "pending";
    pub const FAILED_TAG: &'static str = "failed";

    /// Persisted tag for the `sync_state` column.
    #[must_use]
    pub const fn tag(&self) -> &'static str {
        match self {
            Self::Synced => Self::SYNCED_TAG,
            Self::Pending => Self::PENDING_TAG,
            Self::Failed { .. } => Self::FAILED_TAG,
        }
    }

    /// Error message column value, present only for `Failed`.
    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        match self {
            Self::Failed { message } => Some(message),
            Self::Synced | Self::Pending => None,
        }
    }

    /// Rebuild the state from its persisted columns.
    pub fn from_columns(tag: &str, last_error: Option<String>) -> Result<Self> {
        match tag {
            Self::SYNCED_TAG => Ok(Self::Synced),
            Self::PENDING_TAG => Ok(Self::Pending),
            Self::FAILED_TAG => Ok(Self::Failed {
                message: last_error.unwrap_or_default(),
            }),
            other => Err(Error::InvalidInput(format!("Unknown sync state: {other}"))),
        }
    }

    /// Local edits exist that the remote has not confirmed.
    #[must_use]
    pub const fn is_local_authoritative(&self) -> bool {
        match self {
            Self::Pending | Self::Failed { .. } => true,
            Self::Synced => false,
        }
    }
}

/// A single synchronized entity instance with its sync metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Entity type (remote table name)
    pub table: String,
    /// Unique identifier
    pub id: RecordId,
    /// Business fields, opaque to the coordinator
    pub payload: Map<String, Value>,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Last mutation timestamp (Unix ms)
    pub updated_at: i64,
    /// When this state last matched the remote (Unix ms)
    pub synced_at: Option<i64>,
    /// Dirty-detection state
    pub sync_state: SyncState,
}

impl Record {
    /// A record created locally, waiting for its first push.
    #[must_use]
    pub fn new_local(table: impl Into<String>, payload: Map<String, Value>, now: i64) -> Self {
        Self {
            table: table.into(),
            id: RecordId::new(),
            payload,
            created_at: now,
            updated_at: now,
            synced_at: None,
            sync_state: SyncState::Pending,
        }
    }

    /// String field lookup in the payload.
    #[must_use]
    pub fn field_str(&self, field: &str) -> Option<&str> {
        self.payload.get(field).and_then(Value::as_str)
    }
}
