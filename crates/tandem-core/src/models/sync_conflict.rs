//! Sync conflict model

use serde::{Deserialize, Serialize};

/// Which side a recorded conflict kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictWinner {
    Local,
    Remote,
}

impl ConflictWinner {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Remote => "remote",
        }
    }
}

/// Recorded sync conflict resolved by the conflict policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConflict {
    /// Conflict row identifier
    pub id: i64,
    /// Entity type of the record
    pub table: String,
    /// Record involved in the conflict
    pub record_id: String,
    /// Local row's timestamp when the conflict occurred
    pub local_updated_at: i64,
    /// Incoming row's timestamp
    pub incoming_updated_at: i64,
    /// Resolution timestamp (unix ms)
    pub resolved_at: i64,
    /// Resolution strategy name
    pub strategy: String,
    /// Side whose scalar fields were kept
    pub winner: ConflictWinner,
}
