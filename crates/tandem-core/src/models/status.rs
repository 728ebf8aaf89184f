//! Sync status and run reports published to observers.

use serde::Serialize;

use super::record::SyncRunId;

/// Coordinator status as seen by the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SyncStatus {
    #[default]
    Idle,
    Syncing {
        run_id: SyncRunId,
    },
    Ok {
        run_id: SyncRunId,
        /// Completion time (Unix ms)
        at: i64,
    },
    Error {
        run_id: SyncRunId,
        message: String,
    },
}

impl SyncStatus {
    /// Run this status describes, if any.
    #[must_use]
    pub const fn run_id(&self) -> Option<SyncRunId> {
        match self {
            Self::Idle => None,
            Self::Syncing { run_id } | Self::Ok { run_id, .. } | Self::Error { run_id, .. } => {
                Some(*run_id)
            }
        }
    }

    /// True when `self` comes from a run older than `other`.
    #[must_use]
    pub fn is_superseded_by(&self, other: &Self) -> bool {
        match (self.run_id(), other.run_id()) {
            (Some(mine), Some(theirs)) => mine < theirs,
            _ => false,
        }
    }
}

/// What kind of pass a run performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Down-sync from the checkpoint, then push pending records
    Incremental,
    /// Down-sync everything with orphan reconciliation, then push pending
    Full,
    /// Push failed records only
    RetryFailed,
}

/// Per-entity-type counters for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TableReport {
    pub table: String,
    pub fetched: usize,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Remote versions skipped because the local record was authoritative
    pub kept_local: usize,
    /// Remote rows whose fields do not decode as this entity type
    pub rejected: usize,
    pub orphans_deleted: usize,
    pub pushed: usize,
    pub failed: usize,
    /// Children held back because their parent is not synced yet
    pub deferred: usize,
    /// Type-level failure that aborted this type's batch
    pub error: Option<String>,
}

impl TableReport {
    #[must_use]
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Self::default()
        }
    }
}

/// Outcome of one sync run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub run_id: SyncRunId,
    pub mode: SyncMode,
    pub started_at: i64,
    pub finished_at: i64,
    pub down: Vec<TableReport>,
    pub up: Vec<TableReport>,
}

impl SyncReport {
    #[must_use]
    pub const fn new(run_id: SyncRunId, mode: SyncMode, started_at: i64) -> Self {
        Self {
            run_id,
            mode,
            started_at,
            finished_at: started_at,
            down: Vec::new(),
            up: Vec::new(),
        }
    }

    /// Type-level errors across both directions.
    pub fn errors(&self) -> Vec<String> {
        self.down
            .iter()
            .chain(&self.up)
            .filter_map(|report| {
                report
                    .error
                    .as_ref()
                    .map(|error| format!("{}: {error}", report.table))
            })
            .collect()
    }

    /// Records whose push failed in this run.
    pub fn failed_records(&self) -> usize {
        self.up.iter().map(|report| report.failed).sum()
    }

    pub fn pushed_records(&self) -> usize {
        self.up.iter().map(|report| report.pushed).sum()
    }

    pub fn down_table(&self, table: &str) -> Option<&TableReport> {
        self.down.iter().find(|report| report.table == table)
    }

    pub fn up_table(&self, table: &str) -> Option<&TableReport> {
        self.up.iter().find(|report| report.table == table)
    }

    /// Human-readable summary used for the `Error` status.
    pub fn error_summary(&self) -> Option<String> {
        let errors = self.errors();
        let failed = self.failed_records();
        match (errors.is_empty(), failed) {
            (true, 0) => None,
            (true, failed) => Some(format!("{failed} record(s) failed to sync")),
            (false, 0) => Some(errors.join("; ")),
            (false, failed) => Some(format!(
                "{}; {failed} record(s) failed to sync",
                errors.join("; ")
            )),
        }
    }
}
