//! Up-sync: push locally modified records to the remote.

use std::collections::HashSet;
use std::slice;
use std::sync::Arc;

use super::{is_fatal, with_retry, RunContext};
use crate::config::RetryPolicy;
use crate::error::{Error, Result};
use crate::models::{
    EntityHandler, Record, RecordId, SyncMode, SyncSchema, SyncState, TableReport,
};
use crate::remote::{RemoteClient, RemoteRow};
use crate::store::{LocalStore, RecordRepository};
use crate::util::now_millis;

enum PushOutcome {
    Pushed { id: RecordId, version: i64 },
    Failed { id: RecordId, version: i64, message: String },
}

/// Pushes pending (or failed, when retrying) records of owned types in
/// dependency order, one record per upsert so failures stay isolated.
#[derive(Clone)]
pub struct UpSync {
    store: LocalStore,
    remote: Arc<dyn RemoteClient>,
    schema: SyncSchema,
    retry: RetryPolicy,
}

impl UpSync {
    pub fn new(
        store: LocalStore,
        remote: Arc<dyn RemoteClient>,
        schema: SyncSchema,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            remote,
            schema,
            retry,
        }
    }

    pub async fn run(&self, ctx: &RunContext) -> Result<Vec<TableReport>> {
        let mut reports = Vec::new();
        for handler in self.schema.up_order() {
            ctx.ensure_active()?;
            let table = handler.table();
            match self.push_type(ctx, handler.as_ref()).await {
                Ok(report) => reports.push(report),
                Err(error) if is_fatal(&error) => return Err(error),
                Err(error) => {
                    tracing::warn!(run_id = %ctx.run_id, table, "Up-sync failed: {error}");
                    let mut report = TableReport::new(table);
                    report.error = Some(error.to_string());
                    reports.push(report);
                }
            }
        }
        Ok(reports)
    }

    async fn push_type(&self, ctx: &RunContext, handler: &dyn EntityHandler) -> Result<TableReport> {
        let table = handler.table();
        let state_tag = match ctx.mode {
            SyncMode::RetryFailed => SyncState::FAILED_TAG,
            SyncMode::Incremental | SyncMode::Full => SyncState::PENDING_TAG,
        };
        let mut candidates = self.store.records_in_state(table, state_tag).await?;
        candidates.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

        let mut report = TableReport::new(table);
        let mut outcomes = Vec::with_capacity(candidates.len());
        let mut pushed_here = HashSet::new();
        let mut cancelled = false;

        for record in candidates {
            if ctx.cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            if let Some(parent) = self.unsynced_parent(handler, &record, &pushed_here).await? {
                tracing::debug!(
                    run_id = %ctx.run_id,
                    table,
                    record_id = %record.id,
                    parent = %parent,
                    "Deferring record until its parent is synced"
                );
                report.deferred += 1;
                continue;
            }

            let row = RemoteRow::from_record(&record);
            let result = with_retry(&self.retry, ctx, &format!("upsert {table}"), || {
                self.remote.upsert(table, slice::from_ref(&row))
            })
            .await;

            match result {
                Ok(_) => {
                    pushed_here.insert(record.id);
                    outcomes.push(PushOutcome::Pushed {
                        id: record.id,
                        version: record.updated_at,
                    });
                }
                Err(Error::Cancelled) => {
                    cancelled = true;
                    break;
                }
                Err(error) => {
                    tracing::warn!(run_id = %ctx.run_id, table, record_id = %record.id, "Push failed: {error}");
                    outcomes.push(PushOutcome::Failed {
                        id: record.id,
                        version: record.updated_at,
                        message: error.to_string(),
                    });
                }
            }
        }

        let now = now_millis();
        let report = self
            .store
            .apply_batch(|batch| {
                let repo = batch.records();
                for outcome in &outcomes {
                    match outcome {
                        PushOutcome::Pushed { id, version } => {
                            report.pushed += 1;
                            if !repo.mark_synced_if_unchanged(table, id, *version, now)? {
                                tracing::debug!(table, record_id = %id, "Record changed during push; it stays pending");
                            }
                        }
                        PushOutcome::Failed {
                            id,
                            version,
                            message,
                        } => {
                            report.failed += 1;
                            repo.mark_failed_if_unchanged(table, id, *version, message)?;
                        }
                    }
                }
                Ok(report)
            })
            .await?;

        if cancelled {
            return Err(Error::Cancelled);
        }
        tracing::info!(
            run_id = %ctx.run_id,
            table,
            pushed = report.pushed,
            failed = report.failed,
            deferred = report.deferred,
            "Up-synced entity type"
        );
        Ok(report)
    }

    /// First referenced parent that exists locally but is not synced yet.
    ///
    /// A parent missing locally is assumed to exist remotely; the backend's
    /// own constraints reject the push otherwise.
    async fn unsynced_parent(
        &self,
        handler: &dyn EntityHandler,
        record: &Record,
        pushed_here: &HashSet<RecordId>,
    ) -> Result<Option<RecordId>> {
        for reference in handler.references() {
            let Some(parent_id) = record
                .field_str(reference.field)
                .and_then(|value| value.parse::<RecordId>().ok())
            else {
                continue;
            };
            if reference.table == handler.table() && pushed_here.contains(&parent_id) {
                continue;
            }
            let parent = self.store.get_record(reference.table, &parent_id).await?;
            if parent.is_some_and(|parent| parent.sync_state != SyncState::Synced) {
                return Ok(Some(parent_id));
            }
        }
        Ok(None)
    }
}
