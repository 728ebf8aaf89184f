//! Down-sync: pull remote changes into the local store.

use std::collections::HashSet;
use std::sync::Arc;

use super::{is_fatal, with_retry, RunContext};
use crate::config::RetryPolicy;
use crate::conflict::{ConflictPolicy, Resolution};
use crate::error::Result;
use crate::models::{
    ActorId, ConflictWinner, EntityHandler, RecordId, SyncMode, SyncSchema, SyncState, TableReport,
};
use crate::remote::{RemoteClient, RemoteFilter, RemoteRow};
use crate::store::{LocalStore, NewConflict, RecordRepository, SqliteRecordRepository};
use crate::util::now_millis;

/// Pulls rows type by type in dependency order and applies them under the
/// conflict policy, one transaction per type.
#[derive(Clone)]
pub struct DownSync {
    store: LocalStore,
    remote: Arc<dyn RemoteClient>,
    schema: SyncSchema,
    actor: ActorId,
    policy: Arc<dyn ConflictPolicy>,
    retry: RetryPolicy,
}

impl DownSync {
    pub fn new(
        store: LocalStore,
        remote: Arc<dyn RemoteClient>,
        schema: SyncSchema,
        actor: ActorId,
        policy: Arc<dyn ConflictPolicy>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            remote,
            schema,
            actor,
            policy,
            retry,
        }
    }

    /// Run one down-sync pass.
    ///
    /// A failure in one type is recorded on its report and later types
    /// still run. Only cancellation and a closed store abort the pass.
    pub async fn run(&self, ctx: &RunContext) -> Result<Vec<TableReport>> {
        let full = ctx.mode == SyncMode::Full;
        let mut reports = Vec::new();
        let mut complete_sets = Vec::new();

        for handler in self.schema.down_order() {
            ctx.ensure_active()?;
            let table = handler.table();
            match self.pull_type(ctx, handler.as_ref(), full).await {
                Ok((report, remote_ids)) => {
                    if full && handler.reconcile_orphans() {
                        complete_sets.push((reports.len(), Arc::clone(&handler), remote_ids));
                    }
                    reports.push(report);
                }
                Err(error) if is_fatal(&error) => return Err(error),
                Err(error) => {
                    tracing::warn!(run_id = %ctx.run_id, table, "Down-sync failed: {error}");
                    let mut report = TableReport::new(table);
                    report.error = Some(error.to_string());
                    reports.push(report);
                }
            }
        }

        // Children first so a parent never disappears before its dependents.
        for (index, handler, remote_ids) in complete_sets.into_iter().rev() {
            ctx.ensure_active()?;
            let table = handler.table();
            match self.delete_orphans(table, &remote_ids).await {
                Ok(deleted) => {
                    if deleted > 0 {
                        tracing::info!(run_id = %ctx.run_id, table, deleted, "Removed orphaned records");
                    }
                    reports[index].orphans_deleted = deleted;
                }
                Err(error) if is_fatal(&error) => return Err(error),
                Err(error) => {
                    tracing::warn!(run_id = %ctx.run_id, table, "Orphan reconciliation failed: {error}");
                    reports[index].error = Some(error.to_string());
                }
            }
        }

        Ok(reports)
    }

    /// Fetch and apply one type. Returns the report and the fetched ids.
    async fn pull_type(
        &self,
        ctx: &RunContext,
        handler: &dyn EntityHandler,
        full: bool,
    ) -> Result<(TableReport, HashSet<RecordId>)> {
        let table = handler.table();
        let checkpoint = if full {
            None
        } else {
            self.store.checkpoint(&self.actor, table).await?
        };
        let filter = RemoteFilter::from_checkpoint(checkpoint);

        let rows = with_retry(&self.retry, ctx, &format!("select {table}"), || {
            self.remote.select(table, filter)
        })
        .await?;
        ctx.ensure_active()?;

        let mut report = TableReport::new(table);
        report.fetched = rows.len();
        let remote_ids = rows.iter().map(|row| row.id).collect();
        let max_updated_at = rows.iter().map(RemoteRow::updated_at_millis).max();
        let now = now_millis();

        let report = self
            .store
            .apply_batch(|batch| {
                let repo = batch.records();
                for row in &rows {
                    self.apply_row(&repo, ctx, handler, row, now, &mut report)?;
                }
                if let Some(max_updated_at) = max_updated_at {
                    repo.advance_checkpoint(self.actor.as_str(), table, max_updated_at)?;
                }
                Ok(report)
            })
            .await?;

        tracing::info!(
            run_id = %ctx.run_id,
            table,
            fetched = report.fetched,
            inserted = report.inserted,
            updated = report.updated,
            kept_local = report.kept_local,
            "Down-synced entity type"
        );
        Ok((report, remote_ids))
    }

    fn apply_row(
        &self,
        repo: &SqliteRecordRepository<'_>,
        ctx: &RunContext,
        handler: &dyn EntityHandler,
        row: &RemoteRow,
        now: i64,
        report: &mut TableReport,
    ) -> Result<()> {
        let table = handler.table();
        if let Err(error) = handler.validate(&row.fields) {
            tracing::warn!(run_id = %ctx.run_id, table, record_id = %row.id, "Skipping undecodable remote row: {error}");
            report.rejected += 1;
            return Ok(());
        }

        let Some(local) = repo.get(table, &row.id)? else {
            repo.put(&row.to_record(table, now))?;
            report.inserted += 1;
            tracing::debug!(run_id = %ctx.run_id, table, record_id = %row.id, "Inserted remote record");
            return Ok(());
        };

        let base = repo.synced_payload(table, &row.id)?;
        match self
            .policy
            .resolve(&local, base.as_ref(), row, handler.collections())
        {
            Resolution::TakeRemote => {
                if row.matches_record(&local) {
                    report.unchanged += 1;
                } else {
                    repo.put(&row.to_record(table, now))?;
                    report.updated += 1;
                    tracing::debug!(run_id = %ctx.run_id, table, record_id = %row.id, "Applied remote version");
                }
            }
            Resolution::KeepLocal { merged } => {
                report.kept_local += 1;
                let differs =
                    local.updated_at != row.updated_at_millis() || local.payload != row.fields;
                if let Some(payload) = merged {
                    let mut record = local.clone();
                    record.payload = payload;
                    record.updated_at = now.max(local.updated_at + 1);
                    if record.sync_state == SyncState::Synced {
                        record.sync_state = SyncState::Pending;
                    }
                    repo.put(&record)?;
                    tracing::debug!(run_id = %ctx.run_id, table, record_id = %row.id, "Merged remote collection children into local record");
                }
                if differs {
                    repo.log_conflict(&NewConflict {
                        table,
                        record_id: &row.id,
                        local_updated_at: local.updated_at,
                        incoming_updated_at: row.updated_at_millis(),
                        resolved_at: now,
                        strategy: self.policy.name(),
                        winner: ConflictWinner::Local,
                    })?;
                    tracing::debug!(
                        run_id = %ctx.run_id,
                        table,
                        record_id = %row.id,
                        state = local.sync_state.tag(),
                        "Kept local version over remote"
                    );
                }
            }
        }
        Ok(())
    }

    /// Delete synced local records of `table` that are absent remotely.
    async fn delete_orphans(&self, table: &str, remote_ids: &HashSet<RecordId>) -> Result<usize> {
        self.store
            .apply_batch(|batch| {
                let repo = batch.records();
                let mut deleted = 0;
                for record in repo.list_in_state(table, SyncState::SYNCED_TAG)? {
                    if remote_ids.contains(&record.id) {
                        continue;
                    }
                    if repo.delete(table, &record.id)? {
                        tracing::debug!(table, record_id = %record.id, "Deleted orphaned record");
                        deleted += 1;
                    }
                }
                Ok(deleted)
            })
            .await
    }
}
