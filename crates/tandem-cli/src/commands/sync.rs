use std::path::Path;

use serde::Serialize;
use tandem_core::store::StateCounts;
use tandem_core::{LocalStore, SyncOrchestrator};

use crate::cli::SyncCommands;
use crate::commands::common::{
    finish_report, format_record_lines, format_sync_conflict_lines, format_sync_timestamp,
    open_orchestrator, open_store, record_to_list_item, sync_conflict_to_item, RecordListItem,
    SyncConflictItem,
};
use crate::config_profiles::{resolve_actor, CliProfilesConfig};
use crate::error::CliError;

#[derive(Debug, Serialize)]
struct TableStatusItem {
    table: String,
    synced: usize,
    pending: usize,
    failed: usize,
    checkpoint: Option<i64>,
    checkpoint_iso: Option<String>,
}

pub async fn run_sync_command(
    full: bool,
    command: Option<SyncCommands>,
    db_path: &Path,
    profile: Option<&str>,
) -> Result<(), CliError> {
    match command {
        None => run_sync(full, db_path, profile).await,
        Some(SyncCommands::Retry) => run_sync_retry(db_path, profile).await,
        Some(SyncCommands::Reset) => run_sync_reset(db_path, profile).await,
        Some(SyncCommands::Status { json }) => run_sync_status(json, db_path, profile).await,
        Some(SyncCommands::Failed { json }) => run_sync_failed(json, db_path).await,
        Some(SyncCommands::Conflicts { limit, json }) => {
            run_sync_conflicts(limit, json, db_path).await
        }
    }
}

async fn run_sync(full: bool, db_path: &Path, profile: Option<&str>) -> Result<(), CliError> {
    let orchestrator = open_orchestrator(db_path, profile).await?;
    let outcome = if full {
        orchestrator.full_sync().await
    } else {
        orchestrator.sync().await
    };
    finish(&orchestrator, outcome.map_err(CliError::from)).await
}

async fn run_sync_retry(db_path: &Path, profile: Option<&str>) -> Result<(), CliError> {
    let orchestrator = open_orchestrator(db_path, profile).await?;
    let outcome = orchestrator.retry_sync().await.map_err(CliError::from);
    finish(&orchestrator, outcome).await
}

/// Shut down before surfacing the run's outcome so the store is released.
async fn finish(
    orchestrator: &SyncOrchestrator,
    outcome: Result<tandem_core::SyncReport, CliError>,
) -> Result<(), CliError> {
    orchestrator.shutdown().await?;
    finish_report(&outcome?)
}

async fn run_sync_reset(db_path: &Path, profile: Option<&str>) -> Result<(), CliError> {
    let orchestrator = open_orchestrator(db_path, profile).await?;
    orchestrator.reset_last_sync_time().await?;
    orchestrator.shutdown().await?;
    println!("Sync checkpoints cleared; the next sync fetches every row.");
    Ok(())
}

async fn run_sync_status(
    as_json: bool,
    db_path: &Path,
    profile: Option<&str>,
) -> Result<(), CliError> {
    let config = CliProfilesConfig::load()?;
    let profile_name = config.resolve_profile_name(profile);
    let actor = resolve_actor(config.profile(&profile_name))?;

    let store = open_store(db_path).await?;
    let counts = store.counts_by_state().await?;
    let items = table_status_items(&store, actor.as_ref(), counts).await?;
    store.close().await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    if items.is_empty() {
        println!("No records stored yet.");
        return Ok(());
    }

    for item in &items {
        let checkpoint = item
            .checkpoint_iso
            .clone()
            .unwrap_or_else(|| "never".to_string());
        println!(
            "{:<10}  synced={:<5} pending={:<5} failed={:<5} last fetched: {checkpoint}",
            item.table, item.synced, item.pending, item.failed
        );
    }
    Ok(())
}

async fn table_status_items(
    store: &LocalStore,
    actor: Option<&tandem_core::ActorId>,
    counts: Vec<StateCounts>,
) -> Result<Vec<TableStatusItem>, CliError> {
    let mut items = Vec::with_capacity(counts.len());
    for count in counts {
        let checkpoint = match actor {
            Some(actor) => store.checkpoint(actor, &count.table).await?,
            None => None,
        };
        items.push(TableStatusItem {
            table: count.table,
            synced: count.synced,
            pending: count.pending,
            failed: count.failed,
            checkpoint,
            checkpoint_iso: checkpoint.map(format_sync_timestamp),
        });
    }
    Ok(items)
}

async fn run_sync_failed(as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let store = open_store(db_path).await?;
    let records = store.failed_records().await?;
    store.close().await?;

    if as_json {
        let json_items = records
            .iter()
            .map(record_to_list_item)
            .collect::<Vec<RecordListItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("No failed records.");
        return Ok(());
    }

    for line in format_record_lines(&records) {
        println!("{line}");
    }
    println!("Run `tandem sync retry` to push them again.");
    Ok(())
}

async fn run_sync_conflicts(limit: usize, as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let store = open_store(db_path).await?;
    let conflicts = store.list_conflicts(limit).await?;
    store.close().await?;

    if as_json {
        let json_items = conflicts
            .iter()
            .map(sync_conflict_to_item)
            .collect::<Vec<SyncConflictItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
        return Ok(());
    }

    if conflicts.is_empty() {
        println!("No sync conflicts recorded.");
        return Ok(());
    }

    for line in format_sync_conflict_lines(&conflicts) {
        println!("{line}");
    }
    Ok(())
}
