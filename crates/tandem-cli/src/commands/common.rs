use std::env;
use std::io::{self, IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value};
use tandem_core::models::SyncConflict;
use tandem_core::{
    LocalStore, PostgrestRemote, Record, RecordId, SyncOrchestrator, SyncReport, SyncSettings,
    SyncState, SyncStatus,
};

use crate::catalog;
use crate::config_profiles::resolve_identity;
use crate::error::CliError;

const SHORT_ID_LEN: usize = 13;

#[derive(Debug, Serialize)]
pub struct RecordListItem {
    pub id: String,
    pub table: String,
    pub sync_state: &'static str,
    pub last_error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub synced_at: Option<i64>,
    pub relative_time: String,
    pub fields: Map<String, Value>,
}

#[derive(Debug, Serialize)]
pub struct SyncConflictItem {
    pub id: i64,
    pub table: String,
    pub record_id: String,
    pub local_updated_at: i64,
    pub incoming_updated_at: i64,
    pub resolved_at: i64,
    pub resolved_at_iso: String,
    pub strategy: String,
    pub winner: &'static str,
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> PathBuf {
    cli_db_path
        .or_else(|| env::var_os("TANDEM_DB_PATH").map(PathBuf::from))
        .unwrap_or_else(default_db_path)
}

pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tandem")
}

pub fn default_db_path() -> PathBuf {
    default_data_dir().join("tandem.db")
}

pub async fn open_store(path: &Path) -> Result<LocalStore, CliError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(LocalStore::open(path).await?)
}

/// Orchestrator wired to the configured backend for `profile`.
pub async fn open_orchestrator(
    db_path: &Path,
    profile: Option<&str>,
) -> Result<SyncOrchestrator, CliError> {
    let identity = resolve_identity(profile)?;
    let mut settings = SyncSettings::default();
    if let Some(topic) = identity.realtime_topic {
        settings = settings.with_realtime_topic(topic);
    }
    let remote = PostgrestRemote::new(identity.backend)?.with_page_size(settings.page_size);
    let store = open_store(db_path).await?;
    Ok(SyncOrchestrator::new(
        store,
        Arc::new(remote),
        catalog::schema()?,
        identity.actor,
        settings,
    ))
}

pub fn normalize_record_identifier(id: &str) -> Result<String, CliError> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        Err(CliError::EmptyRecordId)
    } else {
        Ok(trimmed.to_string())
    }
}

/// Find a record by full id or unique id prefix.
pub async fn resolve_record(
    store: &LocalStore,
    table: &str,
    query: &str,
) -> Result<Record, CliError> {
    let query = normalize_record_identifier(query)?;
    if let Ok(id) = query.parse::<RecordId>() {
        if let Some(record) = store.get_record(table, &id).await? {
            return Ok(record);
        }
    }

    let mut matching = store
        .list_records(table)
        .await?
        .into_iter()
        .filter(|record| record.id.to_string().starts_with(&query))
        .collect::<Vec<_>>();

    match matching.len() {
        0 => Err(CliError::RecordNotFound(query)),
        1 => Ok(matching.remove(0)),
        _ => {
            let options = matching
                .iter()
                .take(3)
                .map(|record| short_id(&record.id))
                .collect::<Vec<_>>()
                .join(", ");

            Err(CliError::AmbiguousRecordId(format!(
                "ID prefix '{query}' is ambiguous; matches: {options}"
            )))
        }
    }
}

pub fn short_id(id: &RecordId) -> String {
    id.to_string().chars().take(SHORT_ID_LEN).collect()
}

pub fn record_to_list_item(record: &Record) -> RecordListItem {
    let now_ms = Utc::now().timestamp_millis();
    RecordListItem {
        id: record.id.to_string(),
        table: record.table.clone(),
        sync_state: record.sync_state.tag(),
        last_error: record.sync_state.last_error().map(ToString::to_string),
        created_at: record.created_at,
        updated_at: record.updated_at,
        synced_at: record.synced_at,
        relative_time: format_relative_time(record.updated_at, now_ms),
        fields: record.payload.clone(),
    }
}

pub fn format_record_lines(records: &[Record]) -> Vec<String> {
    let now_ms = Utc::now().timestamp_millis();
    records
        .iter()
        .map(|record| {
            let preview = record_preview(record, 40);
            let relative_time = format_relative_time(record.updated_at, now_ms);
            let state = record.sync_state.tag();
            match &record.sync_state {
                SyncState::Failed { message } => format!(
                    "{:<13}  {preview:<40}  {relative_time:<10}  {state}: {message}",
                    short_id(&record.id)
                ),
                SyncState::Synced | SyncState::Pending => format!(
                    "{:<13}  {preview:<40}  {relative_time:<10}  {state}",
                    short_id(&record.id)
                ),
            }
        })
        .collect()
}

/// One-line summary: the `title` or `display_name` field, else compact JSON.
pub fn record_preview(record: &Record, max_chars: usize) -> String {
    let text = record
        .field_str("title")
        .or_else(|| record.field_str("display_name"))
        .map_or_else(
            || Value::Object(record.payload.clone()).to_string(),
            ToString::to_string,
        );
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");

    if collapsed.chars().count() <= max_chars {
        collapsed
    } else {
        let take_len = max_chars.saturating_sub(3);
        let mut truncated = collapsed.chars().take(take_len).collect::<String>();
        truncated.push_str("...");
        truncated
    }
}

pub fn sync_conflict_to_item(conflict: &SyncConflict) -> SyncConflictItem {
    SyncConflictItem {
        id: conflict.id,
        table: conflict.table.clone(),
        record_id: conflict.record_id.clone(),
        local_updated_at: conflict.local_updated_at,
        incoming_updated_at: conflict.incoming_updated_at,
        resolved_at: conflict.resolved_at,
        resolved_at_iso: format_sync_timestamp(conflict.resolved_at),
        strategy: conflict.strategy.clone(),
        winner: conflict.winner.as_str(),
    }
}

pub fn format_sync_conflict_lines(conflicts: &[SyncConflict]) -> Vec<String> {
    conflicts
        .iter()
        .map(|conflict| {
            format!(
                "{}  {}  {}/{}  kept={} local={} incoming={}",
                format_sync_timestamp(conflict.resolved_at),
                conflict.strategy,
                conflict.table,
                conflict.record_id,
                conflict.winner.as_str(),
                conflict.local_updated_at,
                conflict.incoming_updated_at
            )
        })
        .collect()
}

pub fn format_sync_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;
    let month = 30 * day;
    let year = 365 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else if diff < month {
        format!("{}w ago", diff / week)
    } else if diff < year {
        format!("{}mo ago", diff / month)
    } else {
        format!("{}y ago", diff / year)
    }
}

pub fn describe_status(status: &SyncStatus) -> String {
    match status {
        SyncStatus::Idle => "idle".to_string(),
        SyncStatus::Syncing { run_id } => format!("run {run_id}: syncing"),
        SyncStatus::Ok { run_id, at } => {
            format!("run {run_id}: ok at {}", format_sync_timestamp(*at))
        }
        SyncStatus::Error { run_id, message } => format!("run {run_id}: error: {message}"),
    }
}

/// Per-table counters, skipping tables the run did not touch.
pub fn format_report_lines(report: &SyncReport) -> Vec<String> {
    let mut lines = Vec::new();
    for table in &report.down {
        if let Some(error) = &table.error {
            lines.push(format!("  down {:<10} error: {error}", table.table));
        } else if table.fetched > 0 || table.orphans_deleted > 0 {
            lines.push(format!(
                "  down {:<10} fetched={} inserted={} updated={} kept_local={} rejected={} deleted={}",
                table.table,
                table.fetched,
                table.inserted,
                table.updated,
                table.kept_local,
                table.rejected,
                table.orphans_deleted
            ));
        }
    }
    for table in &report.up {
        if let Some(error) = &table.error {
            lines.push(format!("  up   {:<10} error: {error}", table.table));
        } else if table.pushed > 0 || table.failed > 0 || table.deferred > 0 {
            lines.push(format!(
                "  up   {:<10} pushed={} failed={} deferred={}",
                table.table, table.pushed, table.failed, table.deferred
            ));
        }
    }
    lines
}

/// Print the report and turn type or record errors into a failing exit.
pub fn finish_report(report: &SyncReport) -> Result<(), CliError> {
    let lines = format_report_lines(report);
    if lines.is_empty() {
        println!("Sync run {} completed: nothing to do", report.run_id);
    } else {
        println!("Sync run {} completed", report.run_id);
        for line in lines {
            println!("{line}");
        }
    }

    report
        .error_summary()
        .map_or(Ok(()), |summary| Err(CliError::SyncFailed(summary)))
}

pub fn read_piped_stdin() -> Result<Option<String>, CliError> {
    let stdin = io::stdin();
    if stdin.is_terminal() {
        return Ok(None);
    }

    let mut buffer = String::new();
    stdin.lock().read_to_string(&mut buffer)?;
    let trimmed = buffer.trim();
    Ok((!trimmed.is_empty()).then(|| trimmed.to_string()))
}

/// Argument if present, else piped stdin.
pub fn resolve_json_input(json: Option<String>) -> Result<String, CliError> {
    if let Some(json) = tandem_core::util::normalize_text_option(json) {
        return Ok(json);
    }
    read_piped_stdin()?.ok_or(CliError::EmptyPayload)
}
