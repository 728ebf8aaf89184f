use std::path::Path;

use tandem_core::SyncState;

use crate::catalog::parse_payload;
use crate::cli::{EntityKind, RecordCommands, StateFilter};
use crate::commands::common::{
    format_record_lines, format_sync_timestamp, open_store, record_to_list_item, resolve_json_input,
    resolve_record, short_id, RecordListItem,
};
use crate::error::CliError;

pub async fn run_record(command: RecordCommands, db_path: &Path) -> Result<(), CliError> {
    match command {
        RecordCommands::Add { entity, json } => run_add(entity, json, db_path).await,
        RecordCommands::Edit { entity, id, json } => run_edit(entity, &id, json, db_path).await,
        RecordCommands::Show { entity, id } => run_show(entity, &id, db_path).await,
        RecordCommands::List {
            entity,
            state,
            limit,
            json,
        } => run_list(entity, state, limit, json, db_path).await,
    }
}

async fn run_add(entity: EntityKind, json: Option<String>, db_path: &Path) -> Result<(), CliError> {
    let payload = parse_payload(entity, &resolve_json_input(json)?)?;
    let store = open_store(db_path).await?;
    let record = store.insert_local_payload(entity.table(), payload).await?;
    store.close().await?;

    println!("Created {} {}", entity.table(), short_id(&record.id));
    Ok(())
}

async fn run_edit(
    entity: EntityKind,
    id: &str,
    json: Option<String>,
    db_path: &Path,
) -> Result<(), CliError> {
    let payload = parse_payload(entity, &resolve_json_input(json)?)?;
    let store = open_store(db_path).await?;
    let existing = resolve_record(&store, entity.table(), id).await?;
    let record = store
        .update_local_payload(entity.table(), &existing.id, payload)
        .await?;
    store.close().await?;

    println!("Updated {} {}", entity.table(), short_id(&record.id));
    Ok(())
}

async fn run_show(entity: EntityKind, id: &str, db_path: &Path) -> Result<(), CliError> {
    let store = open_store(db_path).await?;
    let record = resolve_record(&store, entity.table(), id).await?;
    store.close().await?;

    println!("{}/{}", record.table, record.id);
    println!("  state:    {}", record.sync_state.tag());
    if let SyncState::Failed { message } = &record.sync_state {
        println!("  error:    {message}");
    }
    println!("  created:  {}", format_sync_timestamp(record.created_at));
    println!("  updated:  {}", format_sync_timestamp(record.updated_at));
    match record.synced_at {
        Some(synced_at) => println!("  synced:   {}", format_sync_timestamp(synced_at)),
        None => println!("  synced:   never"),
    }
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::Value::Object(record.payload))?
    );
    Ok(())
}

async fn run_list(
    entity: EntityKind,
    state: Option<StateFilter>,
    limit: usize,
    as_json: bool,
    db_path: &Path,
) -> Result<(), CliError> {
    let store = open_store(db_path).await?;
    let mut records = match state {
        Some(filter) => {
            store
                .records_in_state(entity.table(), state_tag(filter))
                .await?
        }
        None => store.list_records(entity.table()).await?,
    };
    store.close().await?;
    records.truncate(limit);

    if as_json {
        let json_items = records
            .iter()
            .map(record_to_list_item)
            .collect::<Vec<RecordListItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("No {} found.", entity.table());
        return Ok(());
    }

    for line in format_record_lines(&records) {
        println!("{line}");
    }
    Ok(())
}

pub const fn state_tag(filter: StateFilter) -> &'static str {
    match filter {
        StateFilter::Synced => SyncState::SYNCED_TAG,
        StateFilter::Pending => SyncState::PENDING_TAG,
        StateFilter::Failed => SyncState::FAILED_TAG,
    }
}
