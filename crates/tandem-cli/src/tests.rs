use std::sync::Arc;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use serde_json::json;
use tandem_core::assets::{content_hash, AssetRef, AssetSource, AssetSync};
use tandem_core::models::{ConflictWinner, SyncConflict};
use tandem_core::remote::RemoteResult;
use tandem_core::store::RecordRepository;
use tandem_core::{LocalStore, Record, SyncState};

use crate::catalog::{parse_payload, schema};
use crate::cli::{CompletionShell, EntityKind, StateFilter};
use crate::commands::assets::{pull_assets, PullSummary};
use crate::commands::common::{
    finish_report, format_relative_time, format_sync_conflict_lines, format_sync_timestamp,
    normalize_record_identifier, record_preview, resolve_record,
};
use crate::commands::completions::{render_completions, run_completions};
use crate::commands::config::{describe_profile, merge_profile, validate_profile};
use crate::commands::record::state_tag;
use crate::config_profiles::CliProfile;
use crate::error::CliError;

fn record_with_id(table: &str, id: &str, payload: serde_json::Value) -> Record {
    let serde_json::Value::Object(payload) = payload else {
        panic!("payload must be an object");
    };
    let mut record = Record::new_local(table, payload, 1_000);
    record.id = id.parse().unwrap();
    record
}

async fn temp_store() -> (tempfile::TempDir, LocalStore) {
    let temp = tempfile::tempdir().unwrap();
    let store = LocalStore::open(temp.path().join("tandem.db")).await.unwrap();
    (temp, store)
}

#[test]
fn parse_payload_accepts_valid_task() {
    let raw = r#"{"listing_id": "11111111-1111-7111-8111-111111111111", "title": "Paint fence"}"#;
    let payload = parse_payload(EntityKind::Tasks, raw).unwrap();
    assert_eq!(payload.get("title"), Some(&json!("Paint fence")));
}

#[test]
fn parse_payload_rejects_non_objects_and_missing_fields() {
    assert!(matches!(
        parse_payload(EntityKind::Listings, "[1, 2]"),
        Err(CliError::InvalidPayload(_))
    ));
    assert!(matches!(
        parse_payload(EntityKind::Listings, r#"{"address": "Main St"}"#),
        Err(CliError::InvalidPayload(_))
    ));
    assert!(matches!(
        parse_payload(EntityKind::Listings, "not json"),
        Err(CliError::Serialization(_))
    ));
}

#[test]
fn parse_payload_rejects_sync_managed_fields() {
    let error = parse_payload(
        EntityKind::Listings,
        r#"{"title": "Loft", "updated_at": 5}"#,
    )
    .unwrap_err();
    assert!(error.to_string().contains("updated_at"));
}

#[test]
fn catalog_schema_registers_every_entity_kind() {
    let schema = schema().unwrap();
    for kind in [EntityKind::Profiles, EntityKind::Listings, EntityKind::Tasks] {
        assert!(schema.handler(kind.table()).is_some(), "{}", kind.table());
    }
}

#[test]
fn state_filters_map_to_stored_tags() {
    assert_eq!(state_tag(StateFilter::Synced), "synced");
    assert_eq!(state_tag(StateFilter::Pending), "pending");
    assert_eq!(state_tag(StateFilter::Failed), "failed");
}

#[test]
fn format_relative_time_units() {
    let now = 10_000_000;
    assert_eq!(format_relative_time(now - 30_000, now), "just now");
    assert_eq!(format_relative_time(now - 120_000, now), "2m ago");
    assert_eq!(format_relative_time(now - 2 * 60 * 60_000, now), "2h ago");
}

#[test]
fn format_sync_timestamp_returns_utc_label() {
    assert_eq!(format_sync_timestamp(0), "1970-01-01 00:00:00 UTC");
}

#[test]
fn record_preview_prefers_title_and_truncates() {
    let record = record_with_id(
        "listings",
        "11111111-1111-7111-8111-111111111111",
        json!({"title": "A    very long listing title that keeps going"}),
    );
    assert_eq!(record_preview(&record, 20), "A very long listi...");

    let untitled = record_with_id(
        "claims",
        "11111111-1111-7111-8111-111111111112",
        json!({"user_id": "u1"}),
    );
    assert_eq!(record_preview(&untitled, 40), r#"{"user_id":"u1"}"#);
}

#[test]
fn format_sync_conflict_lines_include_key_fields() {
    let conflicts = vec![SyncConflict {
        id: 1,
        table: "tasks".to_string(),
        record_id: "11111111-1111-7111-8111-111111111111".to_string(),
        local_updated_at: 200,
        incoming_updated_at: 100,
        resolved_at: 300,
        strategy: "local_authoritative".to_string(),
        winner: ConflictWinner::Local,
    }];

    let rendered = format_sync_conflict_lines(&conflicts);
    assert_eq!(rendered.len(), 1);
    assert!(rendered[0].contains("local_authoritative"));
    assert!(rendered[0].contains("tasks/11111111-1111-7111-8111-111111111111"));
    assert!(rendered[0].contains("kept=local"));
    assert!(rendered[0].contains("local=200"));
    assert!(rendered[0].contains("incoming=100"));
}

#[test]
fn normalize_record_identifier_rejects_empty() {
    assert!(matches!(
        normalize_record_identifier(" \n "),
        Err(CliError::EmptyRecordId)
    ));
    assert_eq!(normalize_record_identifier("  abc123  ").unwrap(), "abc123");
}

#[tokio::test]
async fn resolve_record_supports_exact_and_prefix_id() {
    let (_temp, store) = temp_store().await;
    let first = record_with_id(
        "listings",
        "11111111-1111-7111-8111-111111111111",
        json!({"title": "First"}),
    );
    let second = record_with_id(
        "listings",
        "11111111-1111-7111-8111-222222222222",
        json!({"title": "Second"}),
    );
    store
        .with_repo(|repo| {
            repo.put(&first)?;
            repo.put(&second)
        })
        .await
        .unwrap();

    let exact = resolve_record(&store, "listings", "11111111-1111-7111-8111-111111111111")
        .await
        .unwrap();
    assert_eq!(exact.id, first.id);

    let prefixed = resolve_record(&store, "listings", "11111111-1111-7111-8111-2")
        .await
        .unwrap();
    assert_eq!(prefixed.id, second.id);

    let ambiguous = resolve_record(&store, "listings", "11111111")
        .await
        .unwrap_err();
    assert!(matches!(ambiguous, CliError::AmbiguousRecordId(_)));

    let missing = resolve_record(&store, "tasks", "11111111").await.unwrap_err();
    assert!(matches!(missing, CliError::RecordNotFound(_)));
}

#[test]
fn finish_report_fails_when_records_failed() {
    let mut report = tandem_core::SyncReport::new(
        tandem_core::models::SyncRunId::new(3),
        tandem_core::SyncMode::Incremental,
        0,
    );
    assert!(finish_report(&report).is_ok());

    let mut listings = tandem_core::models::TableReport::new("listings");
    listings.pushed = 2;
    listings.failed = 1;
    report.up.push(listings);

    let error = finish_report(&report).unwrap_err();
    assert!(matches!(error, CliError::SyncFailed(_)));
    assert!(error.to_string().contains("1 record(s) failed"));
}

#[test]
fn merge_profile_keeps_existing_values_for_unset_flags() {
    let mut profile = CliProfile {
        backend_url: Some("https://old.example.co".to_string()),
        anon_key: Some("old-key".to_string()),
        ..CliProfile::default()
    };
    merge_profile(
        &mut profile,
        CliProfile {
            backend_url: Some("https://new.example.co/".to_string()),
            actor_id: Some(" user-a ".to_string()),
            anon_key: Some("  ".to_string()),
            ..CliProfile::default()
        },
    );

    assert_eq!(profile.backend_url.as_deref(), Some("https://new.example.co"));
    assert_eq!(profile.anon_key.as_deref(), Some("old-key"));
    assert_eq!(profile.actor_id.as_deref(), Some("user-a"));
    assert!(validate_profile(&profile).is_ok());

    profile.backend_url = Some("new.example.co".to_string());
    assert!(validate_profile(&profile).is_err());
}

#[test]
fn describe_profile_redacts_secrets() {
    let profile = CliProfile {
        backend_url: Some("https://project.example.co".to_string()),
        anon_key: Some("secret-anon".to_string()),
        access_token: Some("secret-token".to_string()),
        storage_bucket: None,
        actor_id: Some("user-a".to_string()),
        realtime_topic: None,
    };
    let rendered = describe_profile(&profile).join("\n");
    assert!(!rendered.contains("secret"));
    assert!(rendered.contains("[REDACTED]"));
    assert!(rendered.contains("storage_bucket: (unset)"));
}

struct FixedSource;

#[async_trait]
impl AssetSource for FixedSource {
    async fn fetch(&self, key: &str) -> RemoteResult<Option<Vec<u8>>> {
        Ok(match key {
            "avatars/a.png" => Some(b"avatar-a".to_vec()),
            "avatars/b.png" => Some(b"avatar-b".to_vec()),
            _ => None,
        })
    }
}

#[tokio::test]
async fn pull_assets_counts_each_outcome() {
    let temp = tempfile::tempdir().unwrap();
    let sync = AssetSync::new(temp.path(), Arc::new(FixedSource));
    let assets = vec![
        AssetRef::new("avatars/a.png", Some(content_hash(b"avatar-a"))),
        AssetRef::new("avatars/b.png", Some(content_hash(b"something else"))),
        AssetRef::new("avatars/gone.png", None),
    ];

    let first = pull_assets(&sync, &assets).await;
    assert_eq!(
        first,
        PullSummary {
            downloaded: 1,
            up_to_date: 0,
            missing: 1,
            failed: 1,
        }
    );

    let second = pull_assets(&sync, &assets[..1]).await;
    assert_eq!(second.up_to_date, 1);
}

#[test]
fn run_completions_writes_bash_script_file() {
    let temp = tempfile::tempdir().unwrap();
    let output_path = temp.path().join("tandem.bash");

    run_completions(CompletionShell::Bash, Some(&output_path)).unwrap();

    let script = std::fs::read_to_string(&output_path).unwrap();
    assert!(script.contains("_tandem()"));
    assert!(script.contains("complete -F _tandem"));
}

#[test]
fn render_completions_covers_powershell() {
    let script = String::from_utf8(render_completions(CompletionShell::PowerShell)).unwrap();
    assert!(script.contains("Register-ArgumentCompleter"));
    assert!(script.contains("tandem"));
}

#[tokio::test]
async fn failed_state_survives_store_reopen() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("tandem.db");
    let mut record = record_with_id(
        "listings",
        "11111111-1111-7111-8111-333333333333",
        json!({"title": "Broken"}),
    );
    record.sync_state = SyncState::Failed {
        message: "HTTP 422".to_string(),
    };

    let store = LocalStore::open(&path).await.unwrap();
    store.with_repo(|repo| repo.put(&record)).await.unwrap();
    store.close().await.unwrap();

    let reopened = LocalStore::open(&path).await.unwrap();
    let failed = reopened.failed_records().await.unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].sync_state.last_error(), Some("HTTP 422"));
}
