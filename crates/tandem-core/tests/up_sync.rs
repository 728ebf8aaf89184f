mod common;

use std::time::Duration;

use common::*;
use pretty_assertions::assert_eq;
use tandem_core::remote::InMemoryRemote;
use tandem_core::{RecordId, SyncState};

#[tokio::test]
async fn test_offline_parent_and_child_push_in_dependency_order() {
    let remote = InMemoryRemote::new();
    remote.enforce_foreign_key("tasks", "listing_id", "listings");
    let orchestrator = orchestrator(&remote, fast_settings()).await;
    let store = orchestrator.store();

    let listing = store
        .insert_local(&Listing {
            title: "Loft".to_string(),
        })
        .await
        .unwrap();
    let task = store
        .insert_local(&Task {
            listing_id: listing.id,
            title: "Paint".to_string(),
            claims: Vec::new(),
        })
        .await
        .unwrap();

    let report = orchestrator.sync().await.unwrap();
    assert_eq!(report.pushed_records(), 2);
    assert_eq!(
        remote.upserted_ids(),
        vec![
            ("listings".to_string(), listing.id),
            ("tasks".to_string(), task.id)
        ]
    );
    for (table, id) in [("listings", listing.id), ("tasks", task.id)] {
        let record = store.get_record(table, &id).await.unwrap().unwrap();
        assert_eq!(record.sync_state, SyncState::Synced);
        assert!(record.synced_at.is_some());
    }
}

#[tokio::test]
async fn test_child_is_deferred_until_parent_syncs() {
    let remote = InMemoryRemote::new();
    remote.enforce_foreign_key("tasks", "listing_id", "listings");
    let orchestrator = orchestrator(&remote, fast_settings()).await;
    let store = orchestrator.store();

    let listing = store
        .insert_local(&Listing {
            title: "Loft".to_string(),
        })
        .await
        .unwrap();
    let task = store
        .insert_local(&Task {
            listing_id: listing.id,
            title: "Paint".to_string(),
            claims: Vec::new(),
        })
        .await
        .unwrap();
    remote.reject_record(listing.id, "title too short");

    let report = orchestrator.sync().await.unwrap();
    assert_eq!(report.up_table("listings").unwrap().failed, 1);
    assert_eq!(report.up_table("tasks").unwrap().deferred, 1);
    assert!(remote.row("tasks", &task.id).is_none());
    let pending_task = store.get_record("tasks", &task.id).await.unwrap().unwrap();
    assert_eq!(pending_task.sync_state, SyncState::Pending);

    let failed = store.failed_records().await.unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].id, listing.id);

    remote.accept_record(&listing.id);
    let retry = orchestrator.retry_sync().await.unwrap();
    assert_eq!(retry.pushed_records(), 1);
    assert!(retry.down.is_empty());

    orchestrator.sync().await.unwrap();
    assert!(remote.row("tasks", &task.id).is_some());
    assert_eq!(
        store.get_record("tasks", &task.id).await.unwrap().unwrap().sync_state,
        SyncState::Synced
    );
}

#[tokio::test]
async fn test_one_failed_record_does_not_block_siblings() {
    let remote = InMemoryRemote::new();
    let orchestrator = orchestrator(&remote, fast_settings()).await;
    let store = orchestrator.store();

    let mut ids = Vec::new();
    for title in ["One", "Two", "Three"] {
        let record = store
            .insert_local(&Listing {
                title: title.to_string(),
            })
            .await
            .unwrap();
        ids.push(record.id);
    }
    remote.reject_record(ids[1], "duplicate title");

    let report = orchestrator.sync().await.unwrap();
    let listings = report.up_table("listings").unwrap();
    assert_eq!(listings.pushed, 2);
    assert_eq!(listings.failed, 1);
    assert!(remote.row("listings", &ids[0]).is_some());
    assert!(remote.row("listings", &ids[2]).is_some());

    let failed = store.get_record("listings", &ids[1]).await.unwrap().unwrap();
    assert!(failed
        .sync_state
        .last_error()
        .is_some_and(|message| message.contains("duplicate title")));
}

#[tokio::test]
async fn test_exhausted_transient_failures_mark_record_failed() {
    let remote = InMemoryRemote::new();
    let orchestrator = orchestrator(&remote, fast_settings()).await;
    let record = orchestrator
        .store()
        .insert_local(&Listing {
            title: "Loft".to_string(),
        })
        .await
        .unwrap();
    remote.fail_upserts("listings", 3);

    orchestrator.sync().await.unwrap();
    let stored = orchestrator
        .store()
        .get_record("listings", &record.id)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(stored.sync_state, SyncState::Failed { .. }));

    let report = orchestrator.retry_sync().await.unwrap();
    assert_eq!(report.pushed_records(), 1);
    assert!(remote.row("listings", &record.id).is_some());
}

#[tokio::test]
async fn test_pushes_follow_creation_order() {
    let remote = InMemoryRemote::new();
    let orchestrator = orchestrator(&remote, fast_settings()).await;
    let mut expected = Vec::new();
    for title in ["a", "b", "c", "d"] {
        let record = orchestrator
            .store()
            .insert_local(&Listing {
                title: title.to_string(),
            })
            .await
            .unwrap();
        expected.push(("listings".to_string(), record.id));
    }

    orchestrator.sync().await.unwrap();
    assert_eq!(remote.upserted_ids(), expected);
}

#[tokio::test]
async fn test_reference_types_are_never_pushed() {
    let remote = InMemoryRemote::new();
    let orchestrator = orchestrator(&remote, fast_settings()).await;
    orchestrator
        .store()
        .insert_local(&Profile {
            display_name: "Bea".to_string(),
            avatar_hash: None,
        })
        .await
        .unwrap();

    let report = orchestrator.sync().await.unwrap();
    assert!(report.up_table("profiles").is_none());
    assert!(remote.upserted_ids().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_edit_during_push_stays_pending() {
    let remote = InMemoryRemote::new();
    remote.set_latency(Duration::from_secs(1));
    let orchestrator = orchestrator(&remote, fast_settings()).await;
    let record = orchestrator
        .store()
        .insert_local(&Listing {
            title: "First draft".to_string(),
        })
        .await
        .unwrap();

    let running = orchestrator.clone();
    let run = tokio::spawn(async move { running.sync().await });
    // Three selects take three seconds; the upsert is in flight afterwards.
    tokio::time::sleep(Duration::from_millis(3500)).await;
    let edited = orchestrator
        .store()
        .update_local(
            &record.id,
            &Listing {
                title: "Second draft".to_string(),
            },
        )
        .await
        .unwrap();

    let report = run.await.unwrap().unwrap();
    assert_eq!(report.pushed_records(), 1);
    let pushed = remote.row("listings", &record.id).unwrap();
    assert_eq!(pushed.fields, record.payload);

    let stored = orchestrator
        .store()
        .get_record("listings", &record.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.sync_state, SyncState::Pending);
    assert_eq!(stored.updated_at, edited.updated_at);
    assert_eq!(stored.field_str("title"), Some("Second draft"));
}

#[tokio::test]
async fn test_unknown_parent_is_assumed_remote() {
    let remote = InMemoryRemote::new();
    let orchestrator = orchestrator(&remote, fast_settings()).await;
    let task = orchestrator
        .store()
        .insert_local(&Task {
            listing_id: RecordId::new(),
            title: "Paint".to_string(),
            claims: Vec::new(),
        })
        .await
        .unwrap();

    let report = orchestrator.sync().await.unwrap();
    assert_eq!(report.up_table("tasks").unwrap().deferred, 0);
    assert!(remote.row("tasks", &task.id).is_some());
}
