//! Shared fixtures: a small marketplace catalog over an in-memory remote.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tandem_core::config::{RetryPolicy, SyncSettings};
use tandem_core::models::{EntityRole, ForeignKey, KeyedCollection};
use tandem_core::remote::{InMemoryRemote, RemoteRow};
use tandem_core::util::millis_to_datetime;
use tandem_core::{ActorId, LocalStore, RecordId, SyncOrchestrator, SyncSchema, Syncable};

pub const ACTOR: &str = "user-a";
pub const OTHER_ACTOR: &str = "user-b";
/// 2023-11-14, well before any locally generated timestamp
pub const T0: i64 = 1_700_000_000_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub display_name: String,
    #[serde(default)]
    pub avatar_hash: Option<String>,
}

impl Syncable for Profile {
    const TABLE: &'static str = "profiles";
    const ROLE: EntityRole = EntityRole::Reference;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    pub title: String,
}

impl Syncable for Listing {
    const TABLE: &'static str = "listings";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    pub user_id: String,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub listing_id: RecordId,
    pub title: String,
    #[serde(default)]
    pub claims: Vec<Claim>,
}

impl Syncable for Task {
    const TABLE: &'static str = "tasks";

    fn references() -> &'static [ForeignKey] {
        &[ForeignKey {
            field: "listing_id",
            table: "listings",
        }]
    }

    fn collections() -> &'static [KeyedCollection] {
        &[KeyedCollection {
            field: "claims",
            key: "user_id",
        }]
    }
}

pub fn claim(user_id: &str) -> Claim {
    Claim {
        user_id: user_id.to_string(),
        note: None,
    }
}

pub fn schema() -> SyncSchema {
    SyncSchema::new()
        .register::<Profile>()
        .and_then(SyncSchema::register::<Listing>)
        .and_then(SyncSchema::register::<Task>)
        .unwrap()
}

pub fn actor() -> ActorId {
    ActorId::new(ACTOR).unwrap()
}

/// Settings with near-instant retries so failure tests stay fast.
pub fn fast_settings() -> SyncSettings {
    SyncSettings::default()
        .with_debounce(Duration::from_millis(50))
        .with_retry(RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
        })
}

pub async fn orchestrator(remote: &InMemoryRemote, settings: SyncSettings) -> SyncOrchestrator {
    let store = LocalStore::open_in_memory().await.unwrap();
    SyncOrchestrator::new(store, Arc::new(remote.clone()), schema(), actor(), settings)
}

pub fn remote_row<T: Serialize>(id: RecordId, updated_at: i64, value: &T) -> RemoteRow {
    let Value::Object(fields) = serde_json::to_value(value).unwrap() else {
        panic!("entity must serialize to an object");
    };
    RemoteRow {
        id,
        created_at: millis_to_datetime(T0),
        updated_at: millis_to_datetime(updated_at),
        fields,
    }
}

pub fn payload<T: Serialize>(value: &T) -> Map<String, Value> {
    let Value::Object(fields) = serde_json::to_value(value).unwrap() else {
        panic!("entity must serialize to an object");
    };
    fields
}

/// Poll `check` until it holds or a generous deadline passes.
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..400 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}
