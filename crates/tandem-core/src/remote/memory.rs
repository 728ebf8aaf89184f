//! In-process remote backend for tests and offline demos.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;

use super::{
    RealtimeStream, RemoteClient, RemoteError, RemoteFilter, RemoteResult, RemoteRow, UpsertAck,
};
use crate::models::RecordId;
use crate::version::{SemVer, VersionPolicy};

/// One call observed by [`InMemoryRemote`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    Select { table: String, filter: RemoteFilter },
    Upsert { table: String, ids: Vec<RecordId> },
    Subscribe { topic: String },
    VersionPolicy { platform: String },
}

#[derive(Debug, Clone)]
struct ForeignKeyRule {
    table: String,
    field: String,
    parent: String,
}

#[derive(Default)]
struct MemoryState {
    tables: HashMap<String, BTreeMap<RecordId, RemoteRow>>,
    foreign_keys: Vec<ForeignKeyRule>,
    select_failures: HashMap<String, usize>,
    upsert_failures: HashMap<String, usize>,
    rejected: HashMap<RecordId, String>,
    subscribe_failures: usize,
    subscribers: Vec<mpsc::UnboundedSender<RemoteResult<Value>>>,
    version_policy: Option<VersionPolicy>,
    latency: Duration,
    calls: Vec<RemoteCall>,
}

/// Deterministic [`RemoteClient`] backed by in-memory tables.
///
/// Supports scripted transient failures, permanent per-record rejections,
/// foreign-key enforcement, artificial latency, and realtime publishing.
/// Clones share state, so a test can keep a handle while the orchestrator
/// owns another.
#[derive(Clone, Default)]
pub struct InMemoryRemote {
    state: Arc<Mutex<MemoryState>>,
}

impl std::fmt::Debug for InMemoryRemote {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        formatter
            .debug_struct("InMemoryRemote")
            .field("tables", &state.tables.keys().collect::<Vec<_>>())
            .field("calls", &state.calls.len())
            .finish_non_exhaustive()
    }
}

impl InMemoryRemote {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Write a row directly, as another actor or a server job would.
    pub fn put_row(&self, table: &str, row: RemoteRow) {
        self.lock()
            .tables
            .entry(table.to_string())
            .or_default()
            .insert(row.id, row);
    }

    /// Hard-delete a row on the remote side.
    pub fn remove_row(&self, table: &str, id: &RecordId) -> Option<RemoteRow> {
        self.lock().tables.get_mut(table)?.remove(id)
    }

    pub fn row(&self, table: &str, id: &RecordId) -> Option<RemoteRow> {
        self.lock().tables.get(table)?.get(id).cloned()
    }

    pub fn rows(&self, table: &str) -> Vec<RemoteRow> {
        self.lock()
            .tables
            .get(table)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Reject upserts into `table` whose `field` names a missing `parent` row.
    pub fn enforce_foreign_key(&self, table: &str, field: &str, parent: &str) {
        self.lock().foreign_keys.push(ForeignKeyRule {
            table: table.to_string(),
            field: field.to_string(),
            parent: parent.to_string(),
        });
    }

    /// Fail the next `times` selects on `table` with a transient error.
    pub fn fail_selects(&self, table: &str, times: usize) {
        self.lock()
            .select_failures
            .insert(table.to_string(), times);
    }

    /// Fail the next `times` upserts into `table` with a transient error.
    pub fn fail_upserts(&self, table: &str, times: usize) {
        self.lock()
            .upsert_failures
            .insert(table.to_string(), times);
    }

    /// Permanently reject any upsert containing `id`.
    pub fn reject_record(&self, id: RecordId, message: impl Into<String>) {
        self.lock().rejected.insert(id, message.into());
    }

    pub fn accept_record(&self, id: &RecordId) {
        self.lock().rejected.remove(id);
    }

    /// Fail the next `times` subscribe attempts.
    pub fn fail_subscribes(&self, times: usize) {
        self.lock().subscribe_failures = times;
    }

    /// Delay every call by `latency` (observes tokio's paused clock).
    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = latency;
    }

    pub fn set_version_policy(&self, policy: VersionPolicy) {
        self.lock().version_policy = Some(policy);
    }

    /// Send a broadcast payload to every open subscription.
    ///
    /// Returns how many subscribers received it.
    pub fn publish(&self, payload: Value) -> usize {
        let mut state = self.lock();
        state
            .subscribers
            .retain(|subscriber| subscriber.send(Ok(payload.clone())).is_ok());
        state.subscribers.len()
    }

    /// Drop every open subscription with a channel error.
    pub fn disconnect_subscribers(&self) {
        let subscribers = std::mem::take(&mut self.lock().subscribers);
        for subscriber in subscribers {
            let _ = subscriber.send(Err(RemoteError::Realtime("connection lost".to_string())));
        }
    }

    pub fn subscriber_count(&self) -> usize {
        let mut state = self.lock();
        state.subscribers.retain(|subscriber| !subscriber.is_closed());
        state.subscribers.len()
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.lock().calls.clone()
    }

    /// Upserted record ids in call order, across all tables.
    pub fn upserted_ids(&self) -> Vec<(String, RecordId)> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                RemoteCall::Upsert { table, ids } => Some((table, ids)),
                _ => None,
            })
            .flat_map(|(table, ids)| ids.iter().map(|id| (table.clone(), *id)))
            .collect()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    async fn simulate_latency(&self) {
        let latency = self.lock().latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }
}

fn take_failure(failures: &mut HashMap<String, usize>, table: &str) -> bool {
    match failures.get_mut(table) {
        Some(remaining) if *remaining > 0 => {
            *remaining -= 1;
            true
        }
        _ => false,
    }
}

fn check_foreign_keys(state: &MemoryState, table: &str, row: &RemoteRow) -> RemoteResult<()> {
    for rule in state.foreign_keys.iter().filter(|rule| rule.table == table) {
        let Some(value) = row.fields.get(&rule.field).and_then(Value::as_str) else {
            continue;
        };
        let present = value.parse::<RecordId>().is_ok_and(|parent_id| {
            state
                .tables
                .get(&rule.parent)
                .is_some_and(|rows| rows.contains_key(&parent_id))
        });
        if !present {
            return Err(RemoteError::Status {
                status: 409,
                message: format!(
                    "insert or update on table \"{table}\" violates foreign key on \"{}\"",
                    rule.field
                ),
            });
        }
    }
    Ok(())
}

#[async_trait]
impl RemoteClient for InMemoryRemote {
    async fn select(&self, table: &str, filter: RemoteFilter) -> RemoteResult<Vec<RemoteRow>> {
        self.simulate_latency().await;
        let mut state = self.lock();
        state.calls.push(RemoteCall::Select {
            table: table.to_string(),
            filter,
        });
        if take_failure(&mut state.select_failures, table) {
            return Err(RemoteError::Unavailable(format!("select {table}")));
        }

        let mut rows: Vec<RemoteRow> = state
            .tables
            .get(table)
            .map(|rows| {
                rows.values()
                    .filter(|row| filter.matches(row))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        rows.sort_by(|a, b| a.updated_at.cmp(&b.updated_at).then(a.id.cmp(&b.id)));
        Ok(rows)
    }

    async fn upsert(&self, table: &str, rows: &[RemoteRow]) -> RemoteResult<UpsertAck> {
        self.simulate_latency().await;
        let mut state = self.lock();
        state.calls.push(RemoteCall::Upsert {
            table: table.to_string(),
            ids: rows.iter().map(|row| row.id).collect(),
        });
        if take_failure(&mut state.upsert_failures, table) {
            return Err(RemoteError::Unavailable(format!("upsert {table}")));
        }

        for row in rows {
            if let Some(message) = state.rejected.get(&row.id) {
                return Err(RemoteError::Status {
                    status: 422,
                    message: message.clone(),
                });
            }
            check_foreign_keys(&state, table, row)?;
        }

        let stored = state.tables.entry(table.to_string()).or_default();
        for row in rows {
            stored.insert(row.id, row.clone());
        }
        Ok(UpsertAck { rows: rows.len() })
    }

    async fn subscribe(&self, topic: &str) -> RemoteResult<RealtimeStream> {
        let mut state = self.lock();
        state.calls.push(RemoteCall::Subscribe {
            topic: topic.to_string(),
        });
        if state.subscribe_failures > 0 {
            state.subscribe_failures -= 1;
            return Err(RemoteError::Realtime("subscribe refused".to_string()));
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        state.subscribers.push(tx);
        Ok(futures::stream::poll_fn(move |cx| rx.poll_recv(cx)).boxed())
    }

    async fn version_policy(&self, platform: &str) -> RemoteResult<VersionPolicy> {
        let mut state = self.lock();
        state.calls.push(RemoteCall::VersionPolicy {
            platform: platform.to_string(),
        });
        Ok(state.version_policy.unwrap_or(VersionPolicy {
            min_version: SemVer::new(0, 0, 0),
            current_version: SemVer::new(0, 0, 0),
        }))
    }
}
