//! Conflict policy: decides whether an incoming remote row may overwrite a
//! local record.
//!
//! The default [`LocalAuthoritativePolicy`] is last-write-wins gated by sync
//! state: a record with unsynced local edits keeps its scalar fields. A record
//! being pushed is still `pending` until the push is confirmed, so in-flight
//! writes fall under the same rule. Keyed child collections still merge
//! against the last synced payload: children another actor added since then
//! are folded in, children removed locally stay removed.

use std::collections::HashSet;

use serde_json::{Map, Value};

use crate::models::{KeyedCollection, Record};
use crate::remote::RemoteRow;

/// Strategy name written to the conflict log.
pub const LOCAL_AUTHORITATIVE: &str = "local-authoritative";

/// Outcome of resolving one local/remote pair.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Keep the local record. `merged` carries a payload with remote
    /// collection children folded in, when there was anything to add.
    KeepLocal {
        merged: Option<Map<String, Value>>,
    },
    /// Overwrite the local record with the remote row.
    TakeRemote,
}

pub trait ConflictPolicy: Send + Sync {
    /// Name recorded in the conflict log.
    fn name(&self) -> &'static str;

    /// `base` is the payload the remote last confirmed for this record,
    /// `None` when it was never synced.
    fn resolve(
        &self,
        local: &Record,
        base: Option<&Map<String, Value>>,
        remote: &RemoteRow,
        collections: &[KeyedCollection],
    ) -> Resolution;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LocalAuthoritativePolicy;

impl ConflictPolicy for LocalAuthoritativePolicy {
    fn name(&self) -> &'static str {
        LOCAL_AUTHORITATIVE
    }

    fn resolve(
        &self,
        local: &Record,
        base: Option<&Map<String, Value>>,
        remote: &RemoteRow,
        collections: &[KeyedCollection],
    ) -> Resolution {
        if local.sync_state.is_local_authoritative() {
            Resolution::KeepLocal {
                merged: merge_keyed_collections(base, &local.payload, &remote.fields, collections),
            }
        } else {
            Resolution::TakeRemote
        }
    }
}

/// Three-way merge of remote collection elements into the local payload.
///
/// Elements are matched by their key field. A remote key is appended (in
/// remote order) only when neither `base` nor the local payload holds it, so
/// a key present on both sides keeps the local element and a key removed
/// locally since the last sync is not brought back. Without a base every
/// remote-only key is added. Returns `None` when nothing was added.
pub fn merge_keyed_collections(
    base: Option<&Map<String, Value>>,
    local: &Map<String, Value>,
    remote: &Map<String, Value>,
    collections: &[KeyedCollection],
) -> Option<Map<String, Value>> {
    let mut merged = local.clone();
    let mut changed = false;

    for collection in collections {
        let Some(Value::Array(incoming)) = remote.get(collection.field) else {
            continue;
        };
        let base_elements = base.and_then(|base| base.get(collection.field));
        let base_keys = collection_keys(base_elements, collection.key);
        if incoming
            .iter()
            .filter_map(|element| element_key(element, collection.key))
            .all(|key| base_keys.contains(&key))
        {
            continue;
        }

        let entry = merged
            .entry(collection.field.to_string())
            .or_insert_with(|| Value::Array(Vec::new()));
        let Value::Array(elements) = entry else {
            // Local value is not a list; leave it alone.
            continue;
        };

        let mut known = base_keys;
        known.extend(
            elements
                .iter()
                .filter_map(|element| element_key(element, collection.key)),
        );
        for element in incoming {
            let Some(key) = element_key(element, collection.key) else {
                continue;
            };
            if known.insert(key) {
                elements.push(element.clone());
                changed = true;
            }
        }
    }

    changed.then_some(merged)
}

fn collection_keys(value: Option<&Value>, key: &str) -> HashSet<String> {
    match value {
        Some(Value::Array(elements)) => elements
            .iter()
            .filter_map(|element| element_key(element, key))
            .collect(),
        _ => HashSet::new(),
    }
}

/// Canonical text of an element's key; strings compare without quotes.
fn element_key(element: &Value, key: &str) -> Option<String> {
    match element.get(key)? {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        value => Some(value.to_string()),
    }
}
