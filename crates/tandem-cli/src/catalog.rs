//! Entity types this application syncs.
//!
//! `profiles` is read-only directory data; `listings` and `tasks` are edited
//! locally. Tasks belong to a listing and carry a `claims` collection that
//! several users may append to concurrently.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tandem_core::models::{
    decode_payload, EntityRole, ForeignKey, KeyedCollection, RESERVED_FIELDS,
};
use tandem_core::{RecordId, SyncSchema, Syncable};

use crate::cli::EntityKind;
use crate::error::CliError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub display_name: String,
    /// Object key of the avatar in the storage bucket
    #[serde(default)]
    pub avatar_key: Option<String>,
    /// Hex SHA-256 of the avatar bytes
    #[serde(default)]
    pub avatar_hash: Option<String>,
}

impl Syncable for Profile {
    const TABLE: &'static str = "profiles";
    const ROLE: EntityRole = EntityRole::Reference;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    pub title: String,
    #[serde(default)]
    pub address: Option<String>,
}

impl Syncable for Listing {
    const TABLE: &'static str = "listings";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    pub user_id: String,
    #[serde(default)]
    pub claimed_at: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub listing_id: RecordId,
    pub title: String,
    #[serde(default)]
    pub done: bool,
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

/// Parents before children.
pub fn schema() -> Result<SyncSchema, CliError> {
    Ok(SyncSchema::new()
        .register::<Profile>()?
        .register::<Listing>()?
        .register::<Task>()?)
}

impl EntityKind {
    pub const fn table(self) -> &'static str {
        match self {
            Self::Profiles => Profile::TABLE,
            Self::Listings => Listing::TABLE,
            Self::Tasks => Task::TABLE,
        }
    }
}

/// Parse `raw` as a JSON object that decodes as `kind`.
pub fn parse_payload(kind: EntityKind, raw: &str) -> Result<Map<String, Value>, CliError> {
    let payload = match serde_json::from_str::<Value>(raw)? {
        Value::Object(map) => map,
        _ => {
            return Err(CliError::InvalidPayload(
                "expected a JSON object".to_string(),
            ))
        }
    };

    if let Some(field) = RESERVED_FIELDS.iter().find(|field| payload.contains_key(**field)) {
        return Err(CliError::InvalidPayload(format!(
            "'{field}' is managed by sync and cannot be set"
        )));
    }

    let checked = match kind {
        EntityKind::Profiles => decode_payload::<Profile>(&payload).map(|_| ()),
        EntityKind::Listings => decode_payload::<Listing>(&payload).map(|_| ()),
        EntityKind::Tasks => decode_payload::<Task>(&payload).map(|_| ()),
    };
    checked.map_err(|error| CliError::InvalidPayload(error.to_string()))?;
    Ok(payload)
}
