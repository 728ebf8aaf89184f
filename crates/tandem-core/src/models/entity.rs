//! Entity type handlers and the dependency-ordered sync schema.

use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Wire columns owned by the coordinator, never part of a payload.
pub const RESERVED_FIELDS: [&str; 3] = ["id", "created_at", "updated_at"];

/// Whether the local actor ever mutates an entity type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityRole {
    /// Mutated locally, synced in both directions
    Owned,
    /// Read-only directory data: always synced down first, never pushed
    Reference,
}

/// A payload field holding the id of a record in another table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForeignKey {
    pub field: &'static str,
    pub table: &'static str,
}

/// A payload array of objects whose elements are identified by `key`.
///
/// Such collections merge by union when the local record is authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyedCollection {
    pub field: &'static str,
    pub key: &'static str,
}

/// A concrete business type that participates in sync.
pub trait Syncable: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Remote table name, also the local `table_name` column.
    const TABLE: &'static str;
    const ROLE: EntityRole = EntityRole::Owned;

    fn references() -> &'static [ForeignKey] {
        &[]
    }

    fn collections() -> &'static [KeyedCollection] {
        &[]
    }

    /// Whether a full sync may delete local rows missing from the remote.
    fn reconcile_orphans() -> bool {
        true
    }
}

/// Object-safe view of an entity type used by the sync engines.
pub trait EntityHandler: Send + Sync {
    fn table(&self) -> &'static str;
    fn role(&self) -> EntityRole;
    fn references(&self) -> &'static [ForeignKey];
    fn collections(&self) -> &'static [KeyedCollection];
    fn reconcile_orphans(&self) -> bool;

    /// Check that a payload decodes as this entity type.
    fn validate(&self, payload: &Map<String, Value>) -> Result<()>;
}

/// Adapts a [`Syncable`] type to [`EntityHandler`].
pub struct TypedHandler<T>(PhantomData<fn() -> T>);

impl<T> TypedHandler<T> {
    #[must_use]
    pub const fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for TypedHandler<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Syncable> EntityHandler for TypedHandler<T> {
    fn table(&self) -> &'static str {
        T::TABLE
    }

    fn role(&self) -> EntityRole {
        T::ROLE
    }

    fn references(&self) -> &'static [ForeignKey] {
        T::references()
    }

    fn collections(&self) -> &'static [KeyedCollection] {
        T::collections()
    }

    fn reconcile_orphans(&self) -> bool {
        T::reconcile_orphans()
    }

    fn validate(&self, payload: &Map<String, Value>) -> Result<()> {
        decode_payload::<T>(payload).map(|_| ())
    }
}

/// Serialize a business value into a record payload.
pub fn encode_payload<T: Serialize>(value: &T) -> Result<Map<String, Value>> {
    match serde_json::to_value(value)? {
        Value::Object(map) => {
            if let Some(field) = RESERVED_FIELDS.iter().find(|field| map.contains_key(**field)) {
                return Err(Error::InvalidInput(format!(
                    "Payload must not contain reserved field '{field}'"
                )));
            }
            Ok(map)
        }
        other => Err(Error::InvalidInput(format!(
            "Payload must serialize to a JSON object, got {other}"
        ))),
    }
}

/// Deserialize a record payload into its business type.
pub fn decode_payload<T: DeserializeOwned>(payload: &Map<String, Value>) -> Result<T> {
    Ok(serde_json::from_value(Value::Object(payload.clone()))?)
}

/// Explicit, topologically ordered list of entity handlers.
///
/// Registration order is the dependency order: a type may only reference
/// itself or types registered before it.
#[derive(Clone, Default)]
pub struct SyncSchema {
    handlers: Vec<Arc<dyn EntityHandler>>,
}

impl SyncSchema {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T: Syncable>(self) -> Result<Self> {
        self.register_handler(Arc::new(TypedHandler::<T>::new()))
    }

    pub fn register_handler(mut self, handler: Arc<dyn EntityHandler>) -> Result<Self> {
        let table = handler.table();
        if self.handler(table).is_some() {
            return Err(Error::InvalidInput(format!(
                "Entity type '{table}' is already registered"
            )));
        }

        for reference in handler.references() {
            if reference.table == table {
                continue;
            }
            let Some(parent) = self.handler(reference.table) else {
                return Err(Error::InvalidInput(format!(
                    "Entity type '{table}' references '{}' which must be registered first",
                    reference.table
                )));
            };
            if handler.role() == EntityRole::Reference && parent.role() == EntityRole::Owned {
                return Err(Error::InvalidInput(format!(
                    "Reference type '{table}' cannot depend on owned type '{}'",
                    reference.table
                )));
            }
        }

        self.handlers.push(handler);
        Ok(self)
    }

    pub fn handler(&self, table: &str) -> Option<&Arc<dyn EntityHandler>> {
        self.handlers.iter().find(|handler| handler.table() == table)
    }

    /// Look up a handler, failing for unregistered tables.
    pub fn require(&self, table: &str) -> Result<&Arc<dyn EntityHandler>> {
        self.handler(table)
            .ok_or_else(|| Error::UnknownEntity(table.to_string()))
    }

    pub fn tables(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.handlers.iter().map(|handler| handler.table())
    }

    /// Down-sync order: reference types first, then owned types.
    pub fn down_order(&self) -> Vec<Arc<dyn EntityHandler>> {
        let references = self
            .handlers
            .iter()
            .filter(|handler| handler.role() == EntityRole::Reference);
        let owned = self
            .handlers
            .iter()
            .filter(|handler| handler.role() == EntityRole::Owned);
        references.chain(owned).cloned().collect()
    }

    /// Up-sync order: owned types only, parents before children.
    pub fn up_order(&self) -> Vec<Arc<dyn EntityHandler>> {
        self.handlers
            .iter()
            .filter(|handler| handler.role() == EntityRole::Owned)
            .cloned()
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for SyncSchema {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_list()
            .entries(self.handlers.iter().map(|handler| handler.table()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize)]
    struct Profile {
        name: String,
    }

    impl Syncable for Profile {
        const TABLE: &'static str = "profiles";
        const ROLE: EntityRole = EntityRole::Reference;
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct Project {
        title: String,
    }

    impl Syncable for Project {
        const TABLE: &'static str = "projects";
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct Task {
        project_id: String,
        title: String,
    }

    impl Syncable for Task {
        const TABLE: &'static str = "tasks";

        fn references() -> &'static [ForeignKey] {
            &[ForeignKey {
                field: "project_id",
                table: "projects",
            }]
        }
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct Badge {
        project_id: String,
    }

    impl Syncable for Badge {
        const TABLE: &'static str = "badges";
        const ROLE: EntityRole = EntityRole::Reference;

        fn references() -> &'static [ForeignKey] {
            &[ForeignKey {
                field: "project_id",
                table: "projects",
            }]
        }
    }

    fn table_names(handlers: &[Arc<dyn EntityHandler>]) -> Vec<&'static str> {
        handlers.iter().map(|handler| handler.table()).collect()
    }

    #[test]
    fn test_down_order_puts_reference_types_first() {
        let schema = SyncSchema::new()
            .register::<Project>()
            .unwrap()
            .register::<Task>()
            .unwrap()
            .register::<Profile>()
            .unwrap();

        assert_eq!(
            table_names(&schema.down_order()),
            vec!["profiles", "projects", "tasks"]
        );
        assert_eq!(table_names(&schema.up_order()), vec!["projects", "tasks"]);
    }

    #[test]
    fn test_child_before_parent_is_rejected() {
        let error = SyncSchema::new().register::<Task>().unwrap_err();
        assert!(error.to_string().contains("must be registered first"));
    }

    #[test]
    fn test_duplicate_registration_is_rejected() {
        let result = SyncSchema::new()
            .register::<Project>()
            .unwrap()
            .register::<Project>();
        assert!(result.is_err());
    }

    #[test]
    fn test_reference_type_cannot_depend_on_owned_type() {
        let result = SyncSchema::new()
            .register::<Project>()
            .unwrap()
            .register::<Badge>();
        assert!(result.is_err());
    }

    #[test]
    fn test_encode_payload_rejects_reserved_fields() {
        let payload = serde_json::json!({ "id": "x", "title": "t" });
        assert!(encode_payload(&payload).is_err());
        assert!(encode_payload(&"not an object").is_err());

        let map = encode_payload(&Project {
            title: "Roadmap".to_string(),
        })
        .unwrap();
        let decoded: Project = decode_payload(&map).unwrap();
        assert_eq!(decoded.title, "Roadmap");
    }

    #[test]
    fn test_typed_handler_validates_payload_shape() {
        let handler = TypedHandler::<Task>::new();
        let mut payload = Map::new();
        payload.insert("title".to_string(), Value::from("no project"));
        assert!(handler.validate(&payload).is_err());

        payload.insert("project_id".to_string(), Value::from("p1"));
        assert!(handler.validate(&payload).is_ok());
    }
}
