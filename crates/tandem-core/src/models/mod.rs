//! Data models for Tandem

mod entity;
mod record;
mod status;
mod sync_conflict;

pub use entity::{
    decode_payload, encode_payload, EntityHandler, EntityRole, ForeignKey, KeyedCollection,
    SyncSchema, Syncable, TypedHandler, RESERVED_FIELDS,
};
pub use record::{ActorId, Record, RecordId, SyncRunId, SyncState};
pub use status::{SyncMode, SyncReport, SyncStatus, TableReport};
pub use sync_conflict::{ConflictWinner, SyncConflict};
