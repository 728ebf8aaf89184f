//! tandem-core - Core library for Tandem
//!
//! Offline-first record synchronization between a local `SQLite` store and a
//! hosted tabular backend. The local store is the source of truth for the
//! UI; the `SyncOrchestrator` reconciles it with the remote in dependency
//! order, keeps unsynced local edits authoritative, and turns realtime
//! change notifications into coalesced sync runs.

pub mod assets;
pub mod config;
pub mod conflict;
pub mod engine;
pub mod error;
pub mod models;
pub mod orchestrator;
pub mod realtime;
pub mod remote;
pub mod store;
pub mod util;
pub mod version;

pub use config::{BackendConfig, RetryPolicy, SyncSettings};
pub use error::{Error, Result};
pub use models::{
    ActorId, Record, RecordId, SyncMode, SyncReport, SyncSchema, SyncState, SyncStatus, Syncable,
};
pub use orchestrator::SyncOrchestrator;
pub use remote::{PostgrestRemote, RemoteClient, RemoteError};
pub use store::LocalStore;
