//! Error types for tandem-core

use thiserror::Error;

use crate::remote::RemoteError;

/// Result type alias using tandem-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in tandem-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// `SQLite` error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Record not found
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Table name that no registered handler claims
    #[error("Unknown entity type: {0}")]
    UnknownEntity(String),

    /// Remote backend error
    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    /// The run was cancelled before it finished
    #[error("Sync run cancelled")]
    Cancelled,

    /// The coordinator no longer accepts work
    #[error("Sync coordinator is shutting down")]
    ShuttingDown,

    /// The local store handle was released
    #[error("Local store is closed")]
    StoreClosed,

    /// Client version is below the server-held minimum
    #[error("Client version {client} is no longer supported (minimum {min})")]
    UpdateRequired { client: String, min: String },

    /// Asset file storage error
    #[error("Storage error: {0}")]
    Storage(String),
}

impl Error {
    /// Whether retrying the same operation later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Remote(error) => error.is_transient(),
            Self::Database(rusqlite::Error::SqliteFailure(failure, _)) => matches!(
                failure.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}
