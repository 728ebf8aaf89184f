use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] tandem_core::Error),
    #[error(transparent)]
    Remote(#[from] tandem_core::RemoteError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("No record fields provided")]
    EmptyPayload,
    #[error("Invalid record fields: {0}")]
    InvalidPayload(String),
    #[error("Record ID cannot be empty")]
    EmptyRecordId,
    #[error("Record not found for id/prefix: {0}")]
    RecordNotFound(String),
    #[error("{0}")]
    AmbiguousRecordId(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Sync finished with errors: {0}")]
    SyncFailed(String),
    #[error(
        "Backend is not configured. Run `tandem config init --backend-url <URL> --anon-key <KEY> --actor-id <ID>`, or set TANDEM_BACKEND_URL and TANDEM_ANON_KEY."
    )]
    BackendNotConfigured,
    #[error("No actor ID configured. Pass `--actor-id` to `tandem config init` or set TANDEM_ACTOR_ID.")]
    ActorNotConfigured,
}
