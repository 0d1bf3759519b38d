use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] keel_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Record payload must be a JSON object with a string `id` field")]
    InvalidPayload,
    #[error("Record ID cannot be empty")]
    EmptyRecordId,
    #[error("Not a valid operation id: {0}")]
    InvalidOperationId(String),
    #[error("Merge resolution requires --data with the merged record JSON")]
    MergeRequiresData,
    #[error(
        "Sync is not configured. Set KEEL_API_TOKEN (and optionally KEEL_SYNC_ENDPOINT) to enable `keel sync`."
    )]
    SyncNotConfigured,
}
