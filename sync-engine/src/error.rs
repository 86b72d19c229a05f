use sync_traits::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Checkpoint {checkpoint_id} not found")]
    CheckpointNotFound { checkpoint_id: String },

    #[error("Sync already in progress for {source_name}/{entity}")]
    SyncInProgress { source_name: String, entity: String },

    #[error("Source fetch failed: {0}")]
    Fetch(String),

    #[error(
        "Memory safety: first page returned {rows} rows, over the absolute ceiling of {ceiling}"
    )]
    MemorySafety { rows: usize, ceiling: usize },

    #[error("Source returned rows out of key order (id {id} after {last_seen_id})")]
    OutOfOrder { id: i64, last_seen_id: i64 },

    #[error("Invalid checkpoint ID: {0}")]
    InvalidCheckpointId(String),

    #[error("Invalid sync status: {0}")]
    InvalidStatus(String),

    #[error("Invalid sync mode: {0}")]
    InvalidSyncMode(String),

    #[error("Invalid state transition from {from} to {to}: {reason}")]
    InvalidStateTransition {
        from: String,
        to: String,
        reason: String,
    },

    #[error("Target store error: {0}")]
    Store(#[from] StoreError),

    #[error("Database error: {0}")]
    Database(String),
}

pub type Result<T> = std::result::Result<T, SyncError>;
