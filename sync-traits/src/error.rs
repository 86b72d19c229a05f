use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Source query failed: {0}")]
    Query(String),

    #[error("Bulk write failed: {0}")]
    BulkWrite(String),

    #[error("Record write failed for key {key}: {message}")]
    RecordWrite { key: i64, message: String },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Connection error: {0}")]
    Connection(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
