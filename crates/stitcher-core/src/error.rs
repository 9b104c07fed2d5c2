use crate::types::EntityId;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, StitchError>;

#[derive(Debug, Error)]
pub enum StitchError {
    #[error("Storage error: {0}")]
    Storage(#[from] redb::Error),

    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("Storage operation error: {0}")]
    StorageOperation(#[from] redb::StorageError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Delimited record error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Entity not found: {0}")]
    EntityNotFound(EntityId),

    #[error("Data source not found: {0}")]
    DataSourceNotFound(String),

    #[error("Stitch not found: version {version}, id {id}")]
    StitchNotFound { version: u32, id: String },

    #[error("Invalid relationship: {reason}")]
    InvalidRelationship { reason: String },

    #[error("Unknown stitch key: {0}")]
    UnknownStitchKey(String),

    #[error("Job {fingerprint} failed: {reason}")]
    Job { fingerprint: String, reason: String },

    #[error("Validation error: {0}")]
    Validation(String),
}
