//! Storage error types.

use thiserror::Error;

/// Errors from the SQLite persistence layer.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Filesystem error while preparing the database location.
    #[error("I/O error: {0}")]
    Io(String),

    /// Opening or configuring the database failed.
    #[error("connection error: {0}")]
    Connection(String),

    /// A query failed.
    #[error("query error: {0}")]
    Query(String),

    /// A stored value could not be decoded.
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl From<sqlx::Error> for StorageError {
    fn from(e: sqlx::Error) -> Self {
        Self::Query(e.to_string())
    }
}

/// Convenience alias.
pub type StorageResult<T> = Result<T, StorageError>;
