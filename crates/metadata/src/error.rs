//! Metadata store error types.

use thiserror::Error;

/// Metadata store operation errors.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("not found: {0}")]
    NotFound(String),

    /// Another writer inserted a record for the same fingerprint after the
    /// caller read its generation.
    #[error("duplicate creation: {0}")]
    DuplicateCreation(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid update: {0}")]
    InvalidUpdate(#[from] ember_core::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl MetadataError {
    /// Whether this is the optimistic-concurrency conflict outcome.
    pub fn is_duplicate_creation(&self) -> bool {
        matches!(self, Self::DuplicateCreation(_))
    }
}

/// Result type for metadata operations.
pub type MetadataResult<T> = std::result::Result<T, MetadataError>;
