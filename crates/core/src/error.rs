//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid account: {0}")]
    InvalidAccount(String),

    #[error("invalid project id: {0}")]
    InvalidProjectId(String),

    #[error("invalid commit hash: {0}")]
    InvalidCommit(String),

    #[error("invalid resource level: {0}")]
    InvalidResourceLevel(String),

    #[error("invalid access url: {0}")]
    InvalidAccessUrl(String),

    #[error("invalid instance id: {0}")]
    InvalidInstanceId(String),

    #[error("invalid instance state: {0}")]
    InvalidInstanceState(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
