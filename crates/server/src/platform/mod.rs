//! External collaborators: project catalog, repository files, user
//! credentials and the compute backend.
//!
//! Everything here is injected into the coordinator and consumers as a trait
//! object; [`http`] holds the production clients.

pub mod http;

pub use http::{HttpComputeBackend, HttpPlatform};

use async_trait::async_trait;
use ember_core::{Account, CommitHash, InstanceInfo, ProjectId, ProjectRef, ResourceLevel};
use thiserror::Error;

/// Collaborator and backend failures.
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("request rejected ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid response: {0}")]
    Decode(String),
}

impl PlatformError {
    /// Whether retrying the same call later may succeed: connection
    /// failures, throttling and server-side errors.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Rejected { status, .. } => *status == 429 || *status >= 500,
            Self::NotFound(_) | Self::Decode(_) => false,
        }
    }
}

impl From<reqwest::Error> for PlatformError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Decode(e.to_string())
        } else {
            Self::Transport(e.to_string())
        }
    }
}

impl From<ember_core::Error> for PlatformError {
    fn from(e: ember_core::Error) -> Self {
        Self::Decode(e.to_string())
    }
}

pub type PlatformResult<T> = std::result::Result<T, PlatformError>;

/// Project metadata needed to serve it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProjectSummary {
    pub project: ProjectRef,
    /// Repository name of the project.
    pub name: String,
    pub is_private: bool,
}

/// A file inside a directory of a project repository.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RepoDirFile {
    pub owner: Account,
    pub repo_name: String,
    pub dir: String,
    pub file: String,
}

/// Result of a successful backend allocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Allocation {
    /// Initial lease duration in seconds.
    pub lease_secs: u64,
    /// Reachable endpoint, if the backend already knows it.
    pub access_url: Option<String>,
}

/// Project catalog.
#[async_trait]
pub trait ProjectRepo: Send + Sync {
    /// Get a project summary. Unknown projects are `PlatformError::NotFound`.
    async fn get_summary(&self, owner: &Account, id: &ProjectId) -> PlatformResult<ProjectSummary>;

    /// Resource level hint of a project, if one is assigned.
    async fn resource_level(&self, project: &ProjectRef) -> PlatformResult<Option<ResourceLevel>>;
}

/// Resolves the last commit touching a file of a repository.
#[async_trait]
pub trait CommitResolver: Send + Sync {
    /// Returns `None` when the file does not exist.
    async fn resolve(&self, file: &RepoDirFile) -> PlatformResult<Option<CommitHash>>;
}

/// User directory.
#[async_trait]
pub trait UserRepo: Send + Sync {
    /// Credential the compute backend accepts on behalf of `account`.
    async fn platform_token(&self, account: &Account) -> PlatformResult<String>;
}

/// Remote compute provisioning backend.
#[async_trait]
pub trait ComputeBackend: Send + Sync {
    /// Start an instance.
    async fn allocate(&self, instance: &InstanceInfo, user_token: &str)
    -> PlatformResult<Allocation>;

    /// Lease duration the backend would grant the instance right now.
    async fn survival_time(&self, instance: &InstanceInfo) -> PlatformResult<u64>;

    /// Extend the instance's lease by `extension_secs`.
    async fn extend(&self, instance: &InstanceInfo, extension_secs: i64) -> PlatformResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rejected(status: u16) -> PlatformError {
        PlatformError::Rejected {
            status,
            body: String::new(),
        }
    }

    #[test]
    fn test_transient_errors() {
        assert!(PlatformError::Transport("connection reset".to_string()).is_transient());
        assert!(rejected(500).is_transient());
        assert!(rejected(503).is_transient());
        assert!(rejected(429).is_transient());

        assert!(!rejected(400).is_transient());
        assert!(!rejected(422).is_transient());
        assert!(!PlatformError::NotFound("x".to_string()).is_transient());
        assert!(!PlatformError::Decode("x".to_string()).is_transient());
    }
}
