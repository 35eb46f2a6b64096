//! Inference instance records and their lifecycle state.

use crate::error::{Error, Result};
use crate::project::{Account, Fingerprint, ResourceLevel};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier of an inference instance, generated by the store.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(Uuid);

impl InstanceId {
    /// Generate a new random instance ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Parse from a string.
    pub fn parse(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| Error::InvalidInstanceId(format!("{s:?}: {e}")))
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for InstanceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InstanceId({})", self.0)
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of an inference instance.
///
/// A record starts `Pending`, moves exactly once to `Ready` or `Failed`, and
/// afterwards only the expiry of a `Ready` record changes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum InstanceState {
    /// Created by the optimistic insert, allocation not finished yet.
    Pending,
    /// Leased until `expiry` (unix seconds). The access URL may still be
    /// unknown if the backend reports it separately.
    Ready {
        access_url: Option<String>,
        expiry: i64,
    },
    /// Allocation failed.
    Failed { message: String },
}

impl InstanceState {
    /// Derive the state from stored columns.
    ///
    /// An error message wins over everything else; an expiry makes the
    /// record ready. Empty strings count as absent.
    pub fn from_parts(
        access_url: Option<String>,
        error: Option<String>,
        expiry: Option<i64>,
    ) -> Self {
        if let Some(message) = non_empty(error) {
            return Self::Failed { message };
        }
        match expiry {
            Some(expiry) => Self::Ready {
                access_url: non_empty(access_url),
                expiry,
            },
            None => Self::Pending,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    pub fn access_url(&self) -> Option<&str> {
        match self {
            Self::Ready { access_url, .. } => access_url.as_deref(),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Failed { message } => Some(message),
            _ => None,
        }
    }

    pub fn expiry(&self) -> Option<i64> {
        match self {
            Self::Ready { expiry, .. } => Some(*expiry),
            _ => None,
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.is_empty())
}

/// Immutable description of an instance, carried on provisioning and
/// extension messages.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceInfo {
    pub id: InstanceId,
    pub fingerprint: Fingerprint,
    pub project_name: String,
    pub resource_level: Option<ResourceLevel>,
    pub requester: Account,
}

/// A stored inference instance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub info: InstanceInfo,
    pub state: InstanceState,
    /// Creation time in unix seconds.
    pub created_at: i64,
}

impl InstanceRecord {
    pub fn id(&self) -> InstanceId {
        self.info.id
    }
}

/// An instance that has not been inserted yet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InstanceDraft {
    pub fingerprint: Fingerprint,
    pub project_name: String,
    pub resource_level: Option<ResourceLevel>,
    pub requester: Account,
    pub created_at: i64,
}

impl InstanceDraft {
    /// Attach the store-assigned ID. The result is always `Pending`.
    pub fn into_record(self, id: InstanceId) -> InstanceRecord {
        InstanceRecord {
            info: InstanceInfo {
                id,
                fingerprint: self.fingerprint,
                project_name: self.project_name,
                resource_level: self.resource_level,
                requester: self.requester,
            },
            state: InstanceState::Pending,
            created_at: self.created_at,
        }
    }
}

/// Partial update of an instance's lifecycle fields. `None` leaves a field
/// untouched.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceDetail {
    #[serde(default)]
    pub expiry: Option<i64>,
    #[serde(default)]
    pub access_url: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl InstanceDetail {
    /// Successful allocation: lease end plus the endpoint, if already known.
    pub fn leased(expiry: i64, access_url: Option<String>) -> Self {
        Self {
            expiry: Some(expiry),
            access_url,
            error: None,
        }
    }

    /// New lease end only.
    pub fn expiry(expiry: i64) -> Self {
        Self {
            expiry: Some(expiry),
            ..Self::default()
        }
    }

    /// Allocation failure.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.expiry.is_none() && self.access_url.is_none() && self.error.is_none()
    }

    /// Reject updates that would leave the record both failed and reachable.
    pub fn validate(&self) -> Result<()> {
        if self.is_empty() {
            return Err(Error::InvalidInstanceState("empty update".to_string()));
        }
        let has_error = self.error.as_deref().is_some_and(|e| !e.is_empty());
        let has_url = self.access_url.as_deref().is_some_and(|u| !u.is_empty());
        if has_error && has_url {
            return Err(Error::InvalidInstanceState(
                "error and access url are mutually exclusive".to_string(),
            ));
        }
        if let Some(url) = self.access_url.as_deref()
            && has_url
            && !(url.starts_with("http://") || url.starts_with("https://"))
        {
            return Err(Error::InvalidAccessUrl(url.to_string()));
        }
        Ok(())
    }
}
