//! Project references and the fingerprint that keys instance reuse.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum account name length accepted by the platform.
const MAX_ACCOUNT_LEN: usize = 40;

/// Platform account name (project owner or requester).
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Account(String);

impl Account {
    /// Parse and validate an account name.
    pub fn parse(s: impl Into<String>) -> Result<Self> {
        let s = s.into();
        if s.is_empty() || s.len() > MAX_ACCOUNT_LEN {
            return Err(Error::InvalidAccount(format!(
                "length must be between 1 and {MAX_ACCOUNT_LEN}: {s:?}"
            )));
        }
        if !s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        {
            return Err(Error::InvalidAccount(format!(
                "unexpected character in {s:?}"
            )));
        }
        Ok(Self(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Account {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(value)
    }
}

impl From<Account> for String {
    fn from(value: Account) -> Self {
        value.0
    }
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Account({})", self.0)
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque project identifier assigned by the platform.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProjectId(String);

impl ProjectId {
    pub fn parse(s: impl Into<String>) -> Result<Self> {
        let s = s.into();
        if s.trim().is_empty() {
            return Err(Error::InvalidProjectId("empty project id".to_string()));
        }
        Ok(Self(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ProjectId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(value)
    }
}

impl From<ProjectId> for String {
    fn from(value: ProjectId) -> Self {
        value.0
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Immutable reference to the project being served.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProjectRef {
    pub owner: Account,
    pub id: ProjectId,
}

impl ProjectRef {
    pub fn new(owner: Account, id: ProjectId) -> Self {
        Self { owner, id }
    }
}

impl fmt::Display for ProjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.id)
    }
}

/// Content hash of a project's boot directory at request time.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CommitHash(String);

impl CommitHash {
    pub fn parse(s: impl Into<String>) -> Result<Self> {
        let s = s.into();
        if s.is_empty() {
            return Err(Error::InvalidCommit("empty commit hash".to_string()));
        }
        if !s.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(Error::InvalidCommit(format!("not a hash: {s:?}")));
        }
        Ok(Self(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for CommitHash {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(value)
    }
}

impl From<CommitHash> for String {
    fn from(value: CommitHash) -> Self {
        value.0
    }
}

impl fmt::Display for CommitHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of "the same running instance".
///
/// Two requests with equal fingerprints want the same instance. A new commit
/// of the boot artifact yields a different fingerprint, so a live instance of
/// the previous commit is never reused for it.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint {
    pub project: ProjectRef,
    pub last_commit: CommitHash,
}

impl Fingerprint {
    pub fn new(project: ProjectRef, last_commit: CommitHash) -> Self {
        Self {
            project,
            last_commit,
        }
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.project, self.last_commit)
    }
}

/// Compute resource level hint attached to a project.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceLevel(String);

impl ResourceLevel {
    pub fn parse(s: impl Into<String>) -> Result<Self> {
        let s = s.into();
        if s.trim().is_empty() {
            return Err(Error::InvalidResourceLevel("empty level".to_string()));
        }
        Ok(Self(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ResourceLevel {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(value)
    }
}

impl From<ResourceLevel> for String {
    fn from(value: ResourceLevel) -> Self {
        value.0
    }
}

impl fmt::Display for ResourceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
