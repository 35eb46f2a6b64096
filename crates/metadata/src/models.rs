//! Database models mapping to the metadata schema.

use crate::error::{MetadataError, MetadataResult};
use ember_core::{
    Account, CommitHash, Fingerprint, InstanceId, InstanceInfo, InstanceRecord, InstanceState,
    ProjectId, ProjectRef, ResourceLevel,
};
use sqlx::FromRow;
use uuid::Uuid;

/// Inference instance record.
#[derive(Debug, Clone, FromRow)]
pub struct InstanceRow {
    pub instance_id: Uuid,
    pub owner: String,
    pub project_id: String,
    pub last_commit: String,
    pub project_name: String,
    pub resource_level: Option<String>,
    pub requester: String,
    pub access_url: Option<String>,
    pub error: Option<String>,
    /// Lease end in unix seconds, NULL until allocated.
    pub expiry: Option<i64>,
    pub created_at: i64,
}

impl TryFrom<InstanceRow> for InstanceRecord {
    type Error = MetadataError;

    fn try_from(row: InstanceRow) -> MetadataResult<Self> {
        let corrupt =
            |e: ember_core::Error| MetadataError::Internal(format!("corrupt instance row: {e}"));

        let project = ProjectRef::new(
            Account::parse(row.owner).map_err(corrupt)?,
            ProjectId::parse(row.project_id).map_err(corrupt)?,
        );
        let fingerprint =
            Fingerprint::new(project, CommitHash::parse(row.last_commit).map_err(corrupt)?);
        let resource_level = row
            .resource_level
            .filter(|level| !level.is_empty())
            .map(ResourceLevel::parse)
            .transpose()
            .map_err(corrupt)?;

        Ok(InstanceRecord {
            info: InstanceInfo {
                id: InstanceId::from_uuid(row.instance_id),
                fingerprint,
                project_name: row.project_name,
                resource_level,
                requester: Account::parse(row.requester).map_err(corrupt)?,
            },
            state: InstanceState::from_parts(row.access_url, row.error, row.expiry),
            created_at: row.created_at,
        })
    }
}
