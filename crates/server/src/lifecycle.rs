//! Inference instance lifecycle coordination.
//!
//! [`LifecycleCoordinator`] answers create requests with at most one
//! provisioning job per fingerprint. It holds no lock: concurrent creators
//! race on the store's generation-checked insert and the losers re-read and
//! return the winner's record.

use crate::messaging::EventPublisher;
use crate::metrics;
use crate::platform::{CommitResolver, PlatformError, ProjectRepo, ProjectSummary, RepoDirFile};
use ember_core::config::LifecycleConfig;
use ember_core::{
    Account, Clock, CommitHash, ExtensionRequest, Fingerprint, InstanceDetail, InstanceDraft,
    InstanceId, InstanceRecord, LifecycleEvent, ProjectId, ProjectRef, ResourceLevel,
    ReuseDecision, ReusePolicy,
};
use ember_metadata::{InstanceRepo, MetadataError};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("project not found: {0}")]
    ProjectNotFound(ProjectRef),

    #[error("project is private: {0}")]
    PrivateProject(ProjectRef),

    #[error("repository file unavailable: {0}")]
    UnavailableRepoFile(String),

    #[error("inference instance not found: {0}")]
    InstanceNotFound(InstanceId),

    #[error("timed out waiting for inference instance {0}")]
    PollTimeout(InstanceId),

    #[error("platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("metadata error: {0}")]
    Metadata(#[from] MetadataError),

    #[error("core error: {0}")]
    Core(#[from] ember_core::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type LifecycleResult<T> = std::result::Result<T, LifecycleError>;

/// A request for an inference endpoint of a project.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreateInference {
    pub requester: Account,
    pub owner: Account,
    pub project_id: ProjectId,
}

/// What callers see of an instance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct InferenceView {
    pub inference_id: InstanceId,
    pub access_url: Option<String>,
    pub error: Option<String>,
    pub last_commit: CommitHash,
}

impl InferenceView {
    pub fn from_record(record: &InstanceRecord) -> Self {
        Self {
            inference_id: record.id(),
            access_url: record.state.access_url().map(str::to_string),
            error: record.state.error().map(str::to_string),
            last_commit: record.info.fingerprint.last_commit.clone(),
        }
    }

    /// Whether a poller can stop waiting.
    pub fn is_settled(&self) -> bool {
        self.error.is_some() || self.access_url.is_some()
    }
}

/// Orchestrates create, get and internal updates of inference instances.
pub struct LifecycleCoordinator {
    projects: Arc<dyn ProjectRepo>,
    commits: Arc<dyn CommitResolver>,
    instances: Arc<dyn InstanceRepo>,
    publisher: Arc<dyn EventPublisher>,
    clock: Arc<dyn Clock>,
    policy: ReusePolicy,
    inference_dir: String,
    boot_file: String,
}

impl LifecycleCoordinator {
    pub fn new(
        config: &LifecycleConfig,
        projects: Arc<dyn ProjectRepo>,
        commits: Arc<dyn CommitResolver>,
        instances: Arc<dyn InstanceRepo>,
        publisher: Arc<dyn EventPublisher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            projects,
            commits,
            instances,
            publisher,
            clock,
            policy: config.reuse_policy(),
            inference_dir: config.inference_dir.clone(),
            boot_file: config.boot_file.clone(),
        }
    }

    /// Return a reusable, pending or failed instance for the project's
    /// current boot artifact, creating one if none exists.
    pub async fn create(&self, cmd: &CreateInference) -> LifecycleResult<InferenceView> {
        let summary = self.summary(&cmd.owner, &cmd.project_id).await?;
        if summary.is_private {
            return Err(LifecycleError::PrivateProject(summary.project));
        }

        let resource_level = self.resource_level(&summary.project).await;
        let last_commit = self.boot_commit(&summary).await?;

        let draft = InstanceDraft {
            fingerprint: Fingerprint::new(summary.project, last_commit),
            project_name: summary.name,
            resource_level,
            requester: cmd.requester.clone(),
            created_at: self.clock.now_secs(),
        };

        self.converge(draft).await
    }

    /// Read one instance verbatim.
    pub async fn get(&self, id: InstanceId) -> LifecycleResult<InferenceView> {
        let record = self.record(id).await?;
        Ok(InferenceView::from_record(&record))
    }

    /// Read one instance of a given project. Instances of other projects are
    /// reported as not found.
    pub async fn get_for_project(
        &self,
        owner: &Account,
        project_id: &ProjectId,
        id: InstanceId,
    ) -> LifecycleResult<InferenceView> {
        let record = self.record(id).await?;
        let project = &record.info.fingerprint.project;
        if &project.owner != owner || &project.id != project_id {
            return Err(LifecycleError::InstanceNotFound(id));
        }
        Ok(InferenceView::from_record(&record))
    }

    /// Current commit of the project's boot artifact.
    ///
    /// Private projects are only visible to their owner.
    pub async fn last_commit(
        &self,
        requester: &Account,
        owner: &Account,
        project_id: &ProjectId,
    ) -> LifecycleResult<CommitHash> {
        let summary = self.summary(owner, project_id).await?;
        if summary.is_private && requester != owner {
            return Err(LifecycleError::PrivateProject(summary.project));
        }
        self.boot_commit(&summary).await
    }

    /// Apply a backend-reported update (access URL, error or expiry).
    pub async fn update_detail(
        &self,
        id: InstanceId,
        detail: &InstanceDetail,
    ) -> LifecycleResult<()> {
        detail.validate()?;
        match self.instances.update_detail(id, detail).await {
            Ok(()) => {
                tracing::info!(
                    instance_id = %id,
                    expiry = ?detail.expiry,
                    has_access_url = detail.access_url.is_some(),
                    has_error = detail.error.is_some(),
                    "Instance detail updated"
                );
                Ok(())
            }
            Err(MetadataError::NotFound(_)) => Err(LifecycleError::InstanceNotFound(id)),
            Err(e) => Err(e.into()),
        }
    }

    /// Poll an instance until it carries an access URL or an error.
    pub async fn wait_for_outcome(
        &self,
        owner: &Account,
        project_id: &ProjectId,
        id: InstanceId,
        timeout: Duration,
        interval: Duration,
    ) -> LifecycleResult<InferenceView> {
        // A timeout too large to represent never expires.
        let deadline = Instant::now().checked_add(timeout);
        loop {
            let view = self.get_for_project(owner, project_id, id).await?;
            if view.is_settled() {
                return Ok(view);
            }
            if let Some(deadline) = deadline
                && Instant::now().checked_add(interval).is_none_or(|next| next > deadline)
            {
                tracing::warn!(
                    instance_id = %id,
                    timeout_secs = timeout.as_secs(),
                    "Inference wait timed out"
                );
                return Err(LifecycleError::PollTimeout(id));
            }
            tokio::time::sleep(interval).await;
        }
    }

    async fn converge(&self, draft: InstanceDraft) -> LifecycleResult<InferenceView> {
        let snapshot = self.instances.find_by_fingerprint(&draft.fingerprint).await?;
        let decision = self.policy.decide(&snapshot.records, self.clock.now_secs());

        if decision.has_result() {
            return self.answer(&snapshot.records, decision);
        }

        match self
            .instances
            .insert_if_generation_matches(&draft, snapshot.generation)
            .await
        {
            Ok(id) => {
                let record = draft.into_record(id);
                metrics::INSTANCES_CREATED.inc();
                tracing::info!(
                    instance_id = %id,
                    fingerprint = %record.info.fingerprint,
                    replaces = ?decision.instance_id(),
                    "Inference instance created"
                );
                self.notify(LifecycleEvent::ProvisioningRequested {
                    instance: record.info.clone(),
                });
                Ok(InferenceView::from_record(&record))
            }
            Err(e) if e.is_duplicate_creation() => {
                metrics::CREATION_CONFLICTS.inc();
                tracing::debug!(
                    fingerprint = %draft.fingerprint,
                    "Lost creation race, reading the winner"
                );

                let snapshot = self.instances.find_by_fingerprint(&draft.fingerprint).await?;
                match self.policy.decide(&snapshot.records, self.clock.now_secs()) {
                    ReuseDecision::Absent => Err(LifecycleError::Internal(format!(
                        "creation conflict on {} but no instance found",
                        draft.fingerprint
                    ))),
                    decision => self.answer(&snapshot.records, decision),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Turn a decision that names an instance into the caller's view. A
    /// reusable instance also gets its lease extension requested.
    fn answer(
        &self,
        records: &[InstanceRecord],
        decision: ReuseDecision,
    ) -> LifecycleResult<InferenceView> {
        let record = decision
            .instance_id()
            .and_then(|id| records.iter().find(|r| r.id() == id))
            .ok_or_else(|| {
                LifecycleError::Internal(format!("decision without record: {decision:?}"))
            })?;

        if let ReuseDecision::Reusable { id, expiry, .. } = &decision {
            metrics::INSTANCES_REUSED.inc();
            tracing::debug!(instance_id = %id, expiry, "Reusing inference instance");
            self.notify(LifecycleEvent::ExtensionRequested(ExtensionRequest {
                instance: record.info.clone(),
                believed_expiry: *expiry,
            }));
        }

        Ok(InferenceView::from_record(record))
    }

    /// Fire-and-forget publish. Failures are logged and counted only.
    fn notify(&self, event: LifecycleEvent) {
        let kind = event.kind();
        let instance_id = event.instance_id();
        if let Err(e) = self.publisher.publish(event) {
            metrics::PUBLISH_FAILURES.with_label_values(&[kind]).inc();
            tracing::error!(
                event = kind,
                instance_id = %instance_id,
                error = %e,
                "Failed to publish lifecycle event"
            );
        }
    }

    async fn record(&self, id: InstanceId) -> LifecycleResult<InstanceRecord> {
        self.instances
            .find_by_id(id)
            .await?
            .ok_or(LifecycleError::InstanceNotFound(id))
    }

    async fn summary(&self, owner: &Account, id: &ProjectId) -> LifecycleResult<ProjectSummary> {
        match self.projects.get_summary(owner, id).await {
            Ok(summary) => Ok(summary),
            Err(PlatformError::NotFound(_)) => Err(LifecycleError::ProjectNotFound(
                ProjectRef::new(owner.clone(), id.clone()),
            )),
            Err(e) => Err(e.into()),
        }
    }

    /// Best effort: lookup failures yield no level.
    async fn resource_level(&self, project: &ProjectRef) -> Option<ResourceLevel> {
        match self.projects.resource_level(project).await {
            Ok(level) => level,
            Err(e) => {
                tracing::warn!(project = %project, error = %e, "Resource level lookup failed");
                None
            }
        }
    }

    async fn boot_commit(&self, summary: &ProjectSummary) -> LifecycleResult<CommitHash> {
        let file = RepoDirFile {
            owner: summary.project.owner.clone(),
            repo_name: summary.name.clone(),
            dir: self.inference_dir.clone(),
            file: self.boot_file.clone(),
        };

        self.commits.resolve(&file).await?.ok_or_else(|| {
            LifecycleError::UnavailableRepoFile(format!(
                "no boot file {}/{} in {}",
                file.dir, file.file, summary.project
            ))
        })
    }
}
