//! In-memory collaborators.

use async_trait::async_trait;
use ember_core::{
    Account, CommitHash, InstanceId, InstanceInfo, LifecycleEvent, ProjectId, ProjectRef,
    ResourceLevel,
};
use ember_server::messaging::{EventPublisher, PublishError};
use ember_server::platform::{
    Allocation, CommitResolver, ComputeBackend, PlatformError, PlatformResult, ProjectRepo,
    ProjectSummary, RepoDirFile, UserRepo,
};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

/// Project catalog, repository and user directory in one.
#[derive(Default)]
#[allow(dead_code)]
pub struct FakePlatform {
    projects: Mutex<HashMap<(String, String), ProjectSummary>>,
    /// (owner, repo name) -> boot file commit
    commits: Mutex<HashMap<(String, String), CommitHash>>,
    levels: Mutex<HashMap<(String, String), ResourceLevel>>,
    pub fail_resource_level: AtomicBool,
    pub fail_tokens: AtomicBool,
    pub resolved_files: Mutex<Vec<RepoDirFile>>,
}

#[allow(dead_code)]
impl FakePlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a project whose repository is named `name`.
    pub fn add_project(&self, owner: &str, id: &str, name: &str, is_private: bool) {
        let summary = ProjectSummary {
            project: ProjectRef::new(
                Account::parse(owner).unwrap(),
                ProjectId::parse(id).unwrap(),
            ),
            name: name.to_string(),
            is_private,
        };
        self.projects
            .lock()
            .unwrap()
            .insert((owner.to_string(), id.to_string()), summary);
    }

    pub fn set_boot_commit(&self, owner: &str, repo_name: &str, commit: &str) {
        self.commits.lock().unwrap().insert(
            (owner.to_string(), repo_name.to_string()),
            CommitHash::parse(commit).unwrap(),
        );
    }

    pub fn remove_boot_file(&self, owner: &str, repo_name: &str) {
        self.commits
            .lock()
            .unwrap()
            .remove(&(owner.to_string(), repo_name.to_string()));
    }

    pub fn set_resource_level(&self, owner: &str, id: &str, level: &str) {
        self.levels.lock().unwrap().insert(
            (owner.to_string(), id.to_string()),
            ResourceLevel::parse(level).unwrap(),
        );
    }

    /// Token handed out for `account`.
    pub fn token_for(account: &Account) -> String {
        format!("token-{account}")
    }
}

#[async_trait]
impl ProjectRepo for FakePlatform {
    async fn get_summary(&self, owner: &Account, id: &ProjectId) -> PlatformResult<ProjectSummary> {
        self.projects
            .lock()
            .unwrap()
            .get(&(owner.to_string(), id.to_string()))
            .cloned()
            .ok_or_else(|| PlatformError::NotFound(format!("{owner}/{id}")))
    }

    async fn resource_level(&self, project: &ProjectRef) -> PlatformResult<Option<ResourceLevel>> {
        if self.fail_resource_level.load(Ordering::SeqCst) {
            return Err(PlatformError::Transport("connection refused".to_string()));
        }
        Ok(self
            .levels
            .lock()
            .unwrap()
            .get(&(project.owner.to_string(), project.id.to_string()))
            .cloned())
    }
}

#[async_trait]
impl CommitResolver for FakePlatform {
    async fn resolve(&self, file: &RepoDirFile) -> PlatformResult<Option<CommitHash>> {
        self.resolved_files.lock().unwrap().push(file.clone());
        Ok(self
            .commits
            .lock()
            .unwrap()
            .get(&(file.owner.to_string(), file.repo_name.clone()))
            .cloned())
    }
}

#[async_trait]
impl UserRepo for FakePlatform {
    async fn platform_token(&self, account: &Account) -> PlatformResult<String> {
        if self.fail_tokens.load(Ordering::SeqCst) {
            return Err(PlatformError::Rejected {
                status: 503,
                body: "user service unavailable".to_string(),
            });
        }
        Ok(Self::token_for(account))
    }
}

/// Compute backend that records every call.
#[allow(dead_code)]
pub struct FakeBackend {
    /// Lease granted on allocation.
    pub lease_secs: AtomicU64,
    /// Lease quoted by `survival_time`.
    pub survival_secs: AtomicU64,
    /// Refuse allocations with this (status, body).
    pub fail_allocate: Mutex<Option<(u16, String)>>,
    /// Fail this many allocations with a connection error first.
    pub transient_allocate_failures: AtomicUsize,
    pub fail_extend: AtomicBool,
    pub allocations: Mutex<Vec<(InstanceId, String)>>,
    pub extensions: Mutex<Vec<(InstanceId, i64)>>,
    pub survival_queries: AtomicUsize,
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self {
            lease_secs: AtomicU64::new(300),
            survival_secs: AtomicU64::new(300),
            fail_allocate: Mutex::new(None),
            transient_allocate_failures: AtomicUsize::new(0),
            fail_extend: AtomicBool::new(false),
            allocations: Mutex::new(Vec::new()),
            extensions: Mutex::new(Vec::new()),
            survival_queries: AtomicUsize::new(0),
        }
    }
}

#[allow(dead_code)]
impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Access URL reported for an instance.
    pub fn access_url(id: InstanceId) -> String {
        format!("https://compute.test/{id}")
    }

    pub fn allocation_count(&self) -> usize {
        self.allocations.lock().unwrap().len()
    }

    pub fn extension_count(&self) -> usize {
        self.extensions.lock().unwrap().len()
    }
}

#[async_trait]
impl ComputeBackend for FakeBackend {
    async fn allocate(
        &self,
        instance: &InstanceInfo,
        user_token: &str,
    ) -> PlatformResult<Allocation> {
        self.allocations
            .lock()
            .unwrap()
            .push((instance.id, user_token.to_string()));

        if self
            .transient_allocate_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(PlatformError::Transport("connection reset".to_string()));
        }
        if let Some((status, body)) = self.fail_allocate.lock().unwrap().clone() {
            return Err(PlatformError::Rejected { status, body });
        }
        Ok(Allocation {
            lease_secs: self.lease_secs.load(Ordering::SeqCst),
            access_url: Some(Self::access_url(instance.id)),
        })
    }

    async fn survival_time(&self, _instance: &InstanceInfo) -> PlatformResult<u64> {
        self.survival_queries.fetch_add(1, Ordering::SeqCst);
        Ok(self.survival_secs.load(Ordering::SeqCst))
    }

    async fn extend(&self, instance: &InstanceInfo, extension_secs: i64) -> PlatformResult<()> {
        if self.fail_extend.load(Ordering::SeqCst) {
            return Err(PlatformError::Transport("backend timeout".to_string()));
        }
        self.extensions
            .lock()
            .unwrap()
            .push((instance.id, extension_secs));
        Ok(())
    }
}

/// Publisher that keeps events for the test to deliver by hand.
#[derive(Default)]
#[allow(dead_code)]
pub struct RecordingPublisher {
    events: Mutex<Vec<LifecycleEvent>>,
    pub closed: AtomicBool,
}

#[allow(dead_code)]
impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove and return everything published so far.
    pub fn take(&self) -> Vec<LifecycleEvent> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }

    pub fn provisioning_requests(&self) -> Vec<InstanceInfo> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|event| match event {
                LifecycleEvent::ProvisioningRequested { instance } => Some(instance.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn extension_requests(&self) -> Vec<ember_core::ExtensionRequest> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|event| match event {
                LifecycleEvent::ExtensionRequested(request) => Some(request.clone()),
                _ => None,
            })
            .collect()
    }
}

impl EventPublisher for RecordingPublisher {
    fn publish(&self, event: LifecycleEvent) -> Result<(), PublishError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PublishError::Closed);
        }
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}
