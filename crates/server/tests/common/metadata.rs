//! Metadata store test utilities.

use ember_core::{
    Account, CommitHash, Fingerprint, InstanceDetail, InstanceDraft, InstanceId, ProjectId,
    ProjectRef,
};
use ember_metadata::{InstanceRepo, MetadataResult, MetadataStore, SqliteStore};
use std::sync::Arc;
use tempfile::TempDir;

/// A test metadata store wrapper that cleans up on drop.
#[allow(dead_code)]
pub struct TestMetadata {
    pub store: Arc<dyn MetadataStore>,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestMetadata {
    /// Create a new SQLite store in a temporary directory.
    pub async fn new() -> MetadataResult<Self> {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let db_path = temp_dir.path().join("test.db");
        let store = SqliteStore::new(&db_path).await?;

        Ok(Self {
            store: Arc::new(store),
            _temp_dir: temp_dir,
        })
    }

    /// Get a reference to the metadata store.
    pub fn store(&self) -> Arc<dyn MetadataStore> {
        self.store.clone()
    }

    /// The store as a plain instance repository.
    pub fn instances(&self) -> Arc<dyn InstanceRepo> {
        self.store.clone()
    }
}

#[allow(dead_code)]
pub fn account(name: &str) -> Account {
    Account::parse(name).unwrap()
}

#[allow(dead_code)]
pub fn project_ref(owner: &str, id: &str) -> ProjectRef {
    ProjectRef::new(account(owner), ProjectId::parse(id).unwrap())
}

#[allow(dead_code)]
pub fn fingerprint(owner: &str, id: &str, commit: &str) -> Fingerprint {
    Fingerprint::new(project_ref(owner, id), CommitHash::parse(commit).unwrap())
}

#[allow(dead_code)]
pub fn draft(fingerprint: &Fingerprint, created_at: i64) -> InstanceDraft {
    InstanceDraft {
        fingerprint: fingerprint.clone(),
        project_name: "demo".to_string(),
        resource_level: None,
        requester: account("bob"),
        created_at,
    }
}

/// Insert a record at the fingerprint's current generation, optionally
/// applying a detail update afterwards.
#[allow(dead_code)]
pub async fn seed(
    store: &dyn InstanceRepo,
    fingerprint: &Fingerprint,
    created_at: i64,
    detail: Option<InstanceDetail>,
) -> InstanceId {
    let snapshot = store.find_by_fingerprint(fingerprint).await.unwrap();
    let id = store
        .insert_if_generation_matches(&draft(fingerprint, created_at), snapshot.generation)
        .await
        .unwrap();
    if let Some(detail) = detail {
        store.update_detail(id, &detail).await.unwrap();
    }
    id
}
