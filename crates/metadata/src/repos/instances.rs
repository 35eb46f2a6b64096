//! Inference instance repository.

use crate::error::MetadataResult;
use async_trait::async_trait;
use ember_core::{Fingerprint, InstanceDetail, InstanceDraft, InstanceId, InstanceRecord};

/// Version token for the record set of one fingerprint.
///
/// Every successful insert for a fingerprint bumps its generation, so a
/// writer holding an older generation knows someone else created a record
/// since it last looked.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Generation(pub i64);

/// Records stored for a fingerprint, in store order, plus the generation
/// they were read at.
#[derive(Clone, Debug, Default)]
pub struct FingerprintSnapshot {
    pub records: Vec<InstanceRecord>,
    pub generation: Generation,
}

/// Repository for inference instance operations.
#[async_trait]
pub trait InstanceRepo: Send + Sync {
    /// Get all records for a fingerprint in insertion order, with the
    /// fingerprint's current generation.
    async fn find_by_fingerprint(
        &self,
        fingerprint: &Fingerprint,
    ) -> MetadataResult<FingerprintSnapshot>;

    /// Insert a new pending record if the fingerprint is still at `expected`.
    ///
    /// Returns the generated instance ID. Returns
    /// `MetadataError::DuplicateCreation` if another insert for the same
    /// fingerprint happened after `expected` was read. The generation check
    /// and the insert are atomic.
    async fn insert_if_generation_matches(
        &self,
        draft: &InstanceDraft,
        expected: Generation,
    ) -> MetadataResult<InstanceId>;

    /// Apply the non-empty fields of `detail` to a record (last writer wins).
    /// Returns `MetadataError::NotFound` for an unknown ID.
    async fn update_detail(&self, id: InstanceId, detail: &InstanceDetail) -> MetadataResult<()>;

    /// Get a record by ID.
    async fn find_by_id(&self, id: InstanceId) -> MetadataResult<Option<InstanceRecord>>;
}
