//! Asynchronous lifecycle event consumers.
//!
//! Both consumers make at most one backend round trip per delivery and are
//! never retried internally; redelivery belongs to the transport.

use crate::messaging::EventHandler;
use crate::metrics;
use crate::platform::{ComputeBackend, PlatformError, UserRepo};
use async_trait::async_trait;
use ember_core::{
    Clock, ExtensionPlan, ExtensionRequest, InstanceDetail, InstanceId, InstanceInfo,
    LeaseExtension, LifecycleEvent,
};
use ember_metadata::{InstanceRepo, MetadataError};
use std::sync::Arc;
use thiserror::Error;

/// Failures handed back to the transport for redelivery.
#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("metadata error: {0}")]
    Metadata(#[from] MetadataError),

    #[error("inference instance not found: {0}")]
    InstanceNotFound(InstanceId),
}

pub type ConsumerResult<T> = std::result::Result<T, ConsumerError>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProvisioningOutcome {
    /// Redundant delivery; the record already left `Pending`.
    AlreadySettled,
    /// Backend allocated the instance until `expiry`.
    Ready { expiry: i64 },
    /// Backend refused; the message is stored on the record.
    Failed { message: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExtensionOutcome {
    /// The believed expiry had already passed.
    Stale,
    /// Gain below the debounce threshold.
    Debounced { gain: i64 },
    Extended { new_expiry: i64 },
}

/// Allocates backend instances for freshly created records.
pub struct ProvisioningConsumer {
    users: Arc<dyn UserRepo>,
    backend: Arc<dyn ComputeBackend>,
    instances: Arc<dyn InstanceRepo>,
    clock: Arc<dyn Clock>,
}

impl ProvisioningConsumer {
    pub fn new(
        users: Arc<dyn UserRepo>,
        backend: Arc<dyn ComputeBackend>,
        instances: Arc<dyn InstanceRepo>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            users,
            backend,
            instances,
            clock,
        }
    }

    pub async fn handle(&self, instance: &InstanceInfo) -> ConsumerResult<ProvisioningOutcome> {
        let id = instance.id;
        let record = self
            .instances
            .find_by_id(id)
            .await?
            .ok_or(ConsumerError::InstanceNotFound(id))?;

        if !record.state.is_pending() {
            tracing::debug!(instance_id = %id, "Instance already provisioned, skipping");
            return Ok(ProvisioningOutcome::AlreadySettled);
        }

        let token = self.users.platform_token(&instance.requester).await?;

        match self.backend.allocate(instance, &token).await {
            Ok(allocation) => {
                let lease = i64::try_from(allocation.lease_secs).unwrap_or(i64::MAX);
                let expiry = self.clock.now_secs().saturating_add(lease);
                self.store(id, &InstanceDetail::leased(expiry, allocation.access_url))
                    .await?;
                tracing::info!(
                    instance_id = %id,
                    lease_secs = allocation.lease_secs,
                    expiry,
                    "Inference instance allocated"
                );
                Ok(ProvisioningOutcome::Ready { expiry })
            }
            Err(e) if e.is_transient() => {
                tracing::warn!(
                    instance_id = %id,
                    error = %e,
                    "Inference instance allocation failed, leaving it for redelivery"
                );
                Err(e.into())
            }
            Err(e) => {
                let message = e.to_string();
                self.store(id, &InstanceDetail::failed(message.clone())).await?;
                metrics::PROVISIONING_FAILURES.inc();
                tracing::warn!(
                    instance_id = %id,
                    error = %e,
                    "Inference instance allocation failed"
                );
                Ok(ProvisioningOutcome::Failed { message })
            }
        }
    }

    async fn store(&self, id: InstanceId, detail: &InstanceDetail) -> ConsumerResult<()> {
        self.instances
            .update_detail(id, detail)
            .await
            .map_err(|e| match e {
                MetadataError::NotFound(_) => ConsumerError::InstanceNotFound(id),
                e => e.into(),
            })
    }
}

/// Re-leases reused instances with the backend.
pub struct ExtensionConsumer {
    backend: Arc<dyn ComputeBackend>,
    instances: Arc<dyn InstanceRepo>,
    clock: Arc<dyn Clock>,
    guard: LeaseExtension,
}

impl ExtensionConsumer {
    pub fn new(
        backend: Arc<dyn ComputeBackend>,
        instances: Arc<dyn InstanceRepo>,
        clock: Arc<dyn Clock>,
        guard: LeaseExtension,
    ) -> Self {
        Self {
            backend,
            instances,
            clock,
            guard,
        }
    }

    pub async fn handle(&self, request: &ExtensionRequest) -> ConsumerResult<ExtensionOutcome> {
        let id = request.instance.id;
        let believed = request.believed_expiry;

        let now = self.clock.now_secs();
        if self.guard.is_stale(believed, now) {
            metrics::record_extension_skipped("stale");
            tracing::info!(
                instance_id = %id,
                believed_expiry = believed,
                now,
                "Lease already expired, not extending"
            );
            return Ok(ExtensionOutcome::Stale);
        }

        let lease_secs = self.backend.survival_time(&request.instance).await?;

        match self.guard.plan(believed, now, lease_secs) {
            ExtensionPlan::Skip { gain } => {
                metrics::record_extension_skipped("debounced");
                tracing::debug!(instance_id = %id, gain, "Extension gain too small, skipping");
                Ok(ExtensionOutcome::Debounced { gain })
            }
            ExtensionPlan::Extend {
                new_expiry,
                extension_secs,
            } => {
                self.backend
                    .extend(&request.instance, extension_secs)
                    .await?;
                self.instances
                    .update_detail(id, &InstanceDetail::expiry(new_expiry))
                    .await
                    .map_err(|e| match e {
                        MetadataError::NotFound(_) => ConsumerError::InstanceNotFound(id),
                        e => e.into(),
                    })?;

                metrics::EXTENSIONS_PERFORMED.inc();
                tracing::info!(
                    instance_id = %id,
                    extension_secs,
                    new_expiry,
                    "Inference instance lease extended"
                );
                Ok(ExtensionOutcome::Extended { new_expiry })
            }
        }
    }
}

/// Routes lifecycle events to their consumer.
pub struct LifecycleConsumers {
    provisioning: ProvisioningConsumer,
    extension: ExtensionConsumer,
}

impl LifecycleConsumers {
    pub fn new(provisioning: ProvisioningConsumer, extension: ExtensionConsumer) -> Self {
        Self {
            provisioning,
            extension,
        }
    }
}

#[async_trait]
impl EventHandler for LifecycleConsumers {
    async fn handle(&self, event: &LifecycleEvent) -> ConsumerResult<()> {
        match event {
            LifecycleEvent::ProvisioningRequested { instance } => {
                self.provisioning.handle(instance).await.map(|_| ())
            }
            LifecycleEvent::ExtensionRequested(request) => {
                self.extension.handle(request).await.map(|_| ())
            }
        }
    }
}
