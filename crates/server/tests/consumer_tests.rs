//! Integration tests for the provisioning and extension consumers.

mod common;

use common::{FakeBackend, FakePlatform, TestMetadata, account, fingerprint, seed};
use ember_core::{
    ExtensionRequest, InstanceDetail, InstanceId, InstanceInfo, InstanceState, LeaseExtension,
    LifecycleEvent, ManualClock, ReuseDecision, ReusePolicy,
};
use ember_metadata::InstanceRepo;
use ember_server::consumers::{
    ConsumerError, ExtensionConsumer, ExtensionOutcome, LifecycleConsumers, ProvisioningConsumer,
    ProvisioningOutcome,
};
use ember_server::messaging::EventHandler;
use std::sync::Arc;
use std::sync::atomic::Ordering;

const NOW: i64 = 1000;

struct Harness {
    _metadata: TestMetadata,
    instances: Arc<dyn InstanceRepo>,
    platform: Arc<FakePlatform>,
    backend: Arc<FakeBackend>,
    clock: Arc<ManualClock>,
}

impl Harness {
    async fn new() -> Self {
        let metadata = TestMetadata::new().await.unwrap();
        Self {
            instances: metadata.instances(),
            _metadata: metadata,
            platform: Arc::new(FakePlatform::new()),
            backend: Arc::new(FakeBackend::new()),
            clock: Arc::new(ManualClock::new(NOW)),
        }
    }

    fn provisioning(&self) -> ProvisioningConsumer {
        ProvisioningConsumer::new(
            self.platform.clone(),
            self.backend.clone(),
            self.instances.clone(),
            self.clock.clone(),
        )
    }

    fn extension(&self) -> ExtensionConsumer {
        ExtensionConsumer::new(
            self.backend.clone(),
            self.instances.clone(),
            self.clock.clone(),
            LeaseExtension::new(10),
        )
    }

    /// Insert a record and return its message payload.
    async fn instance(&self, detail: Option<InstanceDetail>) -> InstanceInfo {
        let id = seed(
            self.instances.as_ref(),
            &fingerprint("alice", "p1", "c1"),
            NOW,
            detail,
        )
        .await;
        self.record(id).await.info
    }

    async fn record(&self, id: InstanceId) -> ember_core::InstanceRecord {
        self.instances.find_by_id(id).await.unwrap().unwrap()
    }
}

#[tokio::test]
async fn test_provisioning_records_lease_and_url() {
    let h = Harness::new().await;
    h.backend.lease_secs.store(300, Ordering::SeqCst);
    let info = h.instance(None).await;

    let outcome = h.provisioning().handle(&info).await.unwrap();
    assert_eq!(outcome, ProvisioningOutcome::Ready { expiry: NOW + 300 });

    let record = h.record(info.id).await;
    assert_eq!(
        record.state,
        InstanceState::Ready {
            access_url: Some(FakeBackend::access_url(info.id)),
            expiry: NOW + 300,
        }
    );

    // The requester's credential is used, not the owner's.
    let allocations = h.backend.allocations.lock().unwrap().clone();
    assert_eq!(
        allocations,
        vec![(info.id, FakePlatform::token_for(&account("bob")))]
    );
}

#[tokio::test]
async fn test_provisioning_tolerates_redundant_delivery() {
    let h = Harness::new().await;
    let info = h.instance(None).await;
    let consumer = h.provisioning();

    consumer.handle(&info).await.unwrap();
    h.clock.advance(5);
    let outcome = consumer.handle(&info).await.unwrap();

    assert_eq!(outcome, ProvisioningOutcome::AlreadySettled);
    assert_eq!(h.backend.allocation_count(), 1);
    assert_eq!(h.record(info.id).await.state.expiry(), Some(NOW + 300));
}

#[tokio::test]
async fn test_provisioning_failure_is_recorded_on_the_instance() {
    let h = Harness::new().await;
    *h.backend.fail_allocate.lock().unwrap() = Some((422, "no gpu available".to_string()));
    let info = h.instance(None).await;

    let outcome = h.provisioning().handle(&info).await.unwrap();
    let ProvisioningOutcome::Failed { message } = outcome else {
        panic!("expected failure, got {outcome:?}");
    };
    assert!(message.contains("no gpu available"));

    let record = h.record(info.id).await;
    assert_eq!(record.state.error(), Some(message.as_str()));

    // Later lookups for the fingerprint surface the error.
    let decision = ReusePolicy::new(60, 600).decide(&[record], NOW);
    assert!(matches!(decision, ReuseDecision::Failed { id, .. } if id == info.id));
}

#[tokio::test]
async fn test_provisioning_token_failure_is_redelivered() {
    let h = Harness::new().await;
    h.platform.fail_tokens.store(true, Ordering::SeqCst);
    let info = h.instance(None).await;

    let err = h.provisioning().handle(&info).await.unwrap_err();
    assert!(matches!(err, ConsumerError::Platform(_)));
    assert_eq!(h.backend.allocation_count(), 0);
    assert!(h.record(info.id).await.state.is_pending());
}

#[tokio::test]
async fn test_provisioning_transient_allocation_failure_is_redelivered() {
    let h = Harness::new().await;
    h.backend.transient_allocate_failures.store(1, Ordering::SeqCst);
    let info = h.instance(None).await;
    let consumer = h.provisioning();

    let err = consumer.handle(&info).await.unwrap_err();
    assert!(matches!(err, ConsumerError::Platform(_)));
    let record = h.record(info.id).await;
    assert!(record.state.is_pending());
    assert!(record.state.error().is_none());

    // The next delivery allocates normally.
    let outcome = consumer.handle(&info).await.unwrap();
    assert_eq!(outcome, ProvisioningOutcome::Ready { expiry: NOW + 300 });
    assert_eq!(h.backend.allocation_count(), 2);
}

#[tokio::test]
async fn test_provisioning_throttled_allocation_is_redelivered() {
    let h = Harness::new().await;
    *h.backend.fail_allocate.lock().unwrap() = Some((503, "try later".to_string()));
    let info = h.instance(None).await;

    let err = h.provisioning().handle(&info).await.unwrap_err();
    assert!(matches!(err, ConsumerError::Platform(_)));
    assert!(h.record(info.id).await.state.error().is_none());
}

#[tokio::test]
async fn test_provisioning_unknown_instance() {
    let h = Harness::new().await;
    let mut info = h.instance(None).await;
    info.id = InstanceId::new();

    let err = h.provisioning().handle(&info).await.unwrap_err();
    assert!(matches!(err, ConsumerError::InstanceNotFound(id) if id == info.id));
    assert_eq!(h.backend.allocation_count(), 0);
}

#[tokio::test]
async fn test_extension_stale_request_is_dropped() {
    let h = Harness::new().await;
    let info = h.instance(Some(InstanceDetail::expiry(900))).await;

    let outcome = h
        .extension()
        .handle(&ExtensionRequest {
            instance: info.clone(),
            believed_expiry: 900,
        })
        .await
        .unwrap();

    assert_eq!(outcome, ExtensionOutcome::Stale);
    assert_eq!(h.backend.survival_queries.load(Ordering::SeqCst), 0);
    assert_eq!(h.backend.extension_count(), 0);
    assert_eq!(h.record(info.id).await.state.expiry(), Some(900));
}

#[tokio::test]
async fn test_extension_small_gain_is_debounced() {
    let h = Harness::new().await;
    h.clock.set(995);
    // Candidate expiry 995 + 10 = 1005, five seconds past the believed 1000.
    h.backend.survival_secs.store(10, Ordering::SeqCst);
    let info = h.instance(Some(InstanceDetail::expiry(1000))).await;

    let outcome = h
        .extension()
        .handle(&ExtensionRequest {
            instance: info.clone(),
            believed_expiry: 1000,
        })
        .await
        .unwrap();

    assert_eq!(outcome, ExtensionOutcome::Debounced { gain: 5 });
    assert_eq!(h.backend.extension_count(), 0);
    assert_eq!(h.record(info.id).await.state.expiry(), Some(1000));
}

#[tokio::test]
async fn test_extension_extends_and_persists() {
    let h = Harness::new().await;
    h.clock.set(995);
    // Candidate expiry 995 + 20 = 1015.
    h.backend.survival_secs.store(20, Ordering::SeqCst);
    let info = h.instance(Some(InstanceDetail::expiry(1000))).await;

    let outcome = h
        .extension()
        .handle(&ExtensionRequest {
            instance: info.clone(),
            believed_expiry: 1000,
        })
        .await
        .unwrap();

    assert_eq!(outcome, ExtensionOutcome::Extended { new_expiry: 1015 });
    assert_eq!(
        h.backend.extensions.lock().unwrap().clone(),
        vec![(info.id, 15)]
    );
    assert_eq!(h.record(info.id).await.state.expiry(), Some(1015));
}

#[tokio::test]
async fn test_extension_backend_failure_leaves_expiry() {
    let h = Harness::new().await;
    h.backend.survival_secs.store(600, Ordering::SeqCst);
    h.backend.fail_extend.store(true, Ordering::SeqCst);
    let info = h.instance(Some(InstanceDetail::expiry(1100))).await;

    let err = h
        .extension()
        .handle(&ExtensionRequest {
            instance: info.clone(),
            believed_expiry: 1100,
        })
        .await
        .unwrap_err();

    assert!(matches!(err, ConsumerError::Platform(_)));
    assert_eq!(h.record(info.id).await.state.expiry(), Some(1100));
}

#[tokio::test]
async fn test_lifecycle_consumers_route_events() {
    let h = Harness::new().await;
    h.backend.lease_secs.store(300, Ordering::SeqCst);
    h.backend.survival_secs.store(600, Ordering::SeqCst);
    let consumers = LifecycleConsumers::new(h.provisioning(), h.extension());

    let info = h.instance(None).await;
    consumers
        .handle(&LifecycleEvent::ProvisioningRequested {
            instance: info.clone(),
        })
        .await
        .unwrap();
    assert_eq!(h.record(info.id).await.state.expiry(), Some(NOW + 300));

    consumers
        .handle(&LifecycleEvent::ExtensionRequested(ExtensionRequest {
            instance: info.clone(),
            believed_expiry: NOW + 300,
        }))
        .await
        .unwrap();
    assert_eq!(h.record(info.id).await.state.expiry(), Some(NOW + 600));
    assert_eq!(h.backend.extension_count(), 1);
}
