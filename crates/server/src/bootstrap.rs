//! Wiring of the coordinator, consumers and event transport.

use crate::consumers::{ExtensionConsumer, LifecycleConsumers, ProvisioningConsumer};
use crate::lifecycle::LifecycleCoordinator;
use crate::messaging::{self, EventDispatcher, EventReceiver};
use crate::platform::{
    CommitResolver, ComputeBackend, HttpComputeBackend, HttpPlatform, PlatformResult, ProjectRepo,
    UserRepo,
};
use crate::state::AppState;
use ember_core::Clock;
use ember_core::config::AppConfig;
use ember_metadata::{InstanceRepo, MetadataStore};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// External systems the service talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub projects: Arc<dyn ProjectRepo>,
    pub commits: Arc<dyn CommitResolver>,
    pub users: Arc<dyn UserRepo>,
    pub backend: Arc<dyn ComputeBackend>,
}

impl Collaborators {
    /// HTTP clients for the configured platform and compute backend.
    pub fn from_config(config: &AppConfig) -> PlatformResult<Self> {
        let platform = Arc::new(HttpPlatform::new(&config.platform)?);
        let backend = Arc::new(HttpComputeBackend::new(&config.backend)?);
        Ok(Self {
            projects: platform.clone(),
            commits: platform.clone(),
            users: platform,
            backend,
        })
    }
}

/// A fully wired service whose dispatcher has not been started yet.
pub struct Service {
    pub state: AppState,
    dispatcher: EventDispatcher,
    events: EventReceiver,
}

impl Service {
    /// Start consuming lifecycle events. The task ends once the coordinator
    /// (the only publisher) is dropped and in-flight events are handled.
    pub fn start_dispatcher(self) -> (AppState, JoinHandle<()>) {
        let handle = self.dispatcher.spawn(self.events);
        (self.state, handle)
    }
}

/// Build the coordinator, both consumers and the channel between them.
pub fn assemble(
    config: AppConfig,
    metadata: Arc<dyn MetadataStore>,
    collaborators: Collaborators,
    clock: Arc<dyn Clock>,
) -> Service {
    let (publisher, events) = messaging::channel();
    let instances: Arc<dyn InstanceRepo> = metadata.clone();

    let coordinator = Arc::new(LifecycleCoordinator::new(
        &config.lifecycle,
        collaborators.projects,
        collaborators.commits,
        instances.clone(),
        Arc::new(publisher),
        clock.clone(),
    ));

    let consumers = LifecycleConsumers::new(
        ProvisioningConsumer::new(
            collaborators.users,
            collaborators.backend.clone(),
            instances.clone(),
            clock.clone(),
        ),
        ExtensionConsumer::new(
            collaborators.backend,
            instances,
            clock,
            config.lifecycle.lease_extension(),
        ),
    );
    let dispatcher = EventDispatcher::new(Arc::new(consumers), config.messaging.clone());

    tracing::debug!(
        min_survival_time_secs = config.lifecycle.min_survival_time_secs,
        max_in_flight = config.messaging.max_in_flight,
        "Lifecycle service assembled"
    );

    Service {
        state: AppState::new(config, metadata, coordinator),
        dispatcher,
        events,
    }
}
