//! Application state shared across handlers.

use crate::lifecycle::LifecycleCoordinator;
use ember_core::config::AppConfig;
use ember_metadata::MetadataStore;
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Metadata store, used directly for health checks.
    pub metadata: Arc<dyn MetadataStore>,
    pub coordinator: Arc<LifecycleCoordinator>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        metadata: Arc<dyn MetadataStore>,
        coordinator: Arc<LifecycleCoordinator>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            metadata,
            coordinator,
        }
    }
}
