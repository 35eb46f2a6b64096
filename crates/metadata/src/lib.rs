//! Metadata store abstraction and implementations for ember.
//!
//! This crate owns the persistent record of inference instances:
//! - Lookup by (project, commit) fingerprint and by instance ID
//! - Optimistic-concurrency insert keyed by a per-fingerprint generation
//! - Last-writer-wins updates of expiry, access URL and error

pub mod error;
pub mod models;
pub mod repos;
pub mod store;

pub use error::{MetadataError, MetadataResult};
pub use repos::{FingerprintSnapshot, Generation, InstanceRepo};
pub use store::{MetadataStore, SqliteStore};

use ember_core::config::MetadataConfig;
use std::sync::Arc;

/// Create a metadata store from configuration.
pub async fn from_config(config: &MetadataConfig) -> MetadataResult<Arc<dyn MetadataStore>> {
    match config {
        MetadataConfig::Sqlite { path } => {
            tracing::info!(path = %path.display(), "Opening SQLite metadata store");
            let store = SqliteStore::new(path).await?;
            Ok(Arc::new(store) as Arc<dyn MetadataStore>)
        }
    }
}
