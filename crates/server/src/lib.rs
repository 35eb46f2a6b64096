//! Inference instance lifecycle service.
//!
//! This crate provides:
//! - The lifecycle coordinator (reuse, optimistic creation, polling)
//! - Provisioning and lease-extension consumers
//! - An in-process event transport between them
//! - HTTP clients for the platform and compute backend
//! - The HTTP API and Prometheus metrics

pub mod bootstrap;
pub mod consumers;
pub mod error;
pub mod handlers;
pub mod lifecycle;
pub mod messaging;
pub mod metrics;
pub mod platform;
pub mod routes;
pub mod state;

pub use bootstrap::{Collaborators, Service, assemble};
pub use error::ApiError;
pub use lifecycle::{CreateInference, InferenceView, LifecycleCoordinator, LifecycleError};
pub use routes::create_router;
pub use state::AppState;
