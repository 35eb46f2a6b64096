//! Core domain types and shared logic for ember inference instances.
//!
//! This crate defines the canonical data model used across all other crates:
//! - Project references and the (project, commit) fingerprint
//! - Inference instance records and their lifecycle state
//! - The reuse policy and lease-extension guards
//! - Lifecycle messages and configuration

pub mod clock;
pub mod config;
pub mod error;
pub mod event;
pub mod instance;
pub mod lease;
pub mod project;
pub mod reuse;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{Error, Result};
pub use event::{ExtensionRequest, LifecycleEvent};
pub use instance::{
    InstanceDetail, InstanceDraft, InstanceId, InstanceInfo, InstanceRecord, InstanceState,
};
pub use lease::{ExtensionPlan, LeaseExtension};
pub use project::{Account, CommitHash, Fingerprint, ProjectId, ProjectRef, ResourceLevel};
pub use reuse::{ReuseDecision, ReusePolicy};
