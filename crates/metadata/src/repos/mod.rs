//! Repository traits for metadata operations.

pub mod instances;

pub use instances::{FingerprintSnapshot, Generation, InstanceRepo};
