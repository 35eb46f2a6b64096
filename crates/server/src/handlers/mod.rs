//! HTTP request handlers.

pub mod health;
pub mod inference;

pub use health::*;
pub use inference::*;
