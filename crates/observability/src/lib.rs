//! Process-wide tracing/logging setup.

/// Subscriber construction (filters, output format).
pub mod tracing;

pub use tracing::{init, init_with};
