//! Append-only event store boundary.
//!
//! Streams are keyed by aggregate id. Writes go through an atomic multi-stream
//! commit with a compare-and-swap on every stream's revision.

pub mod in_memory;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
pub use r#trait::{EventStore, EventStoreError, StoredEvent, StreamAppend, UncommittedEvent};
