//! Domain events and their distribution mechanics.
//!
//! Domain crates describe *what happened* with types implementing [`Event`]; the
//! infrastructure layer persists them and fans committed envelopes out over an
//! [`EventBus`].

pub mod bus;
pub mod envelope;
pub mod event;
pub mod handler;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use handler::execute;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
