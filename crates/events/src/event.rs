use chrono::{DateTime, Utc};

/// A domain fact emitted by an aggregate.
///
/// Events are immutable, versioned, and append-only.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event name (e.g. "receiving.grn.receipt_posted").
    fn event_type(&self) -> &'static str;

    /// Schema version for this event type.
    fn version(&self) -> u32;

    /// Business time of the fact.
    fn occurred_at(&self) -> DateTime<Utc>;
}
