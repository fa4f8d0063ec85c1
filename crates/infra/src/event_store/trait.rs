use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use procura_core::{AggregateId, ExpectedVersion};
use std::sync::Arc;

/// An event ready to be appended to a stream (not yet assigned a sequence number).
///
/// Lifecycle: domain event (`handle`) → `UncommittedEvent` (serialized, stream
/// metadata attached) → `StoredEvent` (sequence number assigned on commit) →
/// `EventEnvelope` (published on the bus).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UncommittedEvent {
    pub event_id: Uuid,
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,

    pub event_type: String,
    pub event_version: u32,
    pub occurred_at: DateTime<Utc>,

    pub payload: JsonValue,
}

/// A stored event in an append-only stream.
///
/// Sequence numbers start at 1, are stream-scoped and have no gaps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub event_id: Uuid,
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,

    /// Position in the aggregate stream.
    pub sequence_number: u64,

    pub event_type: String,
    pub event_version: u32,
    pub occurred_at: DateTime<Utc>,

    pub payload: JsonValue,
}

impl StoredEvent {
    pub fn stream_version(&self) -> u64 {
        self.sequence_number
    }

    /// Envelope for publication on the bus.
    pub fn to_envelope(&self) -> procura_events::EventEnvelope<JsonValue> {
        procura_events::EventEnvelope::new(
            self.event_id,
            self.aggregate_id,
            self.aggregate_type.clone(),
            self.event_type.clone(),
            self.sequence_number,
            self.payload.clone(),
        )
    }
}

/// Events for one stream inside an atomic multi-stream commit.
///
/// An append with no events is a read guard: the commit only succeeds if the
/// stream is still at `expected`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamAppend {
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,
    pub expected: ExpectedVersion,
    pub events: Vec<UncommittedEvent>,
}

impl StreamAppend {
    pub fn guard(
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        expected: ExpectedVersion,
    ) -> Self {
        Self {
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            expected,
            events: Vec::new(),
        }
    }

    pub fn is_guard(&self) -> bool {
        self.events.is_empty()
    }
}

/// Event store failure. Infrastructure only; business failures are `DomainError`s.
#[derive(Debug, Error)]
pub enum EventStoreError {
    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    #[error("aggregate type mismatch: {0}")]
    AggregateTypeMismatch(String),

    #[error("invalid append: {0}")]
    InvalidAppend(String),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl EventStoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, EventStoreError::Concurrency(_))
    }
}

/// Append-only event store.
///
/// Streams are keyed by aggregate id and hold events in sequence order.
/// [`commit`](EventStore::commit) is the only write primitive: it checks every
/// stream's `ExpectedVersion` and writes all streams or none.
pub trait EventStore: Send + Sync {
    /// Append to several streams atomically.
    ///
    /// Returns the stored events of every stream, in the order they were given.
    fn commit(&self, appends: Vec<StreamAppend>) -> Result<Vec<StoredEvent>, EventStoreError>;

    /// Load the full stream of an aggregate (empty when it does not exist yet).
    fn load_stream(&self, aggregate_id: AggregateId) -> Result<Vec<StoredEvent>, EventStoreError>;

    /// Append to a single stream.
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let Some(first) = events.first() else {
            return Ok(vec![]);
        };
        let append = StreamAppend {
            aggregate_id: first.aggregate_id,
            aggregate_type: first.aggregate_type.clone(),
            expected: expected_version,
            events,
        };
        self.commit(vec![append])
    }
}

impl<S> EventStore for Arc<S>
where
    S: EventStore + ?Sized,
{
    fn commit(&self, appends: Vec<StreamAppend>) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).commit(appends)
    }

    fn load_stream(&self, aggregate_id: AggregateId) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).load_stream(aggregate_id)
    }
}

impl UncommittedEvent {
    /// Serialize a typed domain event for a stream.
    pub fn from_typed<E>(
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        event_id: Uuid,
        event: &E,
    ) -> Result<Self, EventStoreError>
    where
        E: procura_events::Event + Serialize,
    {
        let payload = serde_json::to_value(event).map_err(|e| {
            EventStoreError::InvalidAppend(format!("payload serialization failed: {e}"))
        })?;

        Ok(Self {
            event_id,
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            event_type: event.event_type().to_string(),
            event_version: event.version(),
            occurred_at: event.occurred_at(),
            payload,
        })
    }
}
