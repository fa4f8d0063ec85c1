use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use procura_core::AggregateId;

use super::r#trait::{EventStore, EventStoreError, StoredEvent, StreamAppend};

/// In-memory append-only event store.
///
/// One lock over every stream, so a multi-stream commit is checked and written
/// in a single critical section. Intended for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    streams: RwLock<HashMap<AggregateId, Vec<StoredEvent>>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn current_version(stream: &[StoredEvent]) -> u64 {
        stream.last().map(|e| e.sequence_number).unwrap_or(0)
    }

    /// Number of streams holding at least one event.
    pub fn stream_count(&self) -> usize {
        self.streams
            .read()
            .map(|s| s.values().filter(|v| !v.is_empty()).count())
            .unwrap_or(0)
    }
}

fn check_append(
    append: &StreamAppend,
    stream: Option<&Vec<StoredEvent>>,
) -> Result<(), EventStoreError> {
    for (idx, e) in append.events.iter().enumerate() {
        if e.aggregate_id != append.aggregate_id {
            return Err(EventStoreError::InvalidAppend(format!(
                "event {idx} targets {} inside the append for {}",
                e.aggregate_id, append.aggregate_id
            )));
        }
        if e.aggregate_type != append.aggregate_type {
            return Err(EventStoreError::AggregateTypeMismatch(format!(
                "event {idx} has type '{}' inside the append for '{}'",
                e.aggregate_type, append.aggregate_type
            )));
        }
    }

    let stream = stream.map(Vec::as_slice).unwrap_or(&[]);
    let current = InMemoryEventStore::current_version(stream);
    if !append.expected.matches(current) {
        return Err(EventStoreError::Concurrency(format!(
            "stream {}: expected {:?}, found {current}",
            append.aggregate_id, append.expected
        )));
    }

    if let Some(existing) = stream.first() {
        if existing.aggregate_type != append.aggregate_type {
            return Err(EventStoreError::AggregateTypeMismatch(format!(
                "stream aggregate_type is '{}', attempted append with '{}'",
                existing.aggregate_type, append.aggregate_type
            )));
        }
    }
    Ok(())
}

impl EventStore for InMemoryEventStore {
    fn commit(&self, appends: Vec<StreamAppend>) -> Result<Vec<StoredEvent>, EventStoreError> {
        let mut seen = HashSet::with_capacity(appends.len());
        for append in &appends {
            if !seen.insert(append.aggregate_id) {
                return Err(EventStoreError::InvalidAppend(format!(
                    "stream {} appears twice in one commit",
                    append.aggregate_id
                )));
            }
        }

        let mut streams = self
            .streams
            .write()
            .map_err(|_| EventStoreError::Unavailable("lock poisoned".to_string()))?;

        // Check everything before writing anything.
        for append in &appends {
            check_append(append, streams.get(&append.aggregate_id))?;
        }

        let mut committed = Vec::new();
        for append in appends {
            if append.events.is_empty() {
                continue;
            }
            let stream = streams.entry(append.aggregate_id).or_default();
            let mut next = Self::current_version(stream) + 1;
            for e in append.events {
                let stored = StoredEvent {
                    event_id: e.event_id,
                    aggregate_id: e.aggregate_id,
                    aggregate_type: e.aggregate_type,
                    sequence_number: next,
                    event_type: e.event_type,
                    event_version: e.event_version,
                    occurred_at: e.occurred_at,
                    payload: e.payload,
                };
                next += 1;
                stream.push(stored.clone());
                committed.push(stored);
            }
        }

        Ok(committed)
    }

    fn load_stream(&self, aggregate_id: AggregateId) -> Result<Vec<StoredEvent>, EventStoreError> {
        let streams = self
            .streams
            .read()
            .map_err(|_| EventStoreError::Unavailable("lock poisoned".to_string()))?;

        Ok(streams.get(&aggregate_id).cloned().unwrap_or_default())
    }
}
