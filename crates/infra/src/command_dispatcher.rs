//! Command execution pipeline.
//!
//! ```text
//! unit of work closure
//!   ↓
//! 1. load streams (rehydrate, remember revisions)
//!   ↓
//! 2. decide commands (pure, events staged)
//!   ↓
//! 3. commit all streams atomically (compare-and-swap on every revision)
//!   ↓   └─ conflict → rerun the closure on fresh state (bounded)
//! 4. publish committed envelopes to the bus
//! ```
//!
//! A conflict means another unit committed to a stream this one read. Rerunning
//! the closure on fresh state is equivalent to having waited on a row lock.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use procura_core::AggregateId;
use procura_events::{EventBus, EventEnvelope};

use crate::error::{ServiceError, ServiceResult};
use crate::event_store::EventStore;
use crate::unit_of_work::{StoredAggregate, UnitOfWork};

pub const DEFAULT_MAX_CONFLICT_RETRIES: u32 = 8;

/// Runs units of work against a store and publishes what they commit.
#[derive(Debug)]
pub struct CommandDispatcher<S, B> {
    store: S,
    bus: B,
    max_conflict_retries: u32,
}

impl<S, B> CommandDispatcher<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self {
            store,
            bus,
            max_conflict_retries: DEFAULT_MAX_CONFLICT_RETRIES,
        }
    }

    pub fn with_max_conflict_retries(mut self, retries: u32) -> Self {
        self.max_conflict_retries = retries;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn into_parts(self) -> (S, B) {
        (self.store, self.bus)
    }
}

impl<S, B> CommandDispatcher<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Run `work` in a unit of work and commit it.
    ///
    /// Domain errors from `work` abort immediately and nothing is written. A write
    /// conflict reruns `work` up to `max_conflict_retries` times; after that, and
    /// for any other store failure, the result is `PersistenceFailure`.
    pub fn run<T>(
        &self,
        mut work: impl FnMut(&mut UnitOfWork<'_, S>) -> ServiceResult<T>,
    ) -> ServiceResult<T> {
        let mut attempt = 0u32;
        loop {
            let mut uow = UnitOfWork::new(&self.store);
            let value = work(&mut uow)?;

            match uow.commit() {
                Ok(committed) => {
                    for stored in &committed {
                        // The commit is durable; a lost publication must not fail it.
                        if let Err(err) = self.bus.publish(stored.to_envelope()) {
                            warn!(
                                event_type = %stored.event_type,
                                aggregate_id = %stored.aggregate_id,
                                error = ?err,
                                "event publication failed"
                            );
                        }
                    }
                    debug!(events = committed.len(), attempt, "unit of work committed");
                    return Ok(value);
                }
                Err(err) if err.is_conflict() && attempt < self.max_conflict_retries => {
                    attempt += 1;
                    warn!(attempt, error = %err, "write conflict, retrying unit of work");
                }
                Err(err) if err.is_conflict() => {
                    return Err(ServiceError::persistence(format!(
                        "write conflict persisted after {attempt} retries: {err}"
                    )));
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Single-aggregate shortcut: load, decide, commit.
    pub fn dispatch<A>(
        &self,
        aggregate_id: AggregateId,
        command: A::Command,
    ) -> ServiceResult<Vec<A::Event>>
    where
        A: StoredAggregate,
        A::Event: procura_events::Event + Serialize + DeserializeOwned,
    {
        self.run(|uow| {
            let mut aggregate: A = uow.load(aggregate_id)?;
            uow.decide(&mut aggregate, &command)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_store::{
        EventStoreError, InMemoryEventStore, StoredEvent, StreamAppend,
    };
    use chrono::Utc;
    use procura_core::{CatalogItemId, DomainError, FacilityId};
    use procura_events::InMemoryEventBus;
    use procura_inventory::{InventoryLedgerEntry, LedgerCommand, LedgerKey, RecordPoRaised};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn raise(key: LedgerKey, quantity: i64) -> LedgerCommand {
        LedgerCommand::RecordPoRaised(RecordPoRaised {
            key,
            po_id: AggregateId::new(),
            quantity,
            occurred_at: Utc::now(),
        })
    }

    /// Store whose commits always lose the race.
    struct AlwaysConflicting(InMemoryEventStore);

    impl EventStore for AlwaysConflicting {
        fn commit(&self, _appends: Vec<StreamAppend>) -> Result<Vec<StoredEvent>, EventStoreError> {
            Err(EventStoreError::Concurrency("someone else won".to_string()))
        }

        fn load_stream(
            &self,
            aggregate_id: AggregateId,
        ) -> Result<Vec<StoredEvent>, EventStoreError> {
            self.0.load_stream(aggregate_id)
        }
    }

    #[test]
    fn dispatch_commits_and_publishes() {
        let bus = Arc::new(InMemoryEventBus::<EventEnvelope<JsonValue>>::new());
        let sub = bus.subscribe();
        let dispatcher = CommandDispatcher::new(InMemoryEventStore::new(), bus.clone());
        let key = LedgerKey::new(CatalogItemId(3), FacilityId::new());

        let events = dispatcher
            .dispatch::<InventoryLedgerEntry>(key.stream_id(), raise(key, 7))
            .unwrap();
        assert_eq!(events.len(), 1);

        let published = sub.drain();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].event_type(), "inventory.ledger.po_raised");
        assert_eq!(published[0].sequence_number(), 1);
    }

    #[test]
    fn domain_error_writes_nothing() {
        let bus = Arc::new(InMemoryEventBus::<EventEnvelope<JsonValue>>::new());
        let sub = bus.subscribe();
        let dispatcher = CommandDispatcher::new(InMemoryEventStore::new(), bus);
        let key = LedgerKey::new(CatalogItemId(3), FacilityId::new());

        let err = dispatcher
            .dispatch::<InventoryLedgerEntry>(key.stream_id(), raise(key, -1))
            .unwrap_err();
        assert!(matches!(err, ServiceError::Domain(DomainError::Validation(_))));
        assert!(sub.drain().is_empty());
        assert_eq!(dispatcher.store().stream_count(), 0);
    }

    #[test]
    fn exhausted_retries_surface_as_persistence_failure() {
        let dispatcher = CommandDispatcher::new(
            AlwaysConflicting(InMemoryEventStore::new()),
            Arc::new(InMemoryEventBus::<EventEnvelope<JsonValue>>::new()),
        )
        .with_max_conflict_retries(3);
        let key = LedgerKey::new(CatalogItemId(3), FacilityId::new());
        let runs = AtomicU32::new(0);

        let err = dispatcher
            .run(|uow| {
                runs.fetch_add(1, Ordering::SeqCst);
                let mut entry: InventoryLedgerEntry = uow.load(key.stream_id())?;
                uow.decide(&mut entry, &raise(key, 1))
            })
            .unwrap_err();

        assert!(matches!(err, ServiceError::PersistenceFailure(_)));
        assert_eq!(runs.load(Ordering::SeqCst), 4);
    }
}
