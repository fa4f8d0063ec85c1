//! Unit of work over several aggregate streams.
//!
//! Every stream loaded through a [`UnitOfWork`] is remembered at the revision it
//! was read at. [`UnitOfWork::commit`] writes all staged events and re-checks
//! every remembered revision in one atomic store commit, so a decision taken on
//! state that moved in the meantime never lands.

use std::collections::HashMap;

use serde::Serialize;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use procura_allocation::{SplitAllocation, UnitCodeClaim};
use procura_core::{Aggregate, AggregateId, DomainError, ExpectedVersion};
use procura_inventory::InventoryLedgerEntry;
use procura_purchasing::{PoCodeSequence, PurchaseOrder, PurchaseOrderId};
use procura_receiving::GrnRecord;

use crate::error::{ServiceError, ServiceResult};
use crate::event_store::{EventStore, StoredEvent, StreamAppend, UncommittedEvent};

/// An aggregate persisted as an event stream.
pub trait StoredAggregate: Aggregate<Error = DomainError> + Sized
where
    Self::Event: procura_events::Event + Serialize + DeserializeOwned,
{
    /// Stream type name (e.g. "purchasing.order").
    const AGGREGATE_TYPE: &'static str;

    /// Fresh instance for rehydration.
    fn rehydrate(id: AggregateId) -> Self;

    fn stream_id(&self) -> AggregateId;
}

impl StoredAggregate for PurchaseOrder {
    const AGGREGATE_TYPE: &'static str = "purchasing.order";

    fn rehydrate(id: AggregateId) -> Self {
        PurchaseOrder::empty(PurchaseOrderId::new(id))
    }

    fn stream_id(&self) -> AggregateId {
        self.id_typed().into()
    }
}

impl StoredAggregate for PoCodeSequence {
    const AGGREGATE_TYPE: &'static str = "purchasing.code_sequence";

    fn rehydrate(id: AggregateId) -> Self {
        PoCodeSequence::empty(id)
    }

    fn stream_id(&self) -> AggregateId {
        *procura_core::AggregateRoot::id(self)
    }
}

impl StoredAggregate for SplitAllocation {
    const AGGREGATE_TYPE: &'static str = "allocation.split";

    fn rehydrate(id: AggregateId) -> Self {
        SplitAllocation::empty(id)
    }

    fn stream_id(&self) -> AggregateId {
        *procura_core::AggregateRoot::id(self)
    }
}

impl StoredAggregate for UnitCodeClaim {
    const AGGREGATE_TYPE: &'static str = "allocation.unit_code";

    fn rehydrate(id: AggregateId) -> Self {
        UnitCodeClaim::empty(id)
    }

    fn stream_id(&self) -> AggregateId {
        *procura_core::AggregateRoot::id(self)
    }
}

impl StoredAggregate for GrnRecord {
    const AGGREGATE_TYPE: &'static str = "receiving.grn";

    fn rehydrate(id: AggregateId) -> Self {
        GrnRecord::empty(id)
    }

    fn stream_id(&self) -> AggregateId {
        *procura_core::AggregateRoot::id(self)
    }
}

impl StoredAggregate for InventoryLedgerEntry {
    const AGGREGATE_TYPE: &'static str = "inventory.ledger";

    fn rehydrate(id: AggregateId) -> Self {
        InventoryLedgerEntry::empty(id)
    }

    fn stream_id(&self) -> AggregateId {
        *procura_core::AggregateRoot::id(self)
    }
}

#[derive(Debug)]
struct TrackedStream {
    aggregate_type: &'static str,
    read_version: u64,
    staged: Vec<UncommittedEvent>,
}

/// Loads aggregates, stages their decided events, and commits them together.
pub struct UnitOfWork<'s, S: ?Sized> {
    store: &'s S,
    streams: HashMap<AggregateId, TrackedStream>,
    order: Vec<AggregateId>,
}

impl<'s, S> UnitOfWork<'s, S>
where
    S: EventStore + ?Sized,
{
    pub fn new(store: &'s S) -> Self {
        Self {
            store,
            streams: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Rehydrate an aggregate, including anything already staged for it in this unit.
    pub fn load<A>(&mut self, id: AggregateId) -> ServiceResult<A>
    where
        A: StoredAggregate,
        A::Event: procura_events::Event + Serialize + DeserializeOwned,
    {
        let mut aggregate = A::rehydrate(id);

        if let Some(tracked) = self.streams.get(&id) {
            // Already read in this unit: replay the same snapshot plus staged events
            // so the unit never mixes two revisions of one stream.
            let history = self.store.load_stream(id)?;
            apply_stored(&mut aggregate, history.iter().take(tracked.read_version as usize))?;
            for staged in &tracked.staged {
                apply_payload(&mut aggregate, &staged.payload)?;
            }
            return Ok(aggregate);
        }

        let history = self.store.load_stream(id)?;
        validate_loaded_stream(id, &history)?;
        apply_stored(&mut aggregate, history.iter())?;

        self.streams.insert(
            id,
            TrackedStream {
                aggregate_type: A::AGGREGATE_TYPE,
                read_version: stream_version(&history),
                staged: Vec::new(),
            },
        );
        self.order.push(id);
        Ok(aggregate)
    }

    /// Decide a command against a loaded aggregate, apply the events locally and stage them.
    pub fn decide<A>(
        &mut self,
        aggregate: &mut A,
        command: &A::Command,
    ) -> ServiceResult<Vec<A::Event>>
    where
        A: StoredAggregate,
        A::Event: procura_events::Event + Serialize + DeserializeOwned,
    {
        let id = aggregate.stream_id();
        let Some(tracked) = self.streams.get_mut(&id) else {
            return Err(ServiceError::Domain(DomainError::invariant(format!(
                "{} {id} was not loaded through this unit of work",
                A::AGGREGATE_TYPE
            ))));
        };

        let decided = aggregate.handle(command)?;
        let uncommitted = decided
            .iter()
            .map(|ev| UncommittedEvent::from_typed(id, A::AGGREGATE_TYPE, Uuid::now_v7(), ev))
            .collect::<Result<Vec<_>, _>>()?;

        for ev in &decided {
            aggregate.apply(ev);
        }
        tracked.staged.extend(uncommitted);
        Ok(decided)
    }

    /// Streams read or written so far.
    pub fn touched(&self) -> usize {
        self.order.len()
    }

    pub fn has_staged_events(&self) -> bool {
        self.streams.values().any(|t| !t.staged.is_empty())
    }

    /// Commit every staged event and guard every stream that was only read.
    pub fn commit(self) -> Result<Vec<StoredEvent>, crate::event_store::EventStoreError> {
        if !self.has_staged_events() {
            return Ok(vec![]);
        }

        let mut streams = self.streams;
        let appends = self
            .order
            .into_iter()
            .filter_map(|id| {
                streams.remove(&id).map(|t| StreamAppend {
                    aggregate_id: id,
                    aggregate_type: t.aggregate_type.to_string(),
                    expected: ExpectedVersion::Exact(t.read_version),
                    events: t.staged,
                })
            })
            .collect();
        self.store.commit(appends)
    }
}

fn stream_version(stream: &[StoredEvent]) -> u64 {
    stream.last().map(|e| e.sequence_number).unwrap_or(0)
}

fn validate_loaded_stream(aggregate_id: AggregateId, stream: &[StoredEvent]) -> ServiceResult<()> {
    let mut last = 0u64;
    for (idx, e) in stream.iter().enumerate() {
        if e.aggregate_id != aggregate_id {
            return Err(ServiceError::persistence(format!(
                "loaded stream contains wrong aggregate_id at index {idx}"
            )));
        }
        if e.sequence_number != last + 1 {
            return Err(ServiceError::persistence(format!(
                "gap or reorder in loaded stream (last={last}, found={})",
                e.sequence_number
            )));
        }
        last = e.sequence_number;
    }
    Ok(())
}

fn apply_stored<'a, A>(
    aggregate: &mut A,
    history: impl Iterator<Item = &'a StoredEvent>,
) -> ServiceResult<()>
where
    A: Aggregate,
    A::Event: DeserializeOwned,
{
    for stored in history {
        apply_payload(aggregate, &stored.payload)?;
    }
    Ok(())
}

fn apply_payload<A>(aggregate: &mut A, payload: &serde_json::Value) -> ServiceResult<()>
where
    A: Aggregate,
    A::Event: DeserializeOwned,
{
    let ev: A::Event = serde_json::from_value(payload.clone())
        .map_err(|e| ServiceError::persistence(format!("event payload unreadable: {e}")))?;
    aggregate.apply(&ev);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_store::InMemoryEventStore;
    use chrono::Utc;
    use procura_core::{AggregateRoot, CatalogItemId, FacilityId};
    use procura_inventory::{LedgerCommand, LedgerKey, RecordPoRaised};

    fn raise(key: LedgerKey, quantity: i64) -> LedgerCommand {
        LedgerCommand::RecordPoRaised(RecordPoRaised {
            key,
            po_id: AggregateId::new(),
            quantity,
            occurred_at: Utc::now(),
        })
    }

    #[test]
    fn commit_persists_staged_events() {
        let store = InMemoryEventStore::new();
        let key = LedgerKey::new(CatalogItemId(1), FacilityId::new());

        let mut uow = UnitOfWork::new(&store);
        let mut entry: InventoryLedgerEntry = uow.load(key.stream_id()).unwrap();
        uow.decide(&mut entry, &raise(key, 5)).unwrap();
        let committed = uow.commit().unwrap();
        assert_eq!(committed.len(), 1);

        let mut uow = UnitOfWork::new(&store);
        let entry: InventoryLedgerEntry = uow.load(key.stream_id()).unwrap();
        assert_eq!(entry.po_raise_quantity(), 5);
        assert_eq!(entry.version(), 1);
    }

    #[test]
    fn reload_sees_staged_events() {
        let store = InMemoryEventStore::new();
        let key = LedgerKey::new(CatalogItemId(1), FacilityId::new());

        let mut uow = UnitOfWork::new(&store);
        let mut entry: InventoryLedgerEntry = uow.load(key.stream_id()).unwrap();
        uow.decide(&mut entry, &raise(key, 5)).unwrap();
        let mut again: InventoryLedgerEntry = uow.load(key.stream_id()).unwrap();
        assert_eq!(again.po_raise_quantity(), 5);

        uow.decide(&mut again, &raise(key, 2)).unwrap();
        uow.commit().unwrap();
        assert_eq!(store.load_stream(key.stream_id()).unwrap().len(), 2);
    }

    #[test]
    fn concurrent_writer_causes_conflict() {
        let store = InMemoryEventStore::new();
        let key = LedgerKey::new(CatalogItemId(1), FacilityId::new());

        let mut first = UnitOfWork::new(&store);
        let mut second = UnitOfWork::new(&store);
        let mut a: InventoryLedgerEntry = first.load(key.stream_id()).unwrap();
        let mut b: InventoryLedgerEntry = second.load(key.stream_id()).unwrap();
        first.decide(&mut a, &raise(key, 1)).unwrap();
        second.decide(&mut b, &raise(key, 1)).unwrap();

        first.commit().unwrap();
        assert!(second.commit().unwrap_err().is_conflict());
    }

    #[test]
    fn decide_requires_load() {
        let store = InMemoryEventStore::new();
        let key = LedgerKey::new(CatalogItemId(1), FacilityId::new());
        let mut uow = UnitOfWork::new(&store);
        let mut entry = InventoryLedgerEntry::for_key(key);

        let err = uow.decide(&mut entry, &raise(key, 1)).unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Domain(DomainError::InvariantViolation(_))
        ));
    }

    #[test]
    fn failed_decision_stages_nothing() {
        let store = InMemoryEventStore::new();
        let key = LedgerKey::new(CatalogItemId(1), FacilityId::new());
        let mut uow = UnitOfWork::new(&store);
        let mut entry: InventoryLedgerEntry = uow.load(key.stream_id()).unwrap();

        assert!(uow.decide(&mut entry, &raise(key, 0)).is_err());
        assert!(!uow.has_staged_events());
        assert!(uow.commit().unwrap().is_empty());
        assert_eq!(store.stream_count(), 0);
    }
}
