use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use procura_core::{Aggregate, AggregateId, AggregateRoot, CatalogItemId, DomainError, UserId};
use procura_events::Event;

use crate::unit_code::UnitCode;

/// Aggregate progress of splitting one ordered line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SplitStatus {
    Pending,
    Partial,
    Completed,
}

impl SplitStatus {
    /// Classify `allocated` against `ordered`. Overshoot is a broken invariant.
    pub fn derive(allocated: i64, ordered: i64) -> Result<SplitStatus, DomainError> {
        if allocated > ordered {
            return Err(DomainError::invariant(format!(
                "split quantity {allocated} exceeds ordered {ordered}"
            )));
        }
        Ok(match allocated {
            0 => SplitStatus::Pending,
            a if a < ordered => SplitStatus::Partial,
            _ => SplitStatus::Completed,
        })
    }
}

/// One unit code carved out of the ordered line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Split {
    pub unit_code: UnitCode,
    pub quantity: i64,
    pub received_quantity: i64,
    pub ready_for_receipt: bool,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_by: UserId,
    pub updated_at: DateTime<Utc>,
}

impl Split {
    pub fn remaining_to_receive(&self) -> i64 {
        self.quantity - self.received_quantity
    }
}

/// Aggregate root: all splits of one (purchase order, catalog item) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitAllocation {
    id: AggregateId,
    po_id: Option<AggregateId>,
    catalog_item: Option<CatalogItemId>,
    ordered_quantity: i64,
    splits: Vec<Split>,
    version: u64,
}

impl SplitAllocation {
    /// Deterministic stream id for the pair.
    pub fn stream_id(po_id: AggregateId, catalog_item: CatalogItemId) -> AggregateId {
        AggregateId::derived("split-allocation", &format!("{po_id}:{catalog_item}"))
    }

    pub fn empty(id: AggregateId) -> Self {
        Self {
            id,
            po_id: None,
            catalog_item: None,
            ordered_quantity: 0,
            splits: Vec::new(),
            version: 0,
        }
    }

    pub fn po_id(&self) -> Option<AggregateId> {
        self.po_id
    }

    pub fn catalog_item(&self) -> Option<CatalogItemId> {
        self.catalog_item
    }

    pub fn ordered_quantity(&self) -> i64 {
        self.ordered_quantity
    }

    pub fn splits(&self) -> &[Split] {
        &self.splits
    }

    pub fn split(&self, unit_code: &UnitCode) -> Option<&Split> {
        self.splits.iter().find(|s| &s.unit_code == unit_code)
    }

    pub fn has_split(&self, unit_code: &UnitCode) -> bool {
        self.split(unit_code).is_some()
    }

    pub fn allocated_quantity(&self) -> i64 {
        self.splits.iter().map(|s| s.quantity).sum()
    }

    pub fn remaining_quantity(&self) -> i64 {
        self.ordered_quantity - self.allocated_quantity()
    }

    pub fn status(&self) -> Result<SplitStatus, DomainError> {
        SplitStatus::derive(self.allocated_quantity(), self.ordered_quantity)
    }

    fn split_mut(&mut self, unit_code: &UnitCode) -> Option<&mut Split> {
        self.splits.iter_mut().find(|s| &s.unit_code == unit_code)
    }
}

impl AggregateRoot for SplitAllocation {
    type Id = AggregateId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: Allocate (new unit code or additive top-up of an existing one).
///
/// `ordered_quantity` is the authoritative total for the pair, read from the PO.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocate {
    pub po_id: AggregateId,
    pub catalog_item: CatalogItemId,
    pub unit_code: UnitCode,
    pub quantity: i64,
    pub ordered_quantity: i64,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordReceipt (received delta posted against one unit code).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordReceipt {
    pub unit_code: UnitCode,
    pub received: i64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SplitAllocationCommand {
    Allocate(Allocate),
    RecordReceipt(RecordReceipt),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitCreated {
    pub po_id: AggregateId,
    pub catalog_item: CatalogItemId,
    pub unit_code: UnitCode,
    pub quantity: i64,
    pub ordered_quantity: i64,
    pub status: SplitStatus,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitToppedUp {
    pub unit_code: UnitCode,
    pub added: i64,
    pub quantity: i64,
    pub status: SplitStatus,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitReceiptRecorded {
    pub unit_code: UnitCode,
    pub received: i64,
    pub total_received: i64,
    pub fully_received: bool,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SplitAllocationEvent {
    SplitCreated(SplitCreated),
    SplitToppedUp(SplitToppedUp),
    SplitReceiptRecorded(SplitReceiptRecorded),
}

impl Event for SplitAllocationEvent {
    fn event_type(&self) -> &'static str {
        match self {
            SplitAllocationEvent::SplitCreated(_) => "allocation.split.created",
            SplitAllocationEvent::SplitToppedUp(_) => "allocation.split.topped_up",
            SplitAllocationEvent::SplitReceiptRecorded(_) => "allocation.split.receipt_recorded",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            SplitAllocationEvent::SplitCreated(e) => e.occurred_at,
            SplitAllocationEvent::SplitToppedUp(e) => e.occurred_at,
            SplitAllocationEvent::SplitReceiptRecorded(e) => e.occurred_at,
        }
    }
}

impl Aggregate for SplitAllocation {
    type Command = SplitAllocationCommand;
    type Event = SplitAllocationEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            SplitAllocationEvent::SplitCreated(e) => {
                self.po_id = Some(e.po_id);
                self.catalog_item = Some(e.catalog_item);
                self.ordered_quantity = e.ordered_quantity;
                self.splits.push(Split {
                    unit_code: e.unit_code.clone(),
                    quantity: e.quantity,
                    received_quantity: 0,
                    ready_for_receipt: true,
                    created_by: e.actor,
                    created_at: e.occurred_at,
                    updated_by: e.actor,
                    updated_at: e.occurred_at,
                });
            }
            SplitAllocationEvent::SplitToppedUp(e) => {
                if let Some(split) = self.split_mut(&e.unit_code) {
                    split.quantity = e.quantity;
                    split.ready_for_receipt = split.received_quantity < split.quantity;
                    split.updated_by = e.actor;
                    split.updated_at = e.occurred_at;
                }
            }
            SplitAllocationEvent::SplitReceiptRecorded(e) => {
                if let Some(split) = self.split_mut(&e.unit_code) {
                    split.received_quantity = e.total_received;
                    split.ready_for_receipt = !e.fully_received;
                    split.updated_at = e.occurred_at;
                }
            }
        }
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            SplitAllocationCommand::Allocate(cmd) => self.handle_allocate(cmd),
            SplitAllocationCommand::RecordReceipt(cmd) => self.handle_receipt(cmd),
        }
    }
}

impl SplitAllocation {
    fn handle_allocate(&self, cmd: &Allocate) -> Result<Vec<SplitAllocationEvent>, DomainError> {
        if cmd.quantity <= 0 {
            return Err(DomainError::validation("split quantity must be positive"));
        }
        if cmd.unit_code.catalog_item() != cmd.catalog_item {
            return Err(DomainError::invalid_unit_code(format!(
                "{} does not encode catalog item {}",
                cmd.unit_code, cmd.catalog_item
            )));
        }
        if self.po_id.is_some_and(|p| p != cmd.po_id)
            || self.catalog_item.is_some_and(|c| c != cmd.catalog_item)
        {
            return Err(DomainError::invariant("split allocation key mismatch"));
        }

        let allocated = self.allocated_quantity();
        // Fails if a previous write overshot; never allocate on top of that.
        SplitStatus::derive(allocated, cmd.ordered_quantity)?;

        let remaining = cmd.ordered_quantity - allocated;
        if cmd.quantity > remaining {
            return Err(DomainError::quantity_exceeded(format!(
                "requested {} but only {remaining} of {} remain unsplit",
                cmd.quantity, cmd.ordered_quantity
            )));
        }
        let status = SplitStatus::derive(allocated + cmd.quantity, cmd.ordered_quantity)?;

        let event = match self.split(&cmd.unit_code) {
            Some(existing) => SplitAllocationEvent::SplitToppedUp(SplitToppedUp {
                unit_code: cmd.unit_code.clone(),
                added: cmd.quantity,
                quantity: existing.quantity + cmd.quantity,
                status,
                actor: cmd.actor,
                occurred_at: cmd.occurred_at,
            }),
            None => SplitAllocationEvent::SplitCreated(SplitCreated {
                po_id: cmd.po_id,
                catalog_item: cmd.catalog_item,
                unit_code: cmd.unit_code.clone(),
                quantity: cmd.quantity,
                ordered_quantity: cmd.ordered_quantity,
                status,
                actor: cmd.actor,
                occurred_at: cmd.occurred_at,
            }),
        };
        Ok(vec![event])
    }

    fn handle_receipt(
        &self,
        cmd: &RecordReceipt,
    ) -> Result<Vec<SplitAllocationEvent>, DomainError> {
        let split = self.split(&cmd.unit_code).ok_or_else(|| {
            DomainError::invalid_reference(format!("no split for unit code {}", cmd.unit_code))
        })?;
        if cmd.received < 0 {
            return Err(DomainError::validation("received quantity cannot be negative"));
        }

        let total_received = split.received_quantity + cmd.received;
        if total_received > split.quantity {
            return Err(DomainError::quantity_exceeded(format!(
                "unit {} would receive {total_received} of {}",
                cmd.unit_code, split.quantity
            )));
        }

        Ok(vec![SplitAllocationEvent::SplitReceiptRecorded(
            SplitReceiptRecorded {
                unit_code: cmd.unit_code.clone(),
                received: cmd.received,
                total_received,
                fully_received: total_received == split.quantity,
                occurred_at: cmd.occurred_at,
            },
        )])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use procura_events::execute;

    const ITEM: CatalogItemId = CatalogItemId(4711);

    fn code(suffix: u16) -> UnitCode {
        UnitCode::compose(ITEM, suffix).unwrap()
    }

    fn allocation(po_id: AggregateId) -> SplitAllocation {
        SplitAllocation::empty(SplitAllocation::stream_id(po_id, ITEM))
    }

    fn allocate(po_id: AggregateId, unit_code: UnitCode, quantity: i64) -> SplitAllocationCommand {
        SplitAllocationCommand::Allocate(Allocate {
            po_id,
            catalog_item: ITEM,
            unit_code,
            quantity,
            ordered_quantity: 100,
            actor: UserId::new(),
            occurred_at: Utc::now(),
        })
    }

    #[test]
    fn forty_sixty_then_one_more_is_exceeded() {
        let po = AggregateId::new();
        let mut alloc = allocation(po);

        execute(&mut alloc, &allocate(po, code(1), 40)).unwrap();
        assert_eq!(alloc.status().unwrap(), SplitStatus::Partial);

        execute(&mut alloc, &allocate(po, code(2), 60)).unwrap();
        assert_eq!(alloc.status().unwrap(), SplitStatus::Completed);
        assert_eq!(alloc.remaining_quantity(), 0);

        let err = execute(&mut alloc, &allocate(po, code(3), 1)).unwrap_err();
        assert!(matches!(err, DomainError::QuantityExceeded(_)));
        assert_eq!(alloc.splits().len(), 2);
    }

    #[test]
    fn same_code_tops_up() {
        let po = AggregateId::new();
        let mut alloc = allocation(po);

        execute(&mut alloc, &allocate(po, code(1), 30)).unwrap();
        let events = execute(&mut alloc, &allocate(po, code(1), 20)).unwrap();

        match &events[0] {
            SplitAllocationEvent::SplitToppedUp(e) => {
                assert_eq!(e.added, 20);
                assert_eq!(e.quantity, 50);
            }
            other => panic!("Expected SplitToppedUp, got {other:?}"),
        }
        assert_eq!(alloc.splits().len(), 1);
        assert_eq!(alloc.split(&code(1)).unwrap().quantity, 50);
    }

    #[test]
    fn top_up_is_bounded_by_remaining() {
        let po = AggregateId::new();
        let mut alloc = allocation(po);
        execute(&mut alloc, &allocate(po, code(1), 90)).unwrap();

        let err = execute(&mut alloc, &allocate(po, code(1), 11)).unwrap_err();
        assert!(matches!(err, DomainError::QuantityExceeded(_)));
    }

    #[test]
    fn foreign_unit_code_is_rejected() {
        let po = AggregateId::new();
        let alloc = allocation(po);
        let foreign = UnitCode::compose(CatalogItemId(1), 1).unwrap();

        let err = alloc.handle(&allocate(po, foreign, 1)).unwrap_err();
        assert!(matches!(err, DomainError::InvalidUnitCode(_)));
    }

    #[test]
    fn non_positive_quantity_is_validation() {
        let po = AggregateId::new();
        let alloc = allocation(po);
        let err = alloc.handle(&allocate(po, code(1), 0)).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn receipt_clears_ready_flag_when_full() {
        let po = AggregateId::new();
        let mut alloc = allocation(po);
        execute(&mut alloc, &allocate(po, code(1), 10)).unwrap();
        assert!(alloc.split(&code(1)).unwrap().ready_for_receipt);

        let receipt = |received| {
            SplitAllocationCommand::RecordReceipt(RecordReceipt {
                unit_code: code(1),
                received,
                occurred_at: Utc::now(),
            })
        };

        execute(&mut alloc, &receipt(4)).unwrap();
        let split = alloc.split(&code(1)).unwrap();
        assert_eq!(split.received_quantity, 4);
        assert!(split.ready_for_receipt);

        execute(&mut alloc, &receipt(6)).unwrap();
        let split = alloc.split(&code(1)).unwrap();
        assert_eq!(split.remaining_to_receive(), 0);
        assert!(!split.ready_for_receipt);

        let err = execute(&mut alloc, &receipt(1)).unwrap_err();
        assert!(matches!(err, DomainError::QuantityExceeded(_)));
    }

    #[test]
    fn overshoot_is_reported_as_invariant_violation() {
        assert!(matches!(
            SplitStatus::derive(101, 100),
            Err(DomainError::InvariantViolation(_))
        ));
        assert_eq!(SplitStatus::derive(0, 100).unwrap(), SplitStatus::Pending);
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig { cases: 256, ..ProptestConfig::default() })]

            /// Σ split ≤ ordered after every step, whatever mix of new codes and top-ups arrives.
            #[test]
            fn allocation_never_exceeds_ordered(
                requests in prop::collection::vec((0u16..5, 1i64..60), 1..20)
            ) {
                let po = AggregateId::new();
                let mut alloc = allocation(po);
                for (suffix, qty) in requests {
                    let before = alloc.allocated_quantity();
                    match execute(&mut alloc, &allocate(po, code(suffix), qty)) {
                        Ok(_) => prop_assert_eq!(alloc.allocated_quantity(), before + qty),
                        Err(err) => {
                            prop_assert!(matches!(err, DomainError::QuantityExceeded(_)));
                            prop_assert!(before + qty > 100);
                            prop_assert_eq!(alloc.allocated_quantity(), before);
                        }
                    }
                    prop_assert!(alloc.allocated_quantity() <= alloc.ordered_quantity());
                    prop_assert!(alloc.status().is_ok());
                }
            }
        }
    }
}
