use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use procura_core::{Aggregate, AggregateId, AggregateRoot, CatalogItemId, DomainError, FacilityId};
use procura_events::Event;

/// Ledger row key.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LedgerKey {
    pub sku: CatalogItemId,
    pub facility: FacilityId,
}

impl LedgerKey {
    pub fn new(sku: CatalogItemId, facility: FacilityId) -> Self {
        Self { sku, facility }
    }

    pub fn stream_id(&self) -> AggregateId {
        AggregateId::derived("inventory-ledger", &format!("{}:{}", self.sku, self.facility))
    }
}

/// Aggregate root: InventoryLedgerEntry.
///
/// Accumulate-only. The single decreasing operation is the compensating
/// [`ReversePoRaise`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventoryLedgerEntry {
    id: AggregateId,
    key: Option<LedgerKey>,
    po_raise_quantity: i64,
    po_approve_quantity: i64,
    grn_done_quantity: i64,
    updated_at: Option<DateTime<Utc>>,
    version: u64,
}

impl InventoryLedgerEntry {
    pub fn empty(id: AggregateId) -> Self {
        Self {
            id,
            key: None,
            po_raise_quantity: 0,
            po_approve_quantity: 0,
            grn_done_quantity: 0,
            updated_at: None,
            version: 0,
        }
    }

    pub fn for_key(key: LedgerKey) -> Self {
        Self::empty(key.stream_id())
    }

    /// `false` until the first event for the key.
    pub fn exists(&self) -> bool {
        self.key.is_some()
    }

    pub fn key(&self) -> Option<LedgerKey> {
        self.key
    }

    pub fn po_raise_quantity(&self) -> i64 {
        self.po_raise_quantity
    }

    pub fn po_approve_quantity(&self) -> i64 {
        self.po_approve_quantity
    }

    pub fn grn_done_quantity(&self) -> i64 {
        self.grn_done_quantity
    }

    /// Available-to-promise: QC-passed stock on hand.
    pub fn total_available_quantity(&self) -> i64 {
        self.grn_done_quantity
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }
}

impl AggregateRoot for InventoryLedgerEntry {
    type Id = AggregateId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: RecordPoRaised (a submitted PO line now awaits approval).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordPoRaised {
    pub key: LedgerKey,
    pub po_id: AggregateId,
    pub quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReversePoRaise (the raised PO was rejected or cancelled).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReversePoRaise {
    pub key: LedgerKey,
    pub po_id: AggregateId,
    pub quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordPoApproved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordPoApproved {
    pub key: LedgerKey,
    pub po_id: AggregateId,
    pub quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordGrnDone. `quantity` is QC-passed stock only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordGrnDone {
    pub key: LedgerKey,
    pub po_id: AggregateId,
    pub grn_id: AggregateId,
    pub quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerCommand {
    RecordPoRaised(RecordPoRaised),
    ReversePoRaise(ReversePoRaise),
    RecordPoApproved(RecordPoApproved),
    RecordGrnDone(RecordGrnDone),
}

impl LedgerCommand {
    fn key(&self) -> LedgerKey {
        match self {
            LedgerCommand::RecordPoRaised(c) => c.key,
            LedgerCommand::ReversePoRaise(c) => c.key,
            LedgerCommand::RecordPoApproved(c) => c.key,
            LedgerCommand::RecordGrnDone(c) => c.key,
        }
    }

    fn quantity(&self) -> i64 {
        match self {
            LedgerCommand::RecordPoRaised(c) => c.quantity,
            LedgerCommand::ReversePoRaise(c) => c.quantity,
            LedgerCommand::RecordPoApproved(c) => c.quantity,
            LedgerCommand::RecordGrnDone(c) => c.quantity,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoRaiseRecorded {
    pub key: LedgerKey,
    pub po_id: AggregateId,
    pub quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoRaiseReversed {
    pub key: LedgerKey,
    pub po_id: AggregateId,
    pub quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoApprovalRecorded {
    pub key: LedgerKey,
    pub po_id: AggregateId,
    pub quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrnDoneRecorded {
    pub key: LedgerKey,
    pub po_id: AggregateId,
    pub grn_id: AggregateId,
    pub quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerEvent {
    PoRaiseRecorded(PoRaiseRecorded),
    PoRaiseReversed(PoRaiseReversed),
    PoApprovalRecorded(PoApprovalRecorded),
    GrnDoneRecorded(GrnDoneRecorded),
}

impl Event for LedgerEvent {
    fn event_type(&self) -> &'static str {
        match self {
            LedgerEvent::PoRaiseRecorded(_) => "inventory.ledger.po_raised",
            LedgerEvent::PoRaiseReversed(_) => "inventory.ledger.po_raise_reversed",
            LedgerEvent::PoApprovalRecorded(_) => "inventory.ledger.po_approved",
            LedgerEvent::GrnDoneRecorded(_) => "inventory.ledger.grn_done",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            LedgerEvent::PoRaiseRecorded(e) => e.occurred_at,
            LedgerEvent::PoRaiseReversed(e) => e.occurred_at,
            LedgerEvent::PoApprovalRecorded(e) => e.occurred_at,
            LedgerEvent::GrnDoneRecorded(e) => e.occurred_at,
        }
    }
}

impl Aggregate for InventoryLedgerEntry {
    type Command = LedgerCommand;
    type Event = LedgerEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        let key = match event {
            LedgerEvent::PoRaiseRecorded(e) => {
                self.po_raise_quantity += e.quantity;
                e.key
            }
            LedgerEvent::PoRaiseReversed(e) => {
                self.po_raise_quantity -= e.quantity;
                e.key
            }
            LedgerEvent::PoApprovalRecorded(e) => {
                self.po_approve_quantity += e.quantity;
                e.key
            }
            LedgerEvent::GrnDoneRecorded(e) => {
                self.grn_done_quantity += e.quantity;
                e.key
            }
        };
        self.key.get_or_insert(key);
        self.updated_at = Some(event.occurred_at());
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        let key = command.key();
        if key.stream_id() != self.id {
            return Err(DomainError::invariant("ledger key does not match stream"));
        }
        if command.quantity() <= 0 {
            return Err(DomainError::validation("ledger quantity must be positive"));
        }

        let event = match command {
            LedgerCommand::RecordPoRaised(c) => LedgerEvent::PoRaiseRecorded(PoRaiseRecorded {
                key: c.key,
                po_id: c.po_id,
                quantity: c.quantity,
                occurred_at: c.occurred_at,
            }),
            LedgerCommand::ReversePoRaise(c) => {
                if c.quantity > self.po_raise_quantity {
                    return Err(DomainError::invariant(format!(
                        "reversal of {} exceeds raised quantity {}",
                        c.quantity, self.po_raise_quantity
                    )));
                }
                LedgerEvent::PoRaiseReversed(PoRaiseReversed {
                    key: c.key,
                    po_id: c.po_id,
                    quantity: c.quantity,
                    occurred_at: c.occurred_at,
                })
            }
            LedgerCommand::RecordPoApproved(c) => {
                LedgerEvent::PoApprovalRecorded(PoApprovalRecorded {
                    key: c.key,
                    po_id: c.po_id,
                    quantity: c.quantity,
                    occurred_at: c.occurred_at,
                })
            }
            LedgerCommand::RecordGrnDone(c) => LedgerEvent::GrnDoneRecorded(GrnDoneRecorded {
                key: c.key,
                po_id: c.po_id,
                grn_id: c.grn_id,
                quantity: c.quantity,
                occurred_at: c.occurred_at,
            }),
        };
        Ok(vec![event])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use procura_events::execute;

    fn test_key() -> LedgerKey {
        LedgerKey::new(CatalogItemId(42), FacilityId::new())
    }

    fn raise(key: LedgerKey, quantity: i64) -> LedgerCommand {
        LedgerCommand::RecordPoRaised(RecordPoRaised {
            key,
            po_id: AggregateId::new(),
            quantity,
            occurred_at: Utc::now(),
        })
    }

    fn grn_done(key: LedgerKey, quantity: i64) -> LedgerCommand {
        LedgerCommand::RecordGrnDone(RecordGrnDone {
            key,
            po_id: AggregateId::new(),
            grn_id: AggregateId::new(),
            quantity,
            occurred_at: Utc::now(),
        })
    }

    #[test]
    fn entry_is_created_by_first_event() {
        let key = test_key();
        let mut entry = InventoryLedgerEntry::for_key(key);
        assert!(!entry.exists());

        execute(&mut entry, &raise(key, 100)).unwrap();
        assert!(entry.exists());
        assert_eq!(entry.key(), Some(key));
        assert_eq!(entry.po_raise_quantity(), 100);
    }

    #[test]
    fn approval_and_receipt_accumulate() {
        let key = test_key();
        let mut entry = InventoryLedgerEntry::for_key(key);
        execute(&mut entry, &raise(key, 100)).unwrap();
        execute(
            &mut entry,
            &LedgerCommand::RecordPoApproved(RecordPoApproved {
                key,
                po_id: AggregateId::new(),
                quantity: 100,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        execute(&mut entry, &grn_done(key, 40)).unwrap();
        execute(&mut entry, &grn_done(key, 50)).unwrap();

        assert_eq!(entry.po_approve_quantity(), 100);
        assert_eq!(entry.grn_done_quantity(), 90);
        assert_eq!(entry.total_available_quantity(), 90);
        assert_eq!(entry.version(), 4);
    }

    #[test]
    fn reversal_cannot_go_negative() {
        let key = test_key();
        let mut entry = InventoryLedgerEntry::for_key(key);
        execute(&mut entry, &raise(key, 10)).unwrap();

        let reverse = |quantity| {
            LedgerCommand::ReversePoRaise(ReversePoRaise {
                key,
                po_id: AggregateId::new(),
                quantity,
                occurred_at: Utc::now(),
            })
        };
        let err = execute(&mut entry, &reverse(11)).unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));

        execute(&mut entry, &reverse(10)).unwrap();
        assert_eq!(entry.po_raise_quantity(), 0);
    }

    #[test]
    fn non_positive_quantities_are_rejected() {
        let key = test_key();
        let entry = InventoryLedgerEntry::for_key(key);
        assert!(matches!(
            entry.handle(&grn_done(key, 0)).unwrap_err(),
            DomainError::Validation(_)
        ));
        assert!(matches!(
            entry.handle(&raise(key, -5)).unwrap_err(),
            DomainError::Validation(_)
        ));
    }

    #[test]
    fn command_for_another_key_is_refused() {
        let entry = InventoryLedgerEntry::for_key(test_key());
        let err = entry.handle(&raise(test_key(), 1)).unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig { cases: 128, ..ProptestConfig::default() })]

            #[test]
            fn grn_done_only_grows_by_posted_quantity(qtys in prop::collection::vec(-5i64..50, 1..30)) {
                let key = test_key();
                let mut entry = InventoryLedgerEntry::for_key(key);
                let mut expected = 0;
                for q in qtys {
                    if execute(&mut entry, &grn_done(key, q)).is_ok() {
                        expected += q;
                    }
                    prop_assert_eq!(entry.grn_done_quantity(), expected);
                    prop_assert!(entry.grn_done_quantity() >= 0);
                }
            }
        }
    }
}
