//! Inventory ledger (event-sourced).
//!
//! One accumulator per (SKU, facility) tracking raised, approved and received
//! purchase quantities. Deterministic domain logic only.

pub mod ledger;

pub use ledger::{
    GrnDoneRecorded, InventoryLedgerEntry, LedgerCommand, LedgerEvent, LedgerKey,
    PoApprovalRecorded, PoRaiseRecorded, PoRaiseReversed, RecordGrnDone, RecordPoApproved,
    RecordPoRaised, ReversePoRaise,
};
