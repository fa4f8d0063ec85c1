//! SKU split allocation.
//!
//! Partitions the ordered quantity of an approved purchase order line into
//! warehouse-unique unit codes. Conservation (`Σ split ≤ ordered`) is enforced by
//! [`SplitAllocation`]; global uniqueness of a unit code by [`UnitCodeClaim`].

pub mod claim;
pub mod split;
pub mod unit_code;

pub use claim::{ClaimUnitCode, UnitCodeClaim, UnitCodeClaimEvent, UnitCodeClaimed};
pub use split::{
    Allocate, RecordReceipt, Split, SplitAllocation, SplitAllocationCommand,
    SplitAllocationEvent, SplitCreated, SplitReceiptRecorded, SplitStatus, SplitToppedUp,
};
pub use unit_code::{CATALOG_DIGITS, SUFFIX_DIGITS, UnitCode};
