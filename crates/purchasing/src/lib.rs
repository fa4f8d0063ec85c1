//! Purchasing domain module (purchase order lifecycle, event-sourced).
//!
//! Business rules for creating purchase orders and driving them through the
//! multi-role approval chain, implemented as deterministic domain logic (no IO,
//! no HTTP, no storage).

pub mod line;
pub mod order;
pub mod sequence;
pub mod status;

pub use line::{CatalogSnapshot, Dimensions, NewPoLine, PoLine};
pub use order::{
    ApprovalAction, ApprovalDecided, ApprovalRecord, Cancel, CreatePurchaseOrder, Decision,
    DeleteDraft, DraftDeleted, DraftUpdated, EditProposal, EditProposed, ProposeEdit,
    PurchaseOrder, PurchaseOrderCancelled, PurchaseOrderCommand, PurchaseOrderCreated,
    PurchaseOrderEvent, PurchaseOrderId, RecordDecision, SubmitForApproval,
    SubmittedForApproval, UpdateDraft,
};
pub use sequence::{AllocateCode, CodeAllocated, PoCode, PoCodeSequence, PoCodeSequenceEvent};
pub use status::{Priority, PurchaseOrderStatus};
