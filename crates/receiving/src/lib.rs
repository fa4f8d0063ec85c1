//! Goods receipt (GRN) reconciliation.
//!
//! One [`GrnRecord`] per purchase order accumulates every receipt posting. Line
//! status is a pure function of the accumulated quantities ([`line_status`]).

pub mod grn;
pub mod sku;
pub mod status;

pub use grn::{
    Batch, GrnEvent, GrnLine, GrnOpened, GrnRecord, LineDelta, PostReceipt, ReceiptLine,
    ReceiptPosted, default_batch_code,
};
pub use sku::Sku;
pub use status::{GrnLineStatus, line_status};
