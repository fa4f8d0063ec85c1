//! Infrastructure layer: event store, units of work, configuration, external
//! collaborators and the procurement façade.

pub mod clock;
pub mod command_dispatcher;
pub mod config;
pub mod directory;
pub mod error;
pub mod event_store;
pub mod notify;
pub mod service;
pub mod unit_of_work;

pub use error::{ErrorKind, ServiceError, ServiceResult};
pub use service::{
    BatchInput, Collaborators, Completed, DecisionRequest, GrnLineInput, GrnPosted,
    LedgerSnapshot, NewPurchaseOrder, ProcurementService, RequestedLine,
};
