//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Deterministic business failures only. Storage and transport failures are
/// modelled in the infrastructure layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Unknown vendor, facility or catalog item.
    #[error("invalid reference: {0}")]
    InvalidReference(String),

    /// Operation is illegal for the current lifecycle state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The approval record targeted by a decision was already decided.
    #[error("already decided: {0}")]
    AlreadyDecided(String),

    /// The purchase order already carries its single edit proposal.
    #[error("purchase order already edited")]
    AlreadyEdited,

    #[error("approval token expired")]
    TokenExpired,

    #[error("approval token invalid")]
    TokenInvalid,

    /// Authorization failure at the domain boundary.
    #[error("unauthorized")]
    Unauthorized,

    #[error("invalid unit code: {0}")]
    InvalidUnitCode(String),

    /// A quantity would exceed what was ordered or what remains.
    #[error("quantity exceeded: {0}")]
    QuantityExceeded(String),

    /// Receipt posted against a completed or rejected GRN line.
    #[error("line closed: {0}")]
    LineClosed(String),

    /// A value failed validation (malformed input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    #[error("not found")]
    NotFound,

    /// A conflict occurred (e.g. stale stream revision).
    #[error("conflict: {0}")]
    Conflict(String),

    /// A state that must be unreachable was observed.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),
}

impl DomainError {
    pub fn invalid_reference(msg: impl Into<String>) -> Self {
        Self::InvalidReference(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn already_decided(msg: impl Into<String>) -> Self {
        Self::AlreadyDecided(msg.into())
    }

    pub fn invalid_unit_code(msg: impl Into<String>) -> Self {
        Self::InvalidUnitCode(msg.into())
    }

    pub fn quantity_exceeded(msg: impl Into<String>) -> Self {
        Self::QuantityExceeded(msg.into())
    }

    pub fn line_closed(msg: impl Into<String>) -> Self {
        Self::LineClosed(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_found() -> Self {
        Self::NotFound
    }
}
