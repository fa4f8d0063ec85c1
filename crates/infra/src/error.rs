//! Service-level error: domain failures plus persistence failures.

use thiserror::Error;

use procura_core::DomainError;

use crate::event_store::EventStoreError;

/// Stable failure kind, safe to match on and to expose to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidReference,
    InvalidState,
    AlreadyDecided,
    AlreadyEdited,
    TokenExpired,
    TokenInvalid,
    Unauthorized,
    InvalidUnitCode,
    QuantityExceeded,
    LineClosed,
    Validation,
    NotFound,
    Conflict,
    InvariantViolation,
    PersistenceFailure,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InvalidReference => "invalid_reference",
            ErrorKind::InvalidState => "invalid_state",
            ErrorKind::AlreadyDecided => "already_decided",
            ErrorKind::AlreadyEdited => "already_edited",
            ErrorKind::TokenExpired => "token_expired",
            ErrorKind::TokenInvalid => "token_invalid",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::InvalidUnitCode => "invalid_unit_code",
            ErrorKind::QuantityExceeded => "quantity_exceeded",
            ErrorKind::LineClosed => "line_closed",
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::InvariantViolation => "invariant_violation",
            ErrorKind::PersistenceFailure => "persistence_failure",
        }
    }
}

impl core::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Storage failure, or a write conflict that outlived every retry.
    #[error("persistence failure: {0}")]
    PersistenceFailure(String),
}

impl ServiceError {
    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::PersistenceFailure(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::PersistenceFailure(_) => ErrorKind::PersistenceFailure,
            ServiceError::Domain(err) => match err {
                DomainError::InvalidReference(_) => ErrorKind::InvalidReference,
                DomainError::InvalidState(_) => ErrorKind::InvalidState,
                DomainError::AlreadyDecided(_) => ErrorKind::AlreadyDecided,
                DomainError::AlreadyEdited => ErrorKind::AlreadyEdited,
                DomainError::TokenExpired => ErrorKind::TokenExpired,
                DomainError::TokenInvalid => ErrorKind::TokenInvalid,
                DomainError::Unauthorized => ErrorKind::Unauthorized,
                DomainError::InvalidUnitCode(_) => ErrorKind::InvalidUnitCode,
                DomainError::QuantityExceeded(_) => ErrorKind::QuantityExceeded,
                DomainError::LineClosed(_) => ErrorKind::LineClosed,
                DomainError::Validation(_) | DomainError::InvalidId(_) => ErrorKind::Validation,
                DomainError::NotFound => ErrorKind::NotFound,
                DomainError::Conflict(_) => ErrorKind::Conflict,
                DomainError::InvariantViolation(_) => ErrorKind::InvariantViolation,
            },
        }
    }

    pub fn domain(&self) -> Option<&DomainError> {
        match self {
            ServiceError::Domain(err) => Some(err),
            ServiceError::PersistenceFailure(_) => None,
        }
    }
}

impl From<EventStoreError> for ServiceError {
    fn from(value: EventStoreError) -> Self {
        ServiceError::PersistenceFailure(value.to_string())
    }
}

impl From<procura_auth::TokenError> for ServiceError {
    fn from(value: procura_auth::TokenError) -> Self {
        ServiceError::Domain(value.into())
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;
