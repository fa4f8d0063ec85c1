use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use procura_core::{AggregateId, DomainError};

use crate::ApproverRole;

/// Claim sealed inside an approval token: who may decide on which purchase order, until when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalClaims {
    pub po_id: AggregateId,
    pub role: ApproverRole,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("approval token has expired")]
    Expired,

    /// Decoding, decryption, authentication or parsing failed.
    #[error("approval token is invalid")]
    Invalid,

    /// The claim could not be serialised or encrypted.
    #[error("failed to seal approval token")]
    Seal,

    #[error("invalid token configuration: {0}")]
    InvalidKey(String),
}

impl From<TokenError> for DomainError {
    fn from(value: TokenError) -> Self {
        match value {
            TokenError::Expired => DomainError::TokenExpired,
            TokenError::Invalid => DomainError::TokenInvalid,
            TokenError::Seal => DomainError::invariant("approval token could not be sealed"),
            TokenError::InvalidKey(msg) => DomainError::validation(msg),
        }
    }
}

/// Validate the time window of decoded claims.
///
/// A token stays usable up to and including `expires_at`.
pub fn validate_claims(claims: &ApprovalClaims, now: DateTime<Utc>) -> Result<(), TokenError> {
    if claims.expires_at <= claims.issued_at {
        return Err(TokenError::Invalid);
    }
    if now > claims.expires_at {
        return Err(TokenError::Expired);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn claims(now: DateTime<Utc>, ttl: Duration) -> ApprovalClaims {
        ApprovalClaims {
            po_id: AggregateId::new(),
            role: ApproverRole::Admin,
            issued_at: now,
            expires_at: now + ttl,
        }
    }

    #[test]
    fn valid_inside_window_and_at_boundary() {
        let now = Utc::now();
        let c = claims(now, Duration::minutes(60));
        assert_eq!(validate_claims(&c, now), Ok(()));
        assert_eq!(validate_claims(&c, c.expires_at), Ok(()));
    }

    #[test]
    fn expired_after_window() {
        let now = Utc::now();
        let c = claims(now, Duration::minutes(1));
        assert_eq!(
            validate_claims(&c, now + Duration::minutes(2)),
            Err(TokenError::Expired)
        );
    }

    #[test]
    fn empty_window_is_invalid() {
        let now = Utc::now();
        let c = claims(now, Duration::zero());
        assert_eq!(validate_claims(&c, now), Err(TokenError::Invalid));
    }

    #[test]
    fn maps_into_domain_taxonomy() {
        assert_eq!(DomainError::from(TokenError::Expired), DomainError::TokenExpired);
        assert_eq!(DomainError::from(TokenError::Invalid), DomainError::TokenInvalid);
    }
}
