//! Approval Token Service.
//!
//! A token is `base64url(nonce || XChaCha20-Poly1305(claims_json))`. Each token gets a
//! fresh random 192-bit nonce, and the AEAD tag authenticates the claim, so a token
//! cannot be forged or altered without the key.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng, Payload};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use procura_core::AggregateId;

use crate::claims::{ApprovalClaims, TokenError, validate_claims};
use crate::ApproverRole;

/// Symmetric key length in bytes.
pub const TOKEN_KEY_LEN: usize = 32;

const NONCE_LEN: usize = 24;
const TAG_LEN: usize = 16;
const AAD: &[u8] = b"procura.approval-token.v1";

/// Token handed to an approver out of band.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub token: String,
    pub role: ApproverRole,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct ApprovalTokenService {
    cipher: XChaCha20Poly1305,
    ttl: Duration,
}

impl core::fmt::Debug for ApprovalTokenService {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ApprovalTokenService")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl ApprovalTokenService {
    /// `key` must be exactly [`TOKEN_KEY_LEN`] bytes; `ttl` must be positive.
    pub fn new(key: &[u8], ttl: Duration) -> Result<Self, TokenError> {
        if ttl <= Duration::zero() {
            return Err(TokenError::InvalidKey("token ttl must be positive".to_string()));
        }
        let cipher = XChaCha20Poly1305::new_from_slice(key).map_err(|_| {
            TokenError::InvalidKey(format!("expected {TOKEN_KEY_LEN} key bytes, got {}", key.len()))
        })?;
        Ok(Self { cipher, ttl })
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Seal a claim for `role` on `po_id`, valid from `now` for the configured ttl.
    pub fn issue(
        &self,
        po_id: AggregateId,
        role: ApproverRole,
        now: DateTime<Utc>,
    ) -> Result<IssuedToken, TokenError> {
        let claims = ApprovalClaims {
            po_id,
            role,
            issued_at: now,
            expires_at: now + self.ttl,
        };
        let plaintext = serde_json::to_vec(&claims).map_err(|_| TokenError::Seal)?;

        let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
        let sealed = self
            .cipher
            .encrypt(&nonce, Payload { msg: &plaintext, aad: AAD })
            .map_err(|_| TokenError::Seal)?;

        let mut raw = Vec::with_capacity(NONCE_LEN + sealed.len());
        raw.extend_from_slice(&nonce);
        raw.extend_from_slice(&sealed);

        Ok(IssuedToken {
            token: URL_SAFE_NO_PAD.encode(raw),
            role,
            expires_at: claims.expires_at,
        })
    }

    /// Open and check a token. Needs no stored state.
    pub fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<ApprovalClaims, TokenError> {
        let raw = URL_SAFE_NO_PAD
            .decode(token.trim())
            .map_err(|_| TokenError::Invalid)?;
        if raw.len() < NONCE_LEN + TAG_LEN {
            return Err(TokenError::Invalid);
        }

        let (nonce, sealed) = raw.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(XNonce::from_slice(nonce), Payload { msg: sealed, aad: AAD })
            .map_err(|_| {
                debug!("approval token failed authentication");
                TokenError::Invalid
            })?;

        let claims: ApprovalClaims =
            serde_json::from_slice(&plaintext).map_err(|_| TokenError::Invalid)?;
        validate_claims(&claims, now)?;
        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> ApprovalTokenService {
        ApprovalTokenService::new(&[7u8; TOKEN_KEY_LEN], Duration::minutes(60)).unwrap()
    }

    #[test]
    fn issued_token_validates_back_to_its_claim() {
        let svc = service();
        let po_id = AggregateId::new();
        let now = Utc::now();

        let issued = svc.issue(po_id, ApproverRole::CategoryHead, now).unwrap();
        assert_eq!(issued.expires_at, now + Duration::minutes(60));

        let claims = svc.validate(&issued.token, now + Duration::minutes(5)).unwrap();
        assert_eq!(claims.po_id, po_id);
        assert_eq!(claims.role, ApproverRole::CategoryHead);
    }

    #[test]
    fn same_claim_never_yields_the_same_token() {
        let svc = service();
        let po_id = AggregateId::new();
        let now = Utc::now();
        let a = svc.issue(po_id, ApproverRole::Admin, now).unwrap();
        let b = svc.issue(po_id, ApproverRole::Admin, now).unwrap();
        assert_ne!(a.token, b.token);
    }

    #[test]
    fn expired_token_is_rejected() {
        let svc = service();
        let now = Utc::now();
        let issued = svc.issue(AggregateId::new(), ApproverRole::Admin, now).unwrap();
        let err = svc.validate(&issued.token, now + Duration::minutes(61)).unwrap_err();
        assert_eq!(err, TokenError::Expired);
    }

    #[test]
    fn tampered_token_is_invalid() {
        let svc = service();
        let now = Utc::now();
        let issued = svc.issue(AggregateId::new(), ApproverRole::Admin, now).unwrap();

        let mut raw = URL_SAFE_NO_PAD.decode(&issued.token).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        let tampered = URL_SAFE_NO_PAD.encode(raw);

        assert_eq!(svc.validate(&tampered, now), Err(TokenError::Invalid));
    }

    #[test]
    fn token_from_another_key_is_invalid() {
        let other =
            ApprovalTokenService::new(&[9u8; TOKEN_KEY_LEN], Duration::minutes(60)).unwrap();
        let now = Utc::now();
        let issued = other.issue(AggregateId::new(), ApproverRole::Creator, now).unwrap();
        assert_eq!(service().validate(&issued.token, now), Err(TokenError::Invalid));
    }

    #[test]
    fn garbage_is_invalid() {
        let now = Utc::now();
        assert_eq!(service().validate("", now), Err(TokenError::Invalid));
        assert_eq!(service().validate("%%%not-base64%%%", now), Err(TokenError::Invalid));
        assert_eq!(service().validate("c2hvcnQ", now), Err(TokenError::Invalid));
    }

    #[test]
    fn rejects_bad_key_material() {
        assert!(matches!(
            ApprovalTokenService::new(&[1u8; 16], Duration::minutes(1)),
            Err(TokenError::InvalidKey(_))
        ));
        assert!(matches!(
            ApprovalTokenService::new(&[1u8; TOKEN_KEY_LEN], Duration::zero()),
            Err(TokenError::InvalidKey(_))
        ));
    }
}
