//! `procura-auth`: approval capability tokens and approver roles.
//!
//! Tokens are self-contained: validating one needs only the shared key, never a
//! server-side session. This crate is decoupled from HTTP, storage and delivery.

pub mod claims;
pub mod override_password;
pub mod roles;
pub mod token;

pub use claims::{ApprovalClaims, TokenError, validate_claims};
pub use override_password::OverridePassword;
pub use roles::{ApprovalChain, ApproverRole};
pub use token::{ApprovalTokenService, IssuedToken, TOKEN_KEY_LEN};
