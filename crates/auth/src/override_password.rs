use sha2::{Digest, Sha256};

use procura_core::DomainError;

/// Optional shared secret that must accompany every approval decision when configured.
#[derive(Clone, Default)]
pub struct OverridePassword {
    digest: Option<[u8; 32]>,
}

impl core::fmt::Debug for OverridePassword {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("OverridePassword")
            .field("configured", &self.digest.is_some())
            .finish()
    }
}

impl OverridePassword {
    /// No password configured: every decision passes this gate.
    pub fn disabled() -> Self {
        Self { digest: None }
    }

    pub fn new(secret: impl AsRef<str>) -> Self {
        Self {
            digest: Some(digest(secret.as_ref())),
        }
    }

    /// Blank secrets count as "not configured".
    pub fn from_config(secret: Option<&str>) -> Self {
        match secret.map(str::trim) {
            Some(s) if !s.is_empty() => Self::new(s),
            _ => Self::disabled(),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.digest.is_some()
    }

    /// Compares fixed-length digests so the check does not leak the secret's length.
    pub fn verify(&self, supplied: Option<&str>) -> Result<(), DomainError> {
        let Some(expected) = self.digest else {
            return Ok(());
        };
        let Some(supplied) = supplied else {
            return Err(DomainError::Unauthorized);
        };
        let actual = digest(supplied);
        let diff = expected
            .iter()
            .zip(actual.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b));
        if diff == 0 {
            Ok(())
        } else {
            Err(DomainError::Unauthorized)
        }
    }
}

fn digest(secret: &str) -> [u8; 32] {
    Sha256::digest(secret.as_bytes()).into()
}
