//! Vote signature verification.
//!
//! A device approves a proposal by signing the proposal's [`ConfigDigest`].
//! Verification is stateless and never retried.

use crate::identity::{ConfigDigest, PublicKey, Signature};
use ring::signature::{UnparsedPublicKey, ED25519};
use thiserror::Error;

/// Length of an Ed25519 public key.
pub const ED25519_PUBLIC_KEY_LEN: usize = 32;

/// Signature verification errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    #[error("public key must be {expected} bytes, got {actual}")]
    MalformedKey { expected: usize, actual: usize },

    #[error("signature verification failed")]
    InvalidSignature,
}

/// Verifies a detached signature over a config digest.
pub trait SignatureVerifier: Send + Sync {
    fn verify(
        &self,
        digest: &ConfigDigest,
        public_key: &PublicKey,
        signature: &Signature,
    ) -> Result<(), VerifyError>;
}

/// Ed25519 verifier backed by `ring`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ed25519Verifier;

impl SignatureVerifier for Ed25519Verifier {
    fn verify(
        &self,
        digest: &ConfigDigest,
        public_key: &PublicKey,
        signature: &Signature,
    ) -> Result<(), VerifyError> {
        let key = public_key.as_bytes();
        if key.len() != ED25519_PUBLIC_KEY_LEN {
            return Err(VerifyError::MalformedKey {
                expected: ED25519_PUBLIC_KEY_LEN,
                actual: key.len(),
            });
        }
        UnparsedPublicKey::new(&ED25519, key)
            .verify(digest.as_bytes(), signature.as_bytes())
            .map_err(|_| VerifyError::InvalidSignature)
    }
}
