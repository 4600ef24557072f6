//! Device-side signing of proposed configs.

use crate::identity::{Config, ConfigDigest, PublicKey, Signature};
use crate::serialization::SerializationError;
use ring::rand::SystemRandom;
use ring::signature::{Ed25519KeyPair, KeyPair};
use thiserror::Error;

/// Key generation and loading errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    #[error("key generation failed")]
    Generation,

    #[error("invalid PKCS#8 key material")]
    InvalidPkcs8,
}

/// A device's Ed25519 signing key.
pub struct DeviceKey {
    pair: Ed25519KeyPair,
    pkcs8: Vec<u8>,
}

impl DeviceKey {
    /// Generate a fresh key from the system RNG.
    pub fn generate() -> Result<Self, KeyError> {
        let rng = SystemRandom::new();
        let document = Ed25519KeyPair::generate_pkcs8(&rng).map_err(|_| KeyError::Generation)?;
        Self::from_pkcs8(document.as_ref())
    }

    /// Load a key from PKCS#8 v2 bytes.
    pub fn from_pkcs8(pkcs8: &[u8]) -> Result<Self, KeyError> {
        let pair = Ed25519KeyPair::from_pkcs8(pkcs8).map_err(|_| KeyError::InvalidPkcs8)?;
        Ok(Self {
            pair,
            pkcs8: pkcs8.to_vec(),
        })
    }

    /// PKCS#8 encoding, for storing the key on the device.
    pub fn pkcs8(&self) -> &[u8] {
        &self.pkcs8
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.pair.public_key().as_ref().to_vec())
    }

    pub fn sign_digest(&self, digest: &ConfigDigest) -> Signature {
        Signature(self.pair.sign(digest.as_bytes()).as_ref().to_vec())
    }

    /// Sign a proposed config, producing an approving vote signature.
    pub fn sign_config(&self, config: &Config) -> Result<Signature, SerializationError> {
        Ok(self.sign_digest(&config.digest()?))
    }
}

impl std::fmt::Debug for DeviceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceKey")
            .field("public_key", &hex::encode(self.pair.public_key().as_ref()))
            .finish_non_exhaustive()
    }
}
