//! CBOR serialization and hashing for chain payloads.
//!
//! - Block payloads and propagated events are CBOR via `ciborium`
//! - Config digests are SHA-256 over the canonical CBOR encoding
//! - Maps that feed a digest must be ordered (`BTreeMap`) so that every
//!   replica computes the same bytes

use serde::{de::DeserializeOwned, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Serialization errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SerializationError {
    /// CBOR encoding failed.
    #[error("CBOR encoding failed: {0}")]
    Encode(String),

    /// CBOR decoding failed.
    #[error("CBOR decoding failed: {0}")]
    Decode(String),
}

/// Serialize to CBOR bytes.
pub fn to_cbor<T: Serialize>(value: &T) -> Result<Vec<u8>, SerializationError> {
    let mut bytes = Vec::new();
    ciborium::into_writer(value, &mut bytes)
        .map_err(|e| SerializationError::Encode(format!("{:?}", e)))?;
    Ok(bytes)
}

/// Deserialize from CBOR bytes.
pub fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, SerializationError> {
    ciborium::from_reader(bytes).map_err(|e| SerializationError::Decode(format!("{:?}", e)))
}

/// SHA-256 of the CBOR encoding of `value`.
pub fn cbor_sha256<T: Serialize>(value: &T) -> Result<[u8; 32], SerializationError> {
    let bytes = to_cbor(value)?;
    Ok(Sha256::digest(&bytes).into())
}
