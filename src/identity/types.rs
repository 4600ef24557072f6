//! Value types shared by every component: identity ids, device configs,
//! votes and rosters.

use crate::error::{IdentityError, IdentityResult};
use crate::ledger::Block;
use crate::serialization::{cbor_sha256, from_cbor, to_cbor, SerializationError};
use serde::{Deserialize, Serialize};
use std::array::TryFromSliceError;
use std::collections::BTreeMap;
use std::fmt;

/// Identity identifier: the hash of the identity's genesis data block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IdentityId([u8; 32]);

impl IdentityId {
    /// Create from bytes (first 32 bytes are used).
    ///
    /// # Panics
    ///
    /// Panics if `bytes` is shorter than 32 bytes. Use `TryFrom<&[u8]>` for
    /// untrusted input.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut id = [0u8; 32];
        id.copy_from_slice(&bytes[..32]);
        Self(id)
    }

    /// Derive the id of an identity from its genesis data block.
    pub fn from_genesis(data: &Block) -> Self {
        Self(*data.hash.as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl TryFrom<&[u8]> for IdentityId {
    type Error = TryFromSliceError;

    /// Exactly 32 bytes.
    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        Ok(Self(<[u8; 32]>::try_from(bytes)?))
    }
}

impl fmt::Display for IdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// A device's Ed25519 public key (32 bytes).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKey(pub Vec<u8>);

impl PublicKey {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// A detached signature over a [`ConfigDigest`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Signature(pub Vec<u8>);

impl Signature {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// SHA-256 over the canonical CBOR encoding of a [`Config`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConfigDigest([u8; 32]);

impl ConfigDigest {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for ConfigDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// The device set of an identity and the number of votes needed to change it.
///
/// Configs are values: a change is expressed by proposing a new config,
/// never by mutating the current one. Device names are map keys and
/// therefore unique; the map is ordered so the digest is deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub devices: BTreeMap<String, PublicKey>,
    pub threshold: u32,
}

impl Config {
    /// Create a validated config.
    pub fn new(devices: BTreeMap<String, PublicKey>, threshold: u32) -> IdentityResult<Self> {
        let config = Self { devices, threshold };
        config.validate()?;
        Ok(config)
    }

    /// Threshold must be at least one. It may exceed the device count, in
    /// which case only a vote from every device reaches quorum.
    pub fn validate(&self) -> IdentityResult<()> {
        if self.threshold == 0 {
            return Err(IdentityError::InvalidConfig(
                "threshold must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Public key of a device, if it belongs to this config.
    pub fn device(&self, name: &str) -> Option<&PublicKey> {
        self.devices.get(name)
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// Digest that devices sign when voting for this config.
    pub fn digest(&self) -> Result<ConfigDigest, SerializationError> {
        cbor_sha256(self).map(ConfigDigest)
    }

    /// Encode as a data block payload.
    pub fn to_payload(&self) -> Result<Vec<u8>, SerializationError> {
        to_cbor(self)
    }

    /// Decode from a data block payload.
    pub fn from_payload(payload: &[u8]) -> Result<Self, SerializationError> {
        from_cbor(payload)
    }
}

/// A device's vote on the proposed config. `None` is an explicit rejection
/// and still counts toward quorum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub signer: String,
    pub signature: Option<Signature>,
}

impl Vote {
    pub fn approve(signer: impl Into<String>, signature: Signature) -> Self {
        Self {
            signer: signer.into(),
            signature: Some(signature),
        }
    }

    pub fn reject(signer: impl Into<String>) -> Self {
        Self {
            signer: signer.into(),
            signature: None,
        }
    }

    pub fn is_rejection(&self) -> bool {
        self.signature.is_none()
    }
}

/// Opaque server identifier (address or node name).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServerId(pub String);

impl ServerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ordered set of servers collectively hosting one identity's chain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Roster(Vec<ServerId>);

impl Roster {
    /// Build a roster, dropping repeated members while keeping first-seen order.
    pub fn new(members: impl IntoIterator<Item = ServerId>) -> Self {
        let mut list: Vec<ServerId> = Vec::new();
        for member in members {
            if !list.contains(&member) {
                list.push(member);
            }
        }
        Self(list)
    }

    pub fn members(&self) -> &[ServerId] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, server: &ServerId) -> bool {
        self.0.contains(server)
    }
}
