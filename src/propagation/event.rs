//! Events broadcast to every replica of an identity.

use crate::identity::{Config, ConfigDigest, IdentityId, Vote};
use crate::ledger::Block;
use crate::serialization::{from_cbor, to_cbor, SerializationError};
use serde::{Deserialize, Serialize};

/// A state transition for one identity, applied by every roster member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    /// A new identity and its genesis chain pair.
    InstallIdentity {
        id: IdentityId,
        latest: Config,
        root: Block,
        data: Block,
    },
    /// A candidate config; opens a fresh voting round.
    SetProposed { id: IdentityId, config: Config },
    /// A device's vote on the candidate whose digest is `proposal`.
    /// Replicas whose open candidate has a different digest drop it.
    RecordVote {
        id: IdentityId,
        proposal: ConfigDigest,
        vote: Vote,
    },
    /// A data block appended by the ledger after quorum.
    InstallCommitted { id: IdentityId, block: Block },
}

impl Event {
    /// Identity this event belongs to.
    pub fn identity(&self) -> IdentityId {
        match self {
            Event::InstallIdentity { id, .. }
            | Event::SetProposed { id, .. }
            | Event::RecordVote { id, .. }
            | Event::InstallCommitted { id, .. } => *id,
        }
    }

    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::InstallIdentity { .. } => "install_identity",
            Event::SetProposed { .. } => "set_proposed",
            Event::RecordVote { .. } => "record_vote",
            Event::InstallCommitted { .. } => "install_committed",
        }
    }

    /// Wire encoding.
    pub fn to_bytes(&self) -> Result<Vec<u8>, SerializationError> {
        to_cbor(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SerializationError> {
        from_cbor(bytes)
    }
}
