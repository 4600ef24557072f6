//! Trait abstraction over the append-only chain engine.
//!
//! The chain engine (block storage, forward links, collective signing) is
//! an external collaborator. Identities only need two operations from it:
//! create a root/data chain pair, and append a block to a data chain.

use crate::identity::Roster;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::array::TryFromSliceError;
use std::fmt;
use thiserror::Error;

/// Block hash (32 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockHash([u8; 32]);

impl BlockHash {
    /// Create from bytes (first 32 bytes are used).
    ///
    /// # Panics
    ///
    /// Panics if `bytes` is shorter than 32 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&bytes[..32]);
        Self(hash)
    }

    /// Get bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl TryFrom<&[u8]> for BlockHash {
    type Error = TryFromSliceError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        Ok(Self(<[u8; 32]>::try_from(bytes)?))
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// A block as returned by the chain engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub hash: BlockHash,
    /// Height in its chain, genesis is 0.
    pub index: u64,
    /// Servers that host and co-sign the chain.
    pub roster: Roster,
    /// Opaque payload. Data blocks carry an encoded config.
    pub payload: Vec<u8>,
    /// Previous block in the same chain.
    pub back_link: Option<BlockHash>,
    /// Root chain block a data block hangs off.
    pub root: Option<BlockHash>,
}

/// Shape parameters handed to the chain engine at genesis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainParams {
    /// Base of the skip-list heights.
    #[serde(default = "default_base_height")]
    pub base_height: u32,
    /// Maximum skip-list height.
    #[serde(default = "default_max_height")]
    pub max_height: u32,
}

fn default_base_height() -> u32 {
    2
}

fn default_max_height() -> u32 {
    10
}

impl Default for ChainParams {
    fn default() -> Self {
        Self {
            base_height: default_base_height(),
            max_height: default_max_height(),
        }
    }
}

/// Result type for ledger operations.
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Ledger operation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// The referenced block is unknown to the ledger.
    #[error("block {0} not found")]
    BlockNotFound(BlockHash),

    /// Append attempted after a block that is no longer the chain head.
    #[error("block {current} is not the chain head (head is {head})")]
    StaleHead { current: BlockHash, head: BlockHash },

    /// The data block does not hang off the given root block.
    #[error("data block {data} does not belong to root {root}")]
    RootMismatch { root: BlockHash, data: BlockHash },

    /// The engine or its signers could not be reached.
    #[error("ledger unavailable: {0}")]
    Unavailable(String),

    /// Block content could not be encoded.
    #[error("ledger encoding failed: {0}")]
    Encoding(String),
}

/// Trait abstraction for the chain engine.
///
/// Implementations must be shareable between tasks; the coordinator calls
/// them without holding any identity lock.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Create a root chain for `roster` and a data chain under it whose
    /// genesis block carries `payload`. Returns `(root, data)` genesis blocks.
    async fn create_genesis_pair(
        &self,
        roster: &Roster,
        params: &ChainParams,
        payload: &[u8],
    ) -> LedgerResult<(Block, Block)>;

    /// Append `payload` to the data chain after `current`, which must be
    /// the chain head. Returns the new head.
    async fn append_block(
        &self,
        root: &Block,
        current: &Block,
        payload: &[u8],
    ) -> LedgerResult<Block>;
}
