//! In-process ledger for tests and single-process clusters.
//!
//! Blocks are hash-linked exactly like the real engine would link them, but
//! nothing is co-signed or persisted. Genesis is deterministic in
//! `(roster, params, payload)`, so creating the same identity twice yields
//! the same chain pair.

use super::traits::*;
use crate::identity::Roster;
use crate::serialization::cbor_sha256;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// In-memory chain engine.
#[derive(Clone, Default)]
pub struct InMemoryLedger {
    state: Arc<Mutex<LedgerState>>,
}

#[derive(Default)]
struct LedgerState {
    blocks: HashMap<BlockHash, Block>,
    /// block -> the block appended after it
    successors: HashMap<BlockHash, BlockHash>,
    fail_genesis: bool,
    fail_append: bool,
    appends: usize,
}

/// Fields covered by a block hash.
#[derive(Serialize)]
struct BlockHeader<'a> {
    index: u64,
    roster: &'a Roster,
    payload: &'a [u8],
    back_link: Option<BlockHash>,
    root: Option<BlockHash>,
}

fn seal(
    index: u64,
    roster: &Roster,
    payload: Vec<u8>,
    back_link: Option<BlockHash>,
    root: Option<BlockHash>,
) -> LedgerResult<Block> {
    let header = BlockHeader {
        index,
        roster,
        payload: &payload,
        back_link,
        root,
    };
    let hash = cbor_sha256(&header).map_err(|e| LedgerError::Encoding(e.to_string()))?;
    Ok(Block {
        hash: BlockHash::from_bytes(&hash),
        index,
        roster: roster.clone(),
        payload,
        back_link,
        root,
    })
}

impl InMemoryLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make subsequent genesis requests fail (for test setup).
    pub fn set_fail_genesis(&self, fail: bool) {
        self.lock().fail_genesis = fail;
    }

    /// Make subsequent appends fail (for test setup).
    pub fn set_fail_append(&self, fail: bool) {
        self.lock().fail_append = fail;
    }

    /// Number of successful appends.
    pub fn append_count(&self) -> usize {
        self.lock().appends
    }

    /// Look up a block by hash.
    pub fn block(&self, hash: &BlockHash) -> Option<Block> {
        self.lock().blocks.get(hash).cloned()
    }

    /// Every block of the chain starting at `genesis`, oldest first.
    pub fn chain(&self, genesis: &BlockHash) -> Vec<Block> {
        let state = self.lock();
        let mut chain = Vec::new();
        let mut cursor = state.blocks.get(genesis);
        while let Some(block) = cursor {
            chain.push(block.clone());
            cursor = state
                .successors
                .get(&block.hash)
                .and_then(|next| state.blocks.get(next));
        }
        chain
    }
}

#[async_trait]
impl LedgerClient for InMemoryLedger {
    async fn create_genesis_pair(
        &self,
        roster: &Roster,
        params: &ChainParams,
        payload: &[u8],
    ) -> LedgerResult<(Block, Block)> {
        let mut state = self.lock();
        if state.fail_genesis {
            return Err(LedgerError::Unavailable(
                "genesis signing failed".to_string(),
            ));
        }

        let params_payload =
            crate::serialization::to_cbor(params).map_err(|e| LedgerError::Encoding(e.to_string()))?;
        let root = seal(0, roster, params_payload, None, None)?;
        let data = seal(0, roster, payload.to_vec(), None, Some(root.hash))?;

        state.blocks.entry(root.hash).or_insert_with(|| root.clone());
        state.blocks.entry(data.hash).or_insert_with(|| data.clone());
        Ok((root, data))
    }

    async fn append_block(
        &self,
        root: &Block,
        current: &Block,
        payload: &[u8],
    ) -> LedgerResult<Block> {
        let mut state = self.lock();
        if state.fail_append {
            return Err(LedgerError::Unavailable(
                "block co-signing failed".to_string(),
            ));
        }
        if !state.blocks.contains_key(&root.hash) {
            return Err(LedgerError::BlockNotFound(root.hash));
        }
        if !state.blocks.contains_key(&current.hash) {
            return Err(LedgerError::BlockNotFound(current.hash));
        }
        if current.root != Some(root.hash) {
            return Err(LedgerError::RootMismatch {
                root: root.hash,
                data: current.hash,
            });
        }
        if let Some(next) = state.successors.get(&current.hash) {
            let mut head = *next;
            while let Some(after) = state.successors.get(&head) {
                head = *after;
            }
            return Err(LedgerError::StaleHead {
                current: current.hash,
                head,
            });
        }

        let block = seal(
            current.index + 1,
            &root.roster,
            payload.to_vec(),
            Some(current.hash),
            Some(root.hash),
        )?;
        state.blocks.insert(block.hash, block.clone());
        state.successors.insert(current.hash, block.hash);
        state.appends += 1;
        Ok(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::ServerId;

    fn roster() -> Roster {
        Roster::new(vec![ServerId::new("s0"), ServerId::new("s1")])
    }

    #[tokio::test]
    async fn test_genesis_is_deterministic() {
        let ledger = InMemoryLedger::new();
        let params = ChainParams::default();

        let (root1, data1) = ledger
            .create_genesis_pair(&roster(), &params, b"config")
            .await
            .unwrap();
        let (root2, data2) = ledger
            .create_genesis_pair(&roster(), &params, b"config")
            .await
            .unwrap();

        assert_eq!(root1, root2);
        assert_eq!(data1, data2);
        assert_eq!(data1.root, Some(root1.hash));
        assert_eq!(data1.roster, roster());
    }

    #[tokio::test]
    async fn test_append_links_blocks() {
        let ledger = InMemoryLedger::new();
        let (root, genesis) = ledger
            .create_genesis_pair(&roster(), &ChainParams::default(), b"v0")
            .await
            .unwrap();

        let b1 = ledger.append_block(&root, &genesis, b"v1").await.unwrap();
        let b2 = ledger.append_block(&root, &b1, b"v2").await.unwrap();

        assert_eq!(b1.index, 1);
        assert_eq!(b1.back_link, Some(genesis.hash));
        assert_eq!(b2.back_link, Some(b1.hash));
        assert_eq!(ledger.append_count(), 2);

        let payloads: Vec<Vec<u8>> = ledger
            .chain(&genesis.hash)
            .into_iter()
            .map(|b| b.payload)
            .collect();
        assert_eq!(payloads, vec![b"v0".to_vec(), b"v1".to_vec(), b"v2".to_vec()]);
    }

    #[tokio::test]
    async fn test_append_after_stale_head_fails() {
        let ledger = InMemoryLedger::new();
        let (root, genesis) = ledger
            .create_genesis_pair(&roster(), &ChainParams::default(), b"v0")
            .await
            .unwrap();
        let b1 = ledger.append_block(&root, &genesis, b"v1").await.unwrap();

        let result = ledger.append_block(&root, &genesis, b"v1-again").await;
        assert_eq!(
            result,
            Err(LedgerError::StaleHead {
                current: genesis.hash,
                head: b1.hash,
            })
        );
        assert_eq!(ledger.append_count(), 1);
    }

    #[tokio::test]
    async fn test_append_rejects_foreign_root() {
        let ledger = InMemoryLedger::new();
        let (root_a, data_a) = ledger
            .create_genesis_pair(&roster(), &ChainParams::default(), b"a")
            .await
            .unwrap();
        let other = Roster::new(vec![ServerId::new("s9")]);
        let (root_b, _) = ledger
            .create_genesis_pair(&other, &ChainParams::default(), b"b")
            .await
            .unwrap();

        let result = ledger.append_block(&root_b, &data_a, b"x").await;
        assert!(matches!(result, Err(LedgerError::RootMismatch { .. })));
        assert!(ledger.append_block(&root_a, &data_a, b"x").await.is_ok());
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let ledger = InMemoryLedger::new();
        ledger.set_fail_genesis(true);
        let result = ledger
            .create_genesis_pair(&roster(), &ChainParams::default(), b"v0")
            .await;
        assert!(matches!(result, Err(LedgerError::Unavailable(_))));

        ledger.set_fail_genesis(false);
        let (root, genesis) = ledger
            .create_genesis_pair(&roster(), &ChainParams::default(), b"v0")
            .await
            .unwrap();

        ledger.set_fail_append(true);
        assert!(ledger.append_block(&root, &genesis, b"v1").await.is_err());
        assert_eq!(ledger.append_count(), 0);
    }
}
