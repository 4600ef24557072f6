//! Per-replica identity state and the registry that hands it out.
//!
//! Locking is two-tier:
//! - the registry lock guards lookup/insert of store handles only and is
//!   never held across an `.await`
//! - each store sits behind its own async mutex, which serializes every
//!   transition of that one identity on this replica
//!
//! No code path holds two store locks at once.

use super::types::{Config, IdentityId, Signature, Vote};
use crate::ledger::Block;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Mutex as AsyncMutex;

/// Shared, individually lockable handle to one identity's store.
pub type StoreHandle = Arc<AsyncMutex<IdentityStore>>;

/// One replica's view of one identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityStore {
    /// Last committed config.
    pub latest: Config,
    /// Candidate replacement awaiting votes.
    pub proposed: Option<Config>,
    /// Votes on `proposed`, keyed by device name. `None` is a rejection.
    pub votes: BTreeMap<String, Option<Signature>>,
    /// Head of the root chain (carries the roster).
    pub root: Block,
    /// Head of the data chain (carries the latest config).
    pub data: Block,
}

impl IdentityStore {
    pub fn new(latest: Config, root: Block, data: Block) -> Self {
        Self {
            latest,
            proposed: None,
            votes: BTreeMap::new(),
            root,
            data,
        }
    }

    /// Replace the proposal and start a fresh voting round.
    pub fn set_proposed(&mut self, config: Config) {
        self.proposed = Some(config);
        self.votes.clear();
    }

    pub fn has_voted(&self, signer: &str) -> bool {
        self.votes.contains_key(signer)
    }

    /// Insert a vote. Returns the previously recorded signature slot if the
    /// signer had already voted, leaving the existing vote untouched.
    pub fn record_vote(&mut self, vote: Vote) -> Option<Option<Signature>> {
        if let Some(existing) = self.votes.get(&vote.signer) {
            return Some(existing.clone());
        }
        self.votes.insert(vote.signer, vote.signature);
        None
    }

    /// Commit condition: enough votes for the threshold, or every device
    /// of the latest config has voted. Rejections count like approvals.
    pub fn has_quorum(&self) -> bool {
        quorum_reached(self.votes.len(), &self.latest)
    }

    /// Install a committed data block carrying `config`.
    pub fn install_committed(&mut self, config: Config, block: Block) {
        self.latest = config;
        self.proposed = None;
        self.votes.clear();
        self.data = block;
    }
}

/// Quorum predicate shared by the coordinator and the tests.
pub fn quorum_reached(votes: usize, latest: &Config) -> bool {
    votes >= latest.threshold as usize || votes == latest.device_count()
}

/// Registry of identities hosted by one server.
#[derive(Debug, Clone, Default)]
pub struct IdentityRegistry {
    entries: Arc<Mutex<HashMap<IdentityId, StoreHandle>>>,
}

impl IdentityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<IdentityId, StoreHandle>> {
        // Critical sections never panic mid-update, so a poisoned map is intact.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Handle to an identity's store, if hosted here.
    pub fn get(&self, id: &IdentityId) -> Option<StoreHandle> {
        self.entries().get(id).cloned()
    }

    pub fn contains(&self, id: &IdentityId) -> bool {
        self.entries().contains_key(id)
    }

    /// Insert a store unless the id is already present. Returns whether the
    /// store was inserted; an existing store is never overwritten.
    pub fn insert_if_absent(&self, id: IdentityId, store: IdentityStore) -> bool {
        let mut entries = self.entries();
        if entries.contains_key(&id) {
            return false;
        }
        entries.insert(id, Arc::new(AsyncMutex::new(store)));
        true
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Ids of every hosted identity, sorted.
    pub fn ids(&self) -> Vec<IdentityId> {
        let mut ids: Vec<IdentityId> = self.entries().keys().copied().collect();
        ids.sort();
        ids
    }

    /// Clone of an identity's current state.
    pub async fn snapshot(&self, id: &IdentityId) -> Option<IdentityStore> {
        let handle = self.get(id)?;
        let store = handle.lock().await;
        Some(store.clone())
    }
}
