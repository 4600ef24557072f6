//! Local application of propagated identity events.
//!
//! Every server runs one applier over its own registry. Application is
//! idempotent: re-delivering an event never changes state a second time,
//! and anomalies (duplicate installs, unknown ids, conflicting votes) are
//! logged and reported, never fatal.

use crate::identity::{
    Config, ConfigDigest, IdentityId, IdentityRegistry, IdentityStore, ServerId, Vote,
};
use crate::ledger::Block;
use crate::propagation::Event;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

/// Why an applier declined an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IgnoreReason {
    /// The identity is already installed; it is never overwritten.
    AlreadyInstalled,
    /// No identity with this id is hosted here.
    UnknownIdentity,
    /// There is no open proposal to vote on.
    NoProposal,
    /// The signer already voted differently in this round.
    ConflictingVote,
    /// The vote was cast on a candidate that is no longer the open one.
    StaleRound,
    /// The block is older than the data block already installed.
    StaleBlock,
    /// The block payload is not a config.
    UndecodablePayload,
}

/// Result of applying one event on one replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ApplyOutcome {
    /// State changed.
    Applied,
    /// The event was already reflected in state.
    Unchanged,
    /// The event was declined.
    Ignored(IgnoreReason),
}

/// Applies events to one server's registry.
#[derive(Debug, Clone)]
pub struct ReplicaApplier {
    server: ServerId,
    registry: IdentityRegistry,
}

impl ReplicaApplier {
    /// Create an applier over a fresh registry.
    pub fn new(server: ServerId) -> Self {
        Self::with_registry(server, IdentityRegistry::new())
    }

    /// Create an applier over an existing registry (shared with the
    /// server's coordinator).
    pub fn with_registry(server: ServerId, registry: IdentityRegistry) -> Self {
        Self { server, registry }
    }

    pub fn server(&self) -> &ServerId {
        &self.server
    }

    pub fn registry(&self) -> &IdentityRegistry {
        &self.registry
    }

    /// Clone of an identity's state on this replica.
    pub async fn snapshot(&self, id: &IdentityId) -> Option<IdentityStore> {
        self.registry.snapshot(id).await
    }

    /// Apply one event.
    pub async fn apply(&self, event: Event) -> ApplyOutcome {
        let kind = event.kind();
        let outcome = match event {
            Event::InstallIdentity {
                id,
                latest,
                root,
                data,
            } => self.install_identity(id, latest, root, data),
            Event::SetProposed { id, config } => self.set_proposed(id, config).await,
            Event::RecordVote { id, proposal, vote } => {
                self.record_vote(id, proposal, vote).await
            }
            Event::InstallCommitted { id, block } => self.install_committed(id, block).await,
        };
        debug!(server = %self.server, kind, ?outcome, "applied event");
        outcome
    }

    /// Apply events in order, e.g. to rebuild the registry after a restart.
    pub async fn replay(&self, events: impl IntoIterator<Item = Event>) -> Vec<ApplyOutcome> {
        let mut outcomes = Vec::new();
        for event in events {
            outcomes.push(self.apply(event).await);
        }
        outcomes
    }

    fn install_identity(
        &self,
        id: IdentityId,
        latest: Config,
        root: Block,
        data: Block,
    ) -> ApplyOutcome {
        if !self
            .registry
            .insert_if_absent(id, IdentityStore::new(latest, root, data))
        {
            error!(server = %self.server, identity = %id, "identity already installed, keeping existing store");
            return ApplyOutcome::Ignored(IgnoreReason::AlreadyInstalled);
        }
        info!(server = %self.server, identity = %id, "identity installed");
        ApplyOutcome::Applied
    }

    async fn set_proposed(&self, id: IdentityId, config: Config) -> ApplyOutcome {
        let Some(handle) = self.registry.get(&id) else {
            error!(server = %self.server, identity = %id, "proposal for unknown identity");
            return ApplyOutcome::Ignored(IgnoreReason::UnknownIdentity);
        };
        let mut store = handle.lock().await;
        if store.proposed.as_ref() == Some(&config) && store.votes.is_empty() {
            return ApplyOutcome::Unchanged;
        }
        store.set_proposed(config);
        ApplyOutcome::Applied
    }

    async fn record_vote(&self, id: IdentityId, proposal: ConfigDigest, vote: Vote) -> ApplyOutcome {
        let Some(handle) = self.registry.get(&id) else {
            error!(server = %self.server, identity = %id, "vote for unknown identity");
            return ApplyOutcome::Ignored(IgnoreReason::UnknownIdentity);
        };
        let mut store = handle.lock().await;
        let Some(open) = store.proposed.as_ref() else {
            warn!(server = %self.server, identity = %id, signer = %vote.signer, "vote without open proposal");
            return ApplyOutcome::Ignored(IgnoreReason::NoProposal);
        };
        if open.digest().ok() != Some(proposal) {
            warn!(
                server = %self.server,
                identity = %id,
                signer = %vote.signer,
                %proposal,
                "vote for a replaced proposal ignored"
            );
            return ApplyOutcome::Ignored(IgnoreReason::StaleRound);
        }
        let signer = vote.signer.clone();
        let signature = vote.signature.clone();
        match store.record_vote(vote) {
            None => ApplyOutcome::Applied,
            Some(existing) if existing == signature => ApplyOutcome::Unchanged,
            Some(_) => {
                warn!(server = %self.server, identity = %id, %signer, "conflicting vote ignored");
                ApplyOutcome::Ignored(IgnoreReason::ConflictingVote)
            }
        }
    }

    async fn install_committed(&self, id: IdentityId, block: Block) -> ApplyOutcome {
        let Some(handle) = self.registry.get(&id) else {
            error!(server = %self.server, identity = %id, "committed block for unknown identity");
            return ApplyOutcome::Ignored(IgnoreReason::UnknownIdentity);
        };
        let config = match Config::from_payload(&block.payload) {
            Ok(config) => config,
            Err(e) => {
                error!(server = %self.server, identity = %id, block = %block.hash, error = %e, "undecodable block payload");
                return ApplyOutcome::Ignored(IgnoreReason::UndecodablePayload);
            }
        };

        let mut store = handle.lock().await;
        if store.data.hash == block.hash {
            return ApplyOutcome::Unchanged;
        }
        if block.index <= store.data.index {
            warn!(
                server = %self.server,
                identity = %id,
                block = %block.hash,
                index = block.index,
                installed = store.data.index,
                "stale committed block ignored"
            );
            return ApplyOutcome::Ignored(IgnoreReason::StaleBlock);
        }
        store.install_committed(config, block);
        info!(server = %self.server, identity = %id, index = store.data.index, "committed config installed");
        ApplyOutcome::Applied
    }
}
