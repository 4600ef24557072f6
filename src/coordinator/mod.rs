//! Identity coordinator: the request-facing half of an identity server.
//!
//! Any roster member can coordinate any request. The coordinator validates
//! against its own replica, then drives every replica (itself included)
//! through the [`PropagationChannel`]. It never mutates its own store
//! directly; its replica changes only by applying the events it broadcasts.
//!
//! ## Voting round
//!
//! 1. `propose_send` broadcasts `SetProposed`, opening a round
//! 2. each `propose_vote` is checked locally, then broadcast as `RecordVote`
//!    tagged with the digest of the proposal it was verified against
//! 3. once the votes reach quorum the coordinator appends the proposal to
//!    the data chain and broadcasts `InstallCommitted`
//!
//! Proposals and votes for one identity are serialized on this server by a
//! round lock held from validation through broadcast. Commits are serialized
//! by a separate commit lock, so a round is appended at most once per
//! server. Across servers, replicas drop votes tagged with a replaced
//! proposal, a signer's first vote wins, and the ledger refuses a second
//! append after the same chain head.

#[cfg(test)]
mod proptests;

use crate::crypto::{Ed25519Verifier, SignatureVerifier};
use crate::error::{IdentityError, IdentityResult};
use crate::identity::{
    Config, ConfigDigest, IdentityId, IdentityRegistry, Roster, ServerId, Signature, StoreHandle,
    Vote,
};
use crate::ledger::{Block, ChainParams, LedgerClient};
use crate::propagation::{Event, PropagationChannel, PropagationReport, Transport};
use crate::replica::{ApplyOutcome, IgnoreReason};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

/// Reply to a successful `add_identity`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddIdentityReply {
    pub id: IdentityId,
    /// Genesis block of the root chain.
    pub root: Block,
    /// Genesis block of the data chain.
    pub data: Block,
}

/// Result of a vote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VoteOutcome {
    /// The vote was recorded; quorum is not reached yet.
    AwaitingVotes {
        recorded: usize,
        threshold: u32,
        devices: usize,
    },
    /// The round is committed; this is the new data chain head.
    Committed(Block),
}

/// Orchestrates identity requests on one server.
pub struct IdentityCoordinator<L: LedgerClient, T: Transport, V: SignatureVerifier = Ed25519Verifier>
{
    server: ServerId,
    registry: IdentityRegistry,
    ledger: L,
    channel: PropagationChannel<T>,
    verifier: V,
    chain_params: ChainParams,
    round_locks: IdentityLocks,
    commit_locks: IdentityLocks,
}

type IdentityLocks = Mutex<HashMap<IdentityId, Arc<AsyncMutex<()>>>>;

fn lock_for(locks: &IdentityLocks, id: &IdentityId) -> Arc<AsyncMutex<()>> {
    let mut locks = locks.lock().unwrap_or_else(|e| e.into_inner());
    locks.entry(*id).or_default().clone()
}

impl<L: LedgerClient, T: Transport, V: SignatureVerifier> IdentityCoordinator<L, T, V> {
    /// Create a coordinator over `registry`, which must be the registry the
    /// server's own replica applier writes to.
    pub fn new(
        server: ServerId,
        registry: IdentityRegistry,
        ledger: L,
        channel: PropagationChannel<T>,
        verifier: V,
        chain_params: ChainParams,
    ) -> Self {
        Self {
            server,
            registry,
            ledger,
            channel,
            verifier,
            chain_params,
            round_locks: Mutex::new(HashMap::new()),
            commit_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn server(&self) -> &ServerId {
        &self.server
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    fn store(&self, id: &IdentityId) -> IdentityResult<StoreHandle> {
        self.registry.get(id).ok_or(IdentityError::NotFound(*id))
    }

    async fn roster_of(&self, handle: &StoreHandle) -> Roster {
        handle.lock().await.root.roster.clone()
    }

    async fn broadcast(&self, roster: &Roster, event: &Event) -> PropagationReport {
        let report = self.channel.propagate(roster, event).await;
        if let Some(shortfall) = report.shortfall() {
            warn!(server = %self.server, %shortfall, "propagation shortfall");
        }
        report
    }

    /// Create the identity's chains and install it on every roster member.
    pub async fn add_identity(
        &self,
        config: Config,
        roster: Roster,
    ) -> IdentityResult<AddIdentityReply> {
        config.validate()?;
        let payload = config.to_payload()?;

        debug!(server = %self.server, roster = roster.len(), "creating genesis chain pair");
        let (root, data) = self
            .ledger
            .create_genesis_pair(&roster, &self.chain_params, &payload)
            .await?;
        let id = IdentityId::from_genesis(&data);

        if self.registry.contains(&id) {
            return Err(IdentityError::DuplicateIdentity(id));
        }

        let event = Event::InstallIdentity {
            id,
            latest: config,
            root: root.clone(),
            data: data.clone(),
        };
        let report = self.broadcast(&root.roster, &event).await;
        if report.count(&ApplyOutcome::Ignored(IgnoreReason::AlreadyInstalled)) > 0 {
            return Err(IdentityError::DuplicateIdentity(id));
        }

        info!(
            server = %self.server,
            identity = %id,
            installed = report.acknowledged(),
            roster = report.expected(),
            "identity added"
        );
        Ok(AddIdentityReply { id, root, data })
    }

    /// Latest committed config.
    pub async fn config_update(&self, id: &IdentityId) -> IdentityResult<Config> {
        let handle = self.store(id)?;
        let store = handle.lock().await;
        Ok(store.latest.clone())
    }

    /// Open a voting round on `candidate`. Signatures are checked at vote time.
    pub async fn propose_send(&self, id: &IdentityId, candidate: Config) -> IdentityResult<()> {
        candidate.validate()?;
        let handle = self.store(id)?;
        let roster = self.roster_of(&handle).await;

        let round_lock = lock_for(&self.round_locks, id);
        let _round = round_lock.lock().await;
        let report = self
            .broadcast(
                &roster,
                &Event::SetProposed {
                    id: *id,
                    config: candidate,
                },
            )
            .await;
        info!(server = %self.server, identity = %id, acknowledged = report.acknowledged(), "proposal sent");
        Ok(())
    }

    /// Pending proposal, if any.
    pub async fn propose_fetch(&self, id: &IdentityId) -> IdentityResult<Option<Config>> {
        let handle = self.store(id)?;
        let store = handle.lock().await;
        Ok(store.proposed.clone())
    }

    /// Record `signer`'s vote on the pending proposal and commit it once the
    /// votes reach quorum. A `None` signature is a rejection; it is recorded
    /// without verification and counts toward quorum like an approval.
    ///
    /// The vote is bound to the proposal it was checked against. If that
    /// proposal is replaced before this server's replica records the vote,
    /// the call fails with `ProposalChanged`. If another coordinator got a
    /// different vote from the same signer to this replica first, it fails
    /// with `DuplicateVote`.
    pub async fn propose_vote(
        &self,
        id: &IdentityId,
        signer: &str,
        signature: Option<Signature>,
    ) -> IdentityResult<VoteOutcome> {
        let handle = self.store(id)?;
        let round_lock = lock_for(&self.round_locks, id);
        let round = round_lock.lock().await;

        let (roster, proposal, vote) = {
            let store = handle.lock().await;
            let public_key = store
                .latest
                .device(signer)
                .ok_or_else(|| IdentityError::SignerUnknown(signer.to_string()))?;
            let proposed = store
                .proposed
                .as_ref()
                .ok_or(IdentityError::NoProposal(*id))?;
            if store.has_voted(signer) {
                return Err(IdentityError::DuplicateVote(signer.to_string()));
            }
            let digest = proposed.digest()?;
            if let Some(signature) = &signature {
                self.verifier
                    .verify(&digest, public_key, signature)
                    .map_err(|e| {
                        debug!(identity = %id, signer, error = %e, "vote signature rejected");
                        IdentityError::BadSignature(signer.to_string())
                    })?;
            }
            (
                store.root.roster.clone(),
                digest,
                Vote {
                    signer: signer.to_string(),
                    signature,
                },
            )
        };

        debug!(server = %self.server, identity = %id, signer, rejection = vote.is_rejection(), "recording vote");
        let report = self
            .broadcast(
                &roster,
                &Event::RecordVote {
                    id: *id,
                    proposal,
                    vote,
                },
            )
            .await;
        drop(round);

        match report.outcome_of(&self.server) {
            Some(ApplyOutcome::Unchanged | ApplyOutcome::Ignored(IgnoreReason::ConflictingVote)) => {
                warn!(server = %self.server, identity = %id, signer, "signer already voted through another server");
                return Err(IdentityError::DuplicateVote(signer.to_string()));
            }
            Some(ApplyOutcome::Ignored(IgnoreReason::StaleRound)) => {
                warn!(server = %self.server, identity = %id, signer, "proposal replaced while voting");
                return Err(IdentityError::ProposalChanged(*id));
            }
            _ => {}
        }

        self.commit_if_quorum(id, &handle, proposal).await
    }

    /// Retry the commit step of the current round, e.g. after the ledger
    /// failed the append. Votes are not touched.
    pub async fn retry_commit(&self, id: &IdentityId) -> IdentityResult<VoteOutcome> {
        let handle = self.store(id)?;
        let proposal = match handle.lock().await.proposed.as_ref() {
            Some(proposed) => proposed.digest()?,
            None => return Err(IdentityError::NoProposal(*id)),
        };
        self.commit_if_quorum(id, &handle, proposal).await
    }

    /// Append the open proposal if it is still `proposal` and has quorum.
    async fn commit_if_quorum(
        &self,
        id: &IdentityId,
        handle: &StoreHandle,
        proposal: ConfigDigest,
    ) -> IdentityResult<VoteOutcome> {
        let commit_lock = lock_for(&self.commit_locks, id);
        let _commit = commit_lock.lock().await;

        let (root, current, proposed) = {
            let store = handle.lock().await;
            let Some(proposed) = store.proposed.clone() else {
                // Another commit finished a round while we waited; it is ours
                // only if it installed the proposal we voted on.
                if store.latest.digest()? == proposal {
                    return Ok(VoteOutcome::Committed(store.data.clone()));
                }
                return Err(IdentityError::ProposalChanged(*id));
            };
            if proposed.digest()? != proposal {
                debug!(server = %self.server, identity = %id, %proposal, "open proposal differs from the voted one");
                return Err(IdentityError::ProposalChanged(*id));
            }
            if !store.has_quorum() {
                return Ok(VoteOutcome::AwaitingVotes {
                    recorded: store.votes.len(),
                    threshold: store.latest.threshold,
                    devices: store.latest.device_count(),
                });
            }
            (store.root.clone(), store.data.clone(), proposed)
        };

        info!(server = %self.server, identity = %id, head = current.index, "quorum reached, appending block");
        let block = self
            .ledger
            .append_block(&root, &current, &proposed.to_payload()?)
            .await
            .map_err(|e| {
                warn!(server = %self.server, identity = %id, error = %e, "append failed, votes kept");
                IdentityError::from(e)
            })?;

        let report = self
            .broadcast(
                &root.roster,
                &Event::InstallCommitted {
                    id: *id,
                    block: block.clone(),
                },
            )
            .await;
        info!(
            server = %self.server,
            identity = %id,
            block = %block.hash,
            index = block.index,
            acknowledged = report.acknowledged(),
            "proposal committed"
        );
        Ok(VoteOutcome::Committed(block))
    }
}
