//! Request surface of one identity server.
//!
//! An [`IdentityServer`] pairs the server's replica applier (which receives
//! propagated events) with its coordinator (which handles client requests).
//! Both share one registry, so the coordinator reads exactly what its own
//! replica has applied.
//!
//! Requests and responses are plain serde enums; the wire transport that
//! carries them is out of scope here.

use crate::coordinator::{AddIdentityReply, IdentityCoordinator, VoteOutcome};
use crate::crypto::{Ed25519Verifier, SignatureVerifier};
use crate::error::IdentityResult;
use crate::identity::{Config, IdentityId, Roster, ServerId, Signature};
use crate::ledger::{ChainParams, LedgerClient};
use crate::propagation::{PropagationChannel, Transport};
use crate::replica::ReplicaApplier;
use crate::settings::ServiceSettings;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Client request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    AddIdentity {
        config: Config,
        roster: Roster,
    },
    ConfigUpdate {
        id: IdentityId,
    },
    ProposeSend {
        id: IdentityId,
        config: Config,
    },
    ProposeFetch {
        id: IdentityId,
    },
    ProposeVote {
        id: IdentityId,
        signer: String,
        signature: Option<Signature>,
    },
    RetryCommit {
        id: IdentityId,
    },
}

impl Request {
    pub fn name(&self) -> &'static str {
        match self {
            Request::AddIdentity { .. } => "add_identity",
            Request::ConfigUpdate { .. } => "config_update",
            Request::ProposeSend { .. } => "propose_send",
            Request::ProposeFetch { .. } => "propose_fetch",
            Request::ProposeVote { .. } => "propose_vote",
            Request::RetryCommit { .. } => "retry_commit",
        }
    }
}

/// Reply to a [`Request`], one variant per request kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Response {
    AddIdentity(AddIdentityReply),
    ConfigUpdate { config: Config },
    ProposeSend,
    ProposeFetch { proposed: Option<Config> },
    ProposeVote(VoteOutcome),
    RetryCommit(VoteOutcome),
}

/// One identity server: replica applier plus coordinator.
pub struct IdentityServer<L: LedgerClient, T: Transport, V: SignatureVerifier = Ed25519Verifier> {
    applier: ReplicaApplier,
    coordinator: IdentityCoordinator<L, T, V>,
}

impl<L: LedgerClient, T: Transport, V: SignatureVerifier> IdentityServer<L, T, V> {
    pub fn new(
        server: ServerId,
        ledger: L,
        transport: T,
        verifier: V,
        chain_params: ChainParams,
        propagation_timeout: Duration,
    ) -> Self {
        let applier = ReplicaApplier::new(server.clone());
        let coordinator = IdentityCoordinator::new(
            server,
            applier.registry().clone(),
            ledger,
            PropagationChannel::new(transport, propagation_timeout),
            verifier,
            chain_params,
        );
        Self {
            applier,
            coordinator,
        }
    }

    /// Build a server from operator settings.
    pub fn from_settings(settings: &ServiceSettings, ledger: L, transport: T, verifier: V) -> Self {
        Self::new(
            settings.server_id(),
            ledger,
            transport,
            verifier,
            settings.ledger,
            settings.propagation.timeout(),
        )
    }

    pub fn server(&self) -> &ServerId {
        self.applier.server()
    }

    /// The replica half; register it with the transport so peers reach it.
    pub fn applier(&self) -> &ReplicaApplier {
        &self.applier
    }

    pub fn coordinator(&self) -> &IdentityCoordinator<L, T, V> {
        &self.coordinator
    }

    /// Dispatch a client request to the coordinator.
    pub async fn handle(&self, request: Request) -> IdentityResult<Response> {
        debug!(server = %self.server(), request = request.name(), "handling request");
        let c = &self.coordinator;
        let response = match request {
            Request::AddIdentity { config, roster } => {
                Response::AddIdentity(c.add_identity(config, roster).await?)
            }
            Request::ConfigUpdate { id } => Response::ConfigUpdate {
                config: c.config_update(&id).await?,
            },
            Request::ProposeSend { id, config } => {
                c.propose_send(&id, config).await?;
                Response::ProposeSend
            }
            Request::ProposeFetch { id } => Response::ProposeFetch {
                proposed: c.propose_fetch(&id).await?,
            },
            Request::ProposeVote {
                id,
                signer,
                signature,
            } => Response::ProposeVote(c.propose_vote(&id, &signer, signature).await?),
            Request::RetryCommit { id } => Response::RetryCommit(c.retry_commit(&id).await?),
        };
        Ok(response)
    }
}
