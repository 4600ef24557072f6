//! idchain - Threshold-Voted Device Identities
//!
//! Each identity is a set of device public keys plus a threshold, recorded
//! on a pair of ledger chains hosted by a roster of servers. Changing the
//! device set takes a voting round: a candidate config is proposed, devices
//! sign its digest, and once enough votes are in the candidate is appended
//! to the data chain and installed on every roster member.
//!
//! Key principles:
//! - the ledger is the source of truth; replicas are rebuildable caches
//! - any roster member can coordinate any request
//! - replication is best-effort and reports how far it got
//! - one lock per identity, never two at once

pub mod coordinator;
pub mod crypto;
pub mod error;
pub mod identity;
pub mod ledger;
pub mod logging;
pub mod propagation;
pub mod replica;
pub mod serialization;
pub mod service;
pub mod settings;

pub use coordinator::{AddIdentityReply, IdentityCoordinator, VoteOutcome};
pub use error::{IdentityError, IdentityResult};
pub use service::{IdentityServer, Request, Response};
