//! Error taxonomy for identity operations.
//!
//! Every coordinator call returns exactly one success payload or one of these
//! errors. Validation errors are produced before any replica is touched.
//! Missing propagation acknowledgements are never an error here; see
//! [`crate::propagation::PropagationShortfall`].

use crate::identity::IdentityId;
use crate::ledger::LedgerError;
use crate::serialization::SerializationError;
use thiserror::Error;

/// Result type for identity operations.
pub type IdentityResult<T> = Result<T, IdentityError>;

/// Identity operation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    #[error("identity {0} not found")]
    NotFound(IdentityId),

    #[error("signer '{0}' is not a device of the latest config")]
    SignerUnknown(String),

    #[error("signer '{0}' already voted on the current proposal")]
    DuplicateVote(String),

    #[error("identity {0} has no proposed config")]
    NoProposal(IdentityId),

    #[error("proposal for identity {0} was replaced before the vote was recorded")]
    ProposalChanged(IdentityId),

    #[error("signature from '{0}' does not verify against the proposed config")]
    BadSignature(String),

    #[error("ledger operation failed: {0}")]
    Ledger(#[from] LedgerError),

    #[error("identity {0} is already installed")]
    DuplicateIdentity(IdentityId),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("encoding failed: {0}")]
    Encoding(#[from] SerializationError),
}
