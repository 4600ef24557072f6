//! Identity data model: device configs, votes, rosters and the per-replica
//! store of every hosted identity.

pub mod store;
pub mod types;

pub use store::{quorum_reached, IdentityRegistry, IdentityStore, StoreHandle};
pub use types::{
    Config, ConfigDigest, IdentityId, PublicKey, Roster, ServerId, Signature, Vote,
};
