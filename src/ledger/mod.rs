//! Chain engine integration.
//!
//! - `LedgerClient` abstracts the external append-only chain engine
//! - `InMemoryLedger` is a hash-linked in-process implementation for tests

pub mod memory;
pub mod traits;

pub use memory::InMemoryLedger;
pub use traits::{Block, BlockHash, ChainParams, LedgerClient, LedgerError, LedgerResult};
