//! Replica side of propagation: applying events to the local registry.

pub mod applier;

pub use applier::{ApplyOutcome, IgnoreReason, ReplicaApplier};
