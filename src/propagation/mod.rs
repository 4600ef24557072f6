//! Best-effort propagation of identity events to every roster member.
//!
//! - `Event`: the tagged union of replicated state transitions
//! - `PropagationChannel`: broadcast-and-apply with a bounded wait
//! - `Transport`: mock-friendly seam for delivering one event to one server
//! - `LocalTransport`: in-process transport for tests and local clusters

pub mod channel;
pub mod event;
pub mod local;

pub use channel::{
    DeliveryError, PropagationChannel, PropagationReport, PropagationShortfall, Transport,
    DEFAULT_PROPAGATION_TIMEOUT,
};
pub use event::Event;
pub use local::LocalTransport;
