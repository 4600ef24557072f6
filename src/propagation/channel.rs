//! Broadcast-and-apply over a roster.
//!
//! There is no agreement protocol: an event is delivered to every member
//! concurrently, each member applies it on receipt, and the sender waits at
//! most `timeout` per member. The result is a report, not a verdict; the
//! caller decides how many acknowledgements it needs.

use super::event::Event;
use crate::identity::{IdentityId, Roster, ServerId};
use crate::replica::ApplyOutcome;
use async_trait::async_trait;
use futures::future::join_all;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Default wait for a member's acknowledgement.
pub const DEFAULT_PROPAGATION_TIMEOUT: Duration = Duration::from_millis(1000);

/// Errors delivering an event to one member.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("server {0} is unreachable")]
    Unreachable(ServerId),

    #[error("server {0} did not acknowledge in time")]
    Timeout(ServerId),

    #[error("event could not be encoded for {server}: {reason}")]
    Encoding { server: ServerId, reason: String },
}

/// Trait abstraction for delivering an event to one server, which applies it
/// and reports the outcome.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn deliver(&self, target: &ServerId, event: &Event) -> Result<ApplyOutcome, DeliveryError>;
}

/// Fewer acknowledgements than roster members. Diagnostic only.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} for identity {identity} acknowledged by {acknowledged} of {expected} servers")]
pub struct PropagationShortfall {
    pub identity: IdentityId,
    pub kind: &'static str,
    pub acknowledged: usize,
    pub expected: usize,
}

/// Outcome of one broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropagationReport {
    identity: IdentityId,
    kind: &'static str,
    expected: usize,
    acks: Vec<(ServerId, ApplyOutcome)>,
    failures: Vec<(ServerId, DeliveryError)>,
}

impl PropagationReport {
    /// Number of members that acknowledged, whatever they did with the event.
    pub fn acknowledged(&self) -> usize {
        self.acks.len()
    }

    pub fn expected(&self) -> usize {
        self.expected
    }

    pub fn is_complete(&self) -> bool {
        self.acks.len() == self.expected
    }

    /// Per-member outcome of every acknowledgement.
    pub fn acks(&self) -> &[(ServerId, ApplyOutcome)] {
        &self.acks
    }

    /// Outcome reported by `server`, if it acknowledged.
    pub fn outcome_of(&self, server: &ServerId) -> Option<ApplyOutcome> {
        self.acks
            .iter()
            .find(|(member, _)| member == server)
            .map(|(_, outcome)| *outcome)
    }

    pub fn failures(&self) -> &[(ServerId, DeliveryError)] {
        &self.failures
    }

    /// Members that acknowledged with the given outcome.
    pub fn count(&self, outcome: &ApplyOutcome) -> usize {
        self.acks.iter().filter(|(_, o)| o == outcome).count()
    }

    pub fn shortfall(&self) -> Option<PropagationShortfall> {
        if self.is_complete() {
            return None;
        }
        Some(PropagationShortfall {
            identity: self.identity,
            kind: self.kind,
            acknowledged: self.acks.len(),
            expected: self.expected,
        })
    }
}

/// Broadcasts events to a roster over a [`Transport`].
#[derive(Clone)]
pub struct PropagationChannel<T: Transport> {
    transport: T,
    timeout: Duration,
}

impl<T: Transport> PropagationChannel<T> {
    pub fn new(transport: T, timeout: Duration) -> Self {
        Self { transport, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Deliver `event` to every roster member and collect acknowledgements.
    ///
    /// Never fails: unreachable or slow members show up in the report.
    pub async fn propagate(&self, roster: &Roster, event: &Event) -> PropagationReport {
        let deliveries = roster.members().iter().map(|member| async move {
            let result =
                match tokio::time::timeout(self.timeout, self.transport.deliver(member, event))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(DeliveryError::Timeout(member.clone())),
                };
            (member.clone(), result)
        });

        let mut acks = Vec::new();
        let mut failures = Vec::new();
        for (member, result) in join_all(deliveries).await {
            match result {
                Ok(outcome) => acks.push((member, outcome)),
                Err(e) => {
                    debug!(server = %member, kind = event.kind(), error = %e, "delivery failed");
                    failures.push((member, e));
                }
            }
        }

        PropagationReport {
            identity: event.identity(),
            kind: event.kind(),
            expected: roster.len(),
            acks,
            failures,
        }
    }
}
