//! In-process transport connecting replicas that live in one process.
//!
//! Events still go through their CBOR wire encoding so that every replica
//! receives its own decoded copy, as it would over a network. Reachability
//! and latency can be scripted per server for tests.

use super::channel::{DeliveryError, Transport};
use super::event::Event;
use crate::identity::ServerId;
use crate::replica::{ApplyOutcome, ReplicaApplier};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

#[derive(Clone)]
struct Peer {
    applier: ReplicaApplier,
    reachable: bool,
    delay: Option<Duration>,
}

/// Shared in-process transport. Clones address the same set of servers.
#[derive(Clone, Default)]
pub struct LocalTransport {
    peers: Arc<RwLock<HashMap<ServerId, Peer>>>,
}

impl LocalTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a server's applier so events addressed to it are applied.
    pub fn register(&self, applier: ReplicaApplier) {
        let mut peers = self.peers.write().unwrap_or_else(|e| e.into_inner());
        peers.insert(
            applier.server().clone(),
            Peer {
                applier,
                reachable: true,
                delay: None,
            },
        );
    }

    /// Take a server off (or back onto) the network.
    pub fn set_reachable(&self, server: &ServerId, reachable: bool) {
        let mut peers = self.peers.write().unwrap_or_else(|e| e.into_inner());
        if let Some(peer) = peers.get_mut(server) {
            peer.reachable = reachable;
        }
    }

    /// Delay every delivery to `server` by `delay`.
    pub fn set_delay(&self, server: &ServerId, delay: Option<Duration>) {
        let mut peers = self.peers.write().unwrap_or_else(|e| e.into_inner());
        if let Some(peer) = peers.get_mut(server) {
            peer.delay = delay;
        }
    }

    pub fn servers(&self) -> Vec<ServerId> {
        let peers = self.peers.read().unwrap_or_else(|e| e.into_inner());
        let mut servers: Vec<ServerId> = peers.keys().cloned().collect();
        servers.sort();
        servers
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn deliver(&self, target: &ServerId, event: &Event) -> Result<ApplyOutcome, DeliveryError> {
        let peer = {
            let peers = self.peers.read().unwrap_or_else(|e| e.into_inner());
            match peers.get(target) {
                Some(peer) if peer.reachable => peer.clone(),
                _ => return Err(DeliveryError::Unreachable(target.clone())),
            }
        };

        let encoding_error = |e: crate::serialization::SerializationError| DeliveryError::Encoding {
            server: target.clone(),
            reason: e.to_string(),
        };
        let wire = event.to_bytes().map_err(encoding_error)?;

        if let Some(delay) = peer.delay {
            tokio::time::sleep(delay).await;
        }

        let received = Event::from_bytes(&wire).map_err(encoding_error)?;
        Ok(peer.applier.apply(received).await)
    }
}
