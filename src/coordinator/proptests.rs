//! Property-based tests for the voting round
//!
//! Tests for:
//! - Quorum: commit happens exactly at the first vote that reaches quorum
//! - Rejections: a rejection moves the round forward like an approval
//! - Convergence: replicas fed the same broadcasts end in the same state

use super::*;
use crate::crypto::DeviceKey;
use crate::identity::quorum_reached;
use crate::ledger::InMemoryLedger;
use crate::propagation::{LocalTransport, DEFAULT_PROPAGATION_TIMEOUT};
use crate::replica::ReplicaApplier;
use proptest::prelude::*;
use std::collections::BTreeMap;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

struct Round {
    ledger: InMemoryLedger,
    appliers: Vec<ReplicaApplier>,
    coordinator: IdentityCoordinator<InMemoryLedger, LocalTransport>,
    keys: BTreeMap<String, DeviceKey>,
    proposed: Config,
    id: IdentityId,
}

/// Identity with `devices` devices, hosted on `servers` servers, with an
/// open round on a fresh config.
async fn open_round(devices: usize, threshold: u32, servers: usize) -> Round {
    let ledger = InMemoryLedger::new();
    let transport = LocalTransport::new();
    let appliers: Vec<ReplicaApplier> = (0..servers)
        .map(|i| ReplicaApplier::new(ServerId::new(format!("server-{}", i))))
        .collect();
    for applier in &appliers {
        transport.register(applier.clone());
    }
    let roster = Roster::new(appliers.iter().map(|a| a.server().clone()));

    let coordinator = IdentityCoordinator::new(
        appliers[0].server().clone(),
        appliers[0].registry().clone(),
        ledger.clone(),
        PropagationChannel::new(transport, DEFAULT_PROPAGATION_TIMEOUT),
        Ed25519Verifier,
        ChainParams::default(),
    );

    let keys: BTreeMap<String, DeviceKey> = (0..devices)
        .map(|i| (format!("device-{}", i), DeviceKey::generate().unwrap()))
        .collect();
    let latest = Config::new(
        keys.iter()
            .map(|(name, key)| (name.clone(), key.public_key()))
            .collect(),
        threshold,
    )
    .unwrap();
    let id = coordinator.add_identity(latest, roster).await.unwrap().id;

    let proposed = Config::new(BTreeMap::new(), 1).unwrap();
    coordinator.propose_send(&id, proposed.clone()).await.unwrap();

    Round {
        ledger,
        appliers,
        coordinator,
        keys,
        proposed,
        id,
    }
}

/// Devices in voting order plus whether each one approves.
fn ballot() -> impl Strategy<Value = (usize, u32, Vec<bool>, u64)> {
    (1usize..6, 1u32..8).prop_flat_map(|(devices, threshold)| {
        (
            Just(devices),
            Just(threshold),
            prop::collection::vec(any::<bool>(), devices),
            any::<u64>(),
        )
    })
}

fn voting_order(devices: usize, seed: u64) -> Vec<String> {
    let mut order: Vec<usize> = (0..devices).collect();
    // Rotation is enough to vary who votes first and last.
    order.rotate_left((seed % devices as u64) as usize);
    order.into_iter().map(|i| format!("device-{}", i)).collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// Property: the round commits at the first vote that reaches quorum
    /// and never before, whatever mix of approvals and rejections is cast
    #[test]
    fn commit_happens_exactly_at_quorum((devices, threshold, approvals, seed) in ballot()) {
        let rt = runtime();
        rt.block_on(async {
            let round = open_round(devices, threshold, 2).await;
            let order = voting_order(devices, seed);
            let initial = round.appliers[0].snapshot(&round.id).await.unwrap().latest;

            for (cast, (signer, approve)) in order.iter().zip(approvals.iter()).enumerate() {
                let recorded = cast + 1;
                let signature = if *approve {
                    Some(round.keys[signer].sign_config(&round.proposed).unwrap())
                } else {
                    None
                };
                let outcome = round
                    .coordinator
                    .propose_vote(&round.id, signer, signature)
                    .await
                    .unwrap();

                let latest = round.appliers[1].snapshot(&round.id).await.unwrap().latest;
                if quorum_reached(recorded, &initial) {
                    prop_assert!(matches!(outcome, VoteOutcome::Committed(_)));
                    prop_assert_eq!(latest, round.proposed.clone());
                    prop_assert_eq!(round.ledger.append_count(), 1);
                    break;
                }

                prop_assert_eq!(
                    outcome,
                    VoteOutcome::AwaitingVotes {
                        recorded,
                        threshold,
                        devices,
                    }
                );
                prop_assert_eq!(round.ledger.append_count(), 0);
            }

            // Quorum is always reachable once every device has voted.
            prop_assert_eq!(round.ledger.append_count(), 1);
            Ok::<(), TestCaseError>(())
        })?;
    }

    /// Property: all replicas that received every broadcast agree on the
    /// committed config, the data head and an empty round
    #[test]
    fn replicas_converge_after_commit(
        devices in 1usize..5,
        servers in 1usize..5,
    ) {
        let rt = runtime();
        rt.block_on(async {
            let round = open_round(devices, devices as u32, servers).await;
            for signer in voting_order(devices, 0) {
                round.coordinator.propose_vote(&round.id, &signer, None).await.unwrap();
            }

            let reference = round.appliers[0].snapshot(&round.id).await.unwrap();
            prop_assert_eq!(&reference.latest, &round.proposed);
            prop_assert!(reference.proposed.is_none());
            prop_assert!(reference.votes.is_empty());
            for applier in &round.appliers[1..] {
                let store = applier.snapshot(&round.id).await.unwrap();
                prop_assert_eq!(&store, &reference);
            }
            Ok::<(), TestCaseError>(())
        })?;
    }
}
