//! Integration test for the end-to-end threshold voting flow.
//!
//! Tests the complete lifecycle against a multi-server cluster:
//! 1. Add an identity with an initial device config
//! 2. Propose a replacement config from any roster member
//! 3. Collect device votes (approvals and rejections)
//! 4. Commit at quorum and install on every replica
//! 5. Start the next round on top of the new config

use idchain::crypto::{DeviceKey, Ed25519Verifier};
use idchain::identity::{Config, IdentityId, PublicKey, Roster, ServerId};
use idchain::ledger::{BlockHash, InMemoryLedger, LedgerClient};
use idchain::propagation::LocalTransport;
use idchain::settings::ServiceSettings;
use idchain::{IdentityError, IdentityServer, Request, Response, VoteOutcome};
use std::collections::BTreeMap;

type Server = IdentityServer<InMemoryLedger, LocalTransport>;

struct Cluster {
    ledger: InMemoryLedger,
    servers: Vec<Server>,
    roster: Roster,
}

impl Cluster {
    fn new(size: usize) -> Self {
        let ledger = InMemoryLedger::new();
        let transport = LocalTransport::new();
        let servers: Vec<Server> = (0..size)
            .map(|i| {
                let server = IdentityServer::from_settings(
                    &ServiceSettings::new(format!("server-{}", i)),
                    ledger.clone(),
                    transport.clone(),
                    Ed25519Verifier,
                );
                transport.register(server.applier().clone());
                server
            })
            .collect();
        let roster = Roster::new(servers.iter().map(|s| s.server().clone()));
        Self {
            ledger,
            servers,
            roster,
        }
    }

    async fn add(&self, config: Config) -> IdentityId {
        match self.servers[0]
            .handle(Request::AddIdentity {
                config,
                roster: self.roster.clone(),
            })
            .await
            .unwrap()
        {
            Response::AddIdentity(reply) => reply.id,
            other => panic!("unexpected response {:?}", other),
        }
    }
}

fn keys(names: &[&str]) -> BTreeMap<String, DeviceKey> {
    names
        .iter()
        .map(|n| (n.to_string(), DeviceKey::generate().unwrap()))
        .collect()
}

fn public(keys: &BTreeMap<String, DeviceKey>) -> BTreeMap<String, PublicKey> {
    keys.iter()
        .map(|(name, key)| (name.clone(), key.public_key()))
        .collect()
}

#[tokio::test]
async fn test_two_device_round_commits_new_config() {
    let cluster = Cluster::new(3);
    let devices = keys(&["laptop", "phone"]);
    let c0 = Config::new(public(&devices), 2).unwrap();
    let id = cluster.add(c0.clone()).await;

    let mut next = public(&devices);
    next.insert(
        "tablet".to_string(),
        DeviceKey::generate().unwrap().public_key(),
    );
    let c1 = Config::new(next, 2).unwrap();

    let coordinator = cluster.servers[1].coordinator();
    coordinator.propose_send(&id, c1.clone()).await.unwrap();

    let first = coordinator
        .propose_vote(
            &id,
            "laptop",
            Some(devices["laptop"].sign_config(&c1).unwrap()),
        )
        .await
        .unwrap();
    assert!(matches!(first, VoteOutcome::AwaitingVotes { recorded: 1, .. }));
    assert_eq!(coordinator.config_update(&id).await.unwrap(), c0);

    // The second vote may go through a different coordinator.
    let second = cluster.servers[2]
        .coordinator()
        .propose_vote(
            &id,
            "phone",
            Some(devices["phone"].sign_config(&c1).unwrap()),
        )
        .await
        .unwrap();
    let VoteOutcome::Committed(block) = second else {
        panic!("expected commit, got {:?}", second);
    };
    assert_eq!(Config::from_payload(&block.payload).unwrap(), c1);
    assert_eq!(block.index, 1);

    for server in &cluster.servers {
        let store = server.applier().snapshot(&id).await.unwrap();
        assert_eq!(store.latest, c1);
        assert!(store.proposed.is_none());
        assert!(store.votes.is_empty());
        assert_eq!(store.data, block);
    }

    // The identity id is the hash of the genesis data block.
    let chain = cluster.ledger.chain(&BlockHash::from_bytes(id.as_bytes()));
    assert_eq!(chain.len(), 2);
    assert_eq!(chain[1], block);
}

#[tokio::test]
async fn test_threshold_above_device_count_needs_every_device() {
    let cluster = Cluster::new(2);
    let devices = keys(&["a", "b", "c"]);
    let id = cluster.add(Config::new(public(&devices), 5).unwrap()).await;
    let c1 = Config::new(public(&devices), 2).unwrap();

    let coordinator = cluster.servers[0].coordinator();
    coordinator.propose_send(&id, c1.clone()).await.unwrap();

    for (i, name) in ["a", "b"].iter().enumerate() {
        let outcome = coordinator
            .propose_vote(&id, name, Some(devices[*name].sign_config(&c1).unwrap()))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            VoteOutcome::AwaitingVotes {
                recorded: i + 1,
                threshold: 5,
                devices: 3
            }
        );
    }
    let last = coordinator
        .propose_vote(&id, "c", Some(devices["c"].sign_config(&c1).unwrap()))
        .await
        .unwrap();
    assert!(matches!(last, VoteOutcome::Committed(_)));
    assert_eq!(cluster.ledger.append_count(), 1);
}

#[tokio::test]
async fn test_rejections_count_toward_quorum() {
    let cluster = Cluster::new(1);
    let devices = keys(&["a", "b"]);
    let id = cluster.add(Config::new(public(&devices), 2).unwrap()).await;
    let c1 = Config::new(public(&keys(&["x"])), 1).unwrap();

    let coordinator = cluster.servers[0].coordinator();
    coordinator.propose_send(&id, c1.clone()).await.unwrap();

    coordinator.propose_vote(&id, "a", None).await.unwrap();
    let outcome = coordinator.propose_vote(&id, "b", None).await.unwrap();

    // An all-reject round still commits the proposal.
    assert!(matches!(outcome, VoteOutcome::Committed(_)));
    assert_eq!(coordinator.config_update(&id).await.unwrap(), c1);
}

#[tokio::test]
async fn test_reproposing_restarts_the_round() {
    let cluster = Cluster::new(2);
    let devices = keys(&["a", "b", "c"]);
    let id = cluster.add(Config::new(public(&devices), 2).unwrap()).await;
    let coordinator = cluster.servers[0].coordinator();

    let first = Config::new(public(&devices), 3).unwrap();
    coordinator.propose_send(&id, first.clone()).await.unwrap();
    coordinator
        .propose_vote(&id, "a", Some(devices["a"].sign_config(&first).unwrap()))
        .await
        .unwrap();

    let second = Config::new(public(&devices), 1).unwrap();
    cluster.servers[1]
        .coordinator()
        .propose_send(&id, second.clone())
        .await
        .unwrap();

    // Votes on the replaced proposal are gone, so `a` may vote again, and
    // a signature over the old proposal no longer verifies.
    assert_eq!(
        coordinator
            .propose_vote(&id, "b", Some(devices["b"].sign_config(&first).unwrap()))
            .await,
        Err(IdentityError::BadSignature("b".to_string()))
    );
    let outcome = coordinator
        .propose_vote(&id, "a", Some(devices["a"].sign_config(&second).unwrap()))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        VoteOutcome::AwaitingVotes {
            recorded: 1,
            threshold: 2,
            devices: 3
        }
    );
}

#[tokio::test]
async fn test_consecutive_rounds_extend_the_chain() {
    let cluster = Cluster::new(2);
    let devices = keys(&["a"]);
    let id = cluster.add(Config::new(public(&devices), 1).unwrap()).await;
    let coordinator = cluster.servers[1].coordinator();

    let mut heads = Vec::new();
    for threshold in 2..5u32 {
        let next = Config::new(public(&devices), threshold).unwrap();
        coordinator.propose_send(&id, next.clone()).await.unwrap();
        let outcome = coordinator
            .propose_vote(&id, "a", Some(devices["a"].sign_config(&next).unwrap()))
            .await
            .unwrap();
        let VoteOutcome::Committed(block) = outcome else {
            panic!("single device always reaches quorum");
        };
        heads.push(block);
    }

    assert_eq!(cluster.ledger.append_count(), 3);
    for pair in heads.windows(2) {
        assert_eq!(pair[1].back_link, Some(pair[0].hash));
        assert_eq!(pair[1].index, pair[0].index + 1);
    }
    let latest = coordinator.config_update(&id).await.unwrap();
    assert_eq!(latest.threshold, 4);
}

#[tokio::test]
async fn test_add_identity_on_unavailable_ledger() {
    let cluster = Cluster::new(2);
    cluster.ledger.set_fail_genesis(true);

    let result = cluster.servers[0]
        .handle(Request::AddIdentity {
            config: Config::new(public(&keys(&["a"])), 1).unwrap(),
            roster: cluster.roster.clone(),
        })
        .await;

    assert!(matches!(result, Err(IdentityError::Ledger(_))));
    for server in &cluster.servers {
        assert!(server.applier().registry().is_empty());
    }
}

#[tokio::test]
async fn test_identity_unknown_to_non_member() {
    let cluster = Cluster::new(3);
    let members = Roster::new(vec![ServerId::new("server-0"), ServerId::new("server-1")]);
    let reply = cluster.servers[0]
        .coordinator()
        .add_identity(Config::new(public(&keys(&["a"])), 1).unwrap(), members)
        .await
        .unwrap();

    let outsider = cluster.servers[2].coordinator();
    assert_eq!(
        outsider.config_update(&reply.id).await,
        Err(IdentityError::NotFound(reply.id))
    );
    // The ledger itself still knows the chain.
    assert!(cluster.ledger.block(&reply.data.hash).is_some());
    let (root, _) = cluster
        .ledger
        .create_genesis_pair(
            &reply.root.roster,
            &Default::default(),
            &reply.data.payload,
        )
        .await
        .unwrap();
    assert_eq!(root, reply.root);
}
