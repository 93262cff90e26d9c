//! A network of participants, a notary, and a directory sharing one process.

use crate::config::NodeConfig;
use bytes::Bytes;
use futures::future::join_all;
use prometheus_client::{encoding::text::encode, registry::Registry};
use ratify_bridge::{
    reliable,
    simulated::{
        self,
        network::{self, Link, Network},
    },
};
use ratify_cryptography::{
    ed25519::{PrivateKey, PublicKey},
    Signer as _,
};
use ratify_finality::{
    coordinator::{self, Coordinator, Finalized, RunHandle},
    identity::{Party, Registry as Identities},
    ledger::{self, Ledger as _},
    mocks,
    notary::{self, Notary as _},
    parameters::{self, NetworkParameters, Resolver, SignedNetworkParameters},
    recorder::{self, Recorder},
    types::{Command, Limits, State, StateRef},
    Transaction,
};
use ratify_runtime::tokio as disk;
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};
use thiserror::Error;
use tracing::{info, warn};

/// Errors that stop a simulation.
#[derive(Debug, Error)]
pub enum Error {
    #[error("network error: {0}")]
    Network(#[from] simulated::Error),
    #[error("finality error: {0}")]
    Finality(#[from] ratify_finality::Error),
}

const ANCHOR_SEED: u64 = 1_000;
const NOTARY_SEED: u64 = 1_001;
const PARTICIPANT_SEED: u64 = 1;

type Node = Coordinator<
    disk::Storage,
    ledger::Store<disk::Storage>,
    Identities,
    mocks::Notary,
    (),
>;

/// What a participant runs.
struct Participant {
    key: PrivateKey,
    storage: disk::Storage,
    ledger: ledger::Store<disk::Storage>,
    bridge: reliable::Mailbox,
    parameters: NetworkParameters,
    registry: Arc<Mutex<Registry>>,
}

/// Run the simulation described by `config` to completion.
pub async fn run(config: NodeConfig) -> Result<(), Error> {
    let network_registry = Arc::new(Mutex::new(Registry::default()));
    let (network, oracle) = Network::new(network::Config {
        registry: network_registry.clone(),
        max_message_size: 1024 * 1024,
        seed: config.seed,
    });
    network.start();

    // Publish the parameters every participant resolves at startup
    let anchor = PrivateKey::from_seed(ANCHOR_SEED);
    let notary = mocks::Notary::new(PrivateKey::from_seed(NOTARY_SEED));
    notary.fail_next(config.notary_failures);
    let directory = mocks::Directory::default();
    directory.publish(SignedNetworkParameters::sign(
        &NetworkParameters {
            epoch: 1,
            min_platform_version: 1,
            notaries: vec![notary.public_key()],
            max_message_size: 1024 * 1024,
            max_transaction_size: 512 * 1024,
            modified_time: 0,
        },
        &anchor,
    ));

    let keys: Vec<PrivateKey> = (0..config.participants.max(2))
        .map(|i| PrivateKey::from_seed(PARTICIPANT_SEED + i))
        .collect();
    let identities = Identities::default();
    for (i, key) in keys.iter().enumerate() {
        identities.register(Party {
            key: key.public_key(),
            name: format!("participant-{i}"),
        });
    }
    let link = Link {
        latency_mean: config.link.latency_mean,
        latency_stddev: config.link.latency_stddev,
        success_rate: config.link.success_rate,
    };
    for a in &keys {
        for b in &keys {
            if a.public_key() != b.public_key() {
                oracle.link(a.public_key(), b.public_key(), link.clone())?;
            }
        }
    }

    // Start every participant's storage, bridge, and recorder
    let mut participants = Vec::with_capacity(keys.len());
    for (i, key) in keys.into_iter().enumerate() {
        let registry = Arc::new(Mutex::new(Registry::default()));
        let storage = disk::Storage::new(disk::Config::new(
            config.storage_directory.join(format!("participant-{i}")),
        ));
        let resolver = Resolver::new(
            storage.clone(),
            directory.clone(),
            parameters::Config {
                partition: "parameters".into(),
                trust_anchor: anchor.public_key(),
            },
        );
        let parameters = resolver.resolve().await?;
        let ledger = ledger::Store::new(
            storage.clone(),
            ledger::Config {
                partition: "ledger".into(),
                limits: Limits::default(),
                max_transaction_size: parameters.max_transaction_size as usize,
                registry: registry.clone(),
            },
        );

        let (sender, receiver) = oracle.register(key.public_key());
        let (engine, bridge, inbox) = reliable::Engine::new(reliable::Config {
            public_key: key.public_key(),
            registry: registry.clone(),
            mailbox_size: 1024,
            inbox_size: 1024,
            window_size: config.window_size,
            max_attempts: config.max_attempts,
            ack_timeout: Duration::from_millis(500),
            retry_delay: Duration::from_millis(100),
            dedup_capacity: 16 * 1024,
            history_size: 256,
            max_payload_size: parameters.max_message_size as usize,
        });
        engine.start(sender, receiver);
        Recorder::new(recorder::Config {
            ledger: ledger.clone(),
            notaries: parameters.notaries.clone(),
            limits: Limits::default(),
            registry: registry.clone(),
        })
        .start(inbox);

        participants.push(Participant {
            key,
            storage,
            ledger,
            bridge,
            parameters,
            registry,
        });
    }

    // The first participant finalizes
    let local = &participants[0];
    let node = coordinator(local, &identities, &notary, &config).await?;
    let resumed = node.resume_all().await?;
    if !resumed.is_empty() {
        info!(runs = resumed.len(), "resuming interrupted runs");
        report(resumed).await;
    }

    let others: Vec<PublicKey> = participants[1..]
        .iter()
        .map(|participant| participant.key.public_key())
        .collect();
    let issued: Vec<Transaction> = (0..config.transactions)
        .map(|i| issue(&local.key, &notary.public_key(), &others, i))
        .collect();
    let handles = issued
        .iter()
        .map(|tx| node.start(tx.clone(), vec![]))
        .collect();
    report(handles).await;

    let handles = issued
        .iter()
        .enumerate()
        .map(|(i, tx)| {
            let owner = others[i % others.len()].clone();
            node.start(spend(&local.key, &notary.public_key(), tx, owner), vec![])
        })
        .collect();
    report(handles).await;

    // Give recorders a moment to drain their inboxes
    tokio::time::sleep(Duration::from_secs(1)).await;
    for (i, participant) in participants.iter().enumerate() {
        let mut recorded = 0;
        for tx in &issued {
            if participant.ledger.has_transaction(&tx.id()).await? {
                recorded += 1;
            }
        }
        info!(participant = i, recorded, issued = issued.len(), "participant ledger");
    }
    info!(
        requests = notary.requests(),
        notarized = notary.notarized(),
        "notary"
    );

    if config.print_metrics {
        let mut buffer = String::new();
        for registry in participants
            .iter()
            .map(|participant| &participant.registry)
            .chain(std::iter::once(&network_registry))
        {
            let registry = registry.lock().unwrap_or_else(|e| e.into_inner());
            if encode(&mut buffer, &registry).is_err() {
                warn!("failed to encode metrics");
            }
        }
        println!("{buffer}");
    }
    Ok(())
}

async fn coordinator(
    local: &Participant,
    identities: &Identities,
    notary: &mocks::Notary,
    config: &NodeConfig,
) -> Result<Node, ratify_finality::Error> {
    let client = notary::Client::new(
        notary.clone(),
        notary::Config {
            timeout: Duration::from_secs(5),
            max_attempts: config.notary_attempts,
            backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
            registry: local.registry.clone(),
        },
    );
    Coordinator::init(
        local.storage.clone(),
        coordinator::Config {
            public_key: local.key.public_key(),
            ledger: local.ledger.clone(),
            identity: identities.clone(),
            notary: client,
            validator: (),
            bridge: local.bridge.clone(),
            notaries: local.parameters.notaries.clone(),
            partition: "checkpoints".into(),
            limits: Limits::default(),
            max_transaction_size: local.parameters.max_transaction_size as usize,
            broadcast_rounds: config.broadcast_rounds,
            round_timeout: config.round_timeout(),
            round_delay: Duration::from_secs(1),
            registry: local.registry.clone(),
        },
    )
    .await
}

/// Wait for every run and log its outcome.
async fn report(handles: Vec<RunHandle>) {
    let ids: Vec<_> = handles.iter().map(|handle| handle.id()).collect();
    let results = join_all(handles.into_iter().map(RunHandle::wait)).await;
    for (run, result) in ids.into_iter().zip(results) {
        match result {
            Ok(Finalized {
                transaction,
                unacknowledged,
                ..
            }) if unacknowledged.is_empty() => {
                info!(%run, id = %transaction.id(), "finalized");
            }
            Ok(Finalized {
                transaction,
                unacknowledged,
                ..
            }) => {
                warn!(%run, id = %transaction.id(), unacknowledged = unacknowledged.len(), "finalized with incomplete broadcast");
            }
            Err(err) if err.is_fatal() => warn!(%run, %err, "run failed"),
            Err(err) => warn!(%run, %err, "run suspended"),
        }
    }
}

fn issue(issuer: &PrivateKey, notary: &PublicKey, holders: &[PublicKey], i: usize) -> Transaction {
    Transaction::new(
        vec![],
        vec![State {
            participants: holders.to_vec(),
            data: Bytes::from(format!("asset-{i}")),
        }],
        Some(notary.clone()),
        None,
        vec![Command {
            name: "issue".into(),
            signers: vec![issuer.public_key()],
        }],
    )
    .sign(issuer)
}

fn spend(
    issuer: &PrivateKey,
    notary: &PublicKey,
    issued: &Transaction,
    owner: PublicKey,
) -> Transaction {
    Transaction::new(
        vec![StateRef {
            txid: issued.id(),
            index: 0,
        }],
        vec![State {
            participants: vec![owner],
            data: issued.outputs()[0].data.clone(),
        }],
        Some(notary.clone()),
        None,
        vec![Command {
            name: "move".into(),
            signers: vec![issuer.public_key()],
        }],
    )
    .sign(issuer)
}
