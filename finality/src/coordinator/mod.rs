//! Drive transactions to finality, surviving a crash at any point.
//!
//! # Stages
//!
//! ```text
//! Created -> Verifying -> AwaitingNotary -> Committed -> Broadcasting -> Done
//!                |              |               |
//!                v              v               +-----------------------> Done
//!              Failed         Failed
//! ```
//!
//! A run checkpoints a [state::RunState] before each suspension point: before requesting the
//! notary's signature (`AwaitingNotary`), after recording the transaction in the ledger
//! (`Committed`), and before each broadcast round (`Broadcasting`, with the recipients that
//! already acknowledged). The ledger write is the only step that cannot be repeated safely, and it
//! is idempotent, so a run resumed from any checkpoint reaches the same terminal state.
//!
//! Fatal errors (verification failures, notary rejections, and invalid notary signatures) end a
//! run as `Failed` and remove its checkpoint. Retryable errors (an unavailable notary, storage or
//! bridge trouble) leave the checkpoint in place for [Coordinator::resume_all]. Once committed, a
//! run can no longer fail: recipients that never acknowledge within the configured number of
//! rounds are reported in [Finalized::unacknowledged].
//!
//! # Cancellation
//!
//! [RunHandle::cancel] before the commit point removes the checkpoint and ends the run with
//! [Error::Cancelled]. After the commit point it only stops further broadcast.

mod config;
pub use config::Config;
mod engine;
pub use engine::Coordinator;
mod metrics;
pub mod state;

use crate::{
    identity::Recipient,
    types::{State, Transaction},
    Error,
};
use ratify_cryptography::ed25519::PublicKey;
use ratify_storage::checkpoint::RunId;
use tokio::{sync::watch, task::JoinHandle};

/// Progress of a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Created,
    Verifying,
    AwaitingNotary,
    Committed,
    Broadcasting,
    Done,
    Failed,
}

impl Stage {
    /// Returns whether a run may move from `self` to `next`.
    pub fn allows(self, next: Stage) -> bool {
        use Stage::*;
        matches!(
            (self, next),
            (Created, Verifying)
                | (Verifying, AwaitingNotary)
                | (Verifying, Committed)
                | (Verifying, Failed)
                | (AwaitingNotary, Committed)
                | (AwaitingNotary, Failed)
                | (Committed, Broadcasting)
                | (Committed, Done)
                | (Broadcasting, Done)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Done | Stage::Failed)
    }
}

/// Domain validation of a transaction and the states it consumes.
pub trait Validator: Clone + Send + Sync + 'static {
    fn validate(&self, transaction: &Transaction, inputs: &[State]) -> Result<(), String>;
}

/// Accepts every transaction.
impl Validator for () {
    fn validate(&self, _: &Transaction, _: &[State]) -> Result<(), String> {
        Ok(())
    }
}

/// Outcome of a committed run.
#[derive(Clone, Debug)]
pub struct Finalized {
    /// The committed transaction (carrying the notary's signature, if one was required).
    pub transaction: Transaction,

    /// Everyone the transaction was sent to.
    pub recipients: Vec<Recipient>,

    /// Recipients that did not acknowledge before broadcast stopped.
    pub unacknowledged: Vec<PublicKey>,

    /// Whether broadcast was stopped by [RunHandle::cancel].
    pub cancelled: bool,
}

impl Finalized {
    /// Returns whether every recipient acknowledged.
    pub fn is_complete(&self) -> bool {
        self.unacknowledged.is_empty()
    }
}

/// Handle to a run driven on its own task.
pub struct RunHandle {
    id: RunId,
    cancel: watch::Sender<bool>,
    stage: watch::Receiver<Stage>,
    join: JoinHandle<Result<Finalized, Error>>,
}

impl RunHandle {
    fn new(
        id: RunId,
        cancel: watch::Sender<bool>,
        stage: watch::Receiver<Stage>,
        join: JoinHandle<Result<Finalized, Error>>,
    ) -> Self {
        Self {
            id,
            cancel,
            stage,
            join,
        }
    }

    pub fn id(&self) -> RunId {
        self.id
    }

    /// The stage the run is in.
    pub fn stage(&self) -> Stage {
        *self.stage.borrow()
    }

    /// Wait until the run reaches `stage`. Returns false if it ended elsewhere.
    pub async fn reached(&mut self, stage: Stage) -> bool {
        self.stage.wait_for(|current| *current == stage).await.is_ok()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }

    /// Wait for the run to end.
    pub async fn wait(self) -> Result<Finalized, Error> {
        self.join.await.unwrap_or(Err(Error::Cancelled))
    }

    /// Stop the run's task without any cleanup (as a crash would).
    #[cfg(test)]
    pub(crate) fn abort(&self) {
        self.join.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        identity::{Party, Registry as Identities},
        ledger::{self, Ledger},
        mocks,
        notary::{self, Notary as _, Rejection},
        types::{Command, Limits, StateRef, TimeWindow},
        VerificationError,
    };
    use bytes::Bytes;
    use futures::{future::join_all, StreamExt};
    use prometheus_client::{encoding::text::encode, registry::Registry};
    use ratify_bridge::{
        reliable::{self, Inbox, Mailbox},
        simulated::network::{self, Link, Network, Oracle},
    };
    use ratify_codec::Encode as _;
    use ratify_cryptography::{ed25519::PrivateKey, Signer as _};
    use ratify_macros::test_traced;
    use ratify_runtime::memory;
    use std::{
        sync::{Arc, Mutex},
        time::Duration,
    };
    use tokio::task::JoinHandle;

    type TestCoordinator = Coordinator<
        memory::Storage,
        ledger::Store<memory::Storage>,
        Identities,
        mocks::Notary,
        (),
    >;

    const CHECKPOINTS: &str = "checkpoints";

    fn network() -> Oracle {
        let (network, oracle) = Network::new(network::Config {
            registry: Arc::new(Mutex::new(Registry::default())),
            max_message_size: 1024 * 1024,
            seed: 0,
        });
        network.start();
        oracle
    }

    fn link(oracle: &Oracle, a: &PublicKey, b: &PublicKey) {
        let link = Link {
            latency_mean: 10.0,
            latency_stddev: 1.0,
            success_rate: 1.0,
        };
        oracle.link(a.clone(), b.clone(), link.clone()).unwrap();
        oracle.link(b.clone(), a.clone(), link).unwrap();
    }

    fn bridge(oracle: &Oracle, key: &PublicKey) -> (Mailbox, Inbox) {
        let (sender, receiver) = oracle.register(key.clone());
        let (engine, mailbox, inbox) = reliable::Engine::new(reliable::Config {
            public_key: key.clone(),
            registry: Arc::new(Mutex::new(Registry::default())),
            mailbox_size: 1024,
            inbox_size: 1024,
            window_size: 16,
            max_attempts: 20,
            ack_timeout: Duration::from_millis(200),
            retry_delay: Duration::from_millis(50),
            dedup_capacity: 1024,
            history_size: 16,
            max_payload_size: 512 * 1024,
        });
        engine.start(sender, receiver);
        (mailbox, inbox)
    }

    fn ledger(storage: &memory::Storage) -> ledger::Store<memory::Storage> {
        ledger::Store::new(
            storage.clone(),
            ledger::Config {
                partition: "ledger".into(),
                limits: Limits::default(),
                max_transaction_size: 512 * 1024,
                registry: Arc::new(Mutex::new(Registry::default())),
            },
        )
    }

    struct Fixture {
        storage: memory::Storage,
        key: PrivateKey,
        ledger: ledger::Store<memory::Storage>,
        identities: Identities,
        notary: mocks::Notary,
        bridge: Mailbox,
        registry: Arc<Mutex<Registry>>,
    }

    impl Fixture {
        fn new(oracle: &Oracle, notary: &mocks::Notary) -> Self {
            let storage = memory::Storage::default();
            let key = PrivateKey::from_seed(1);
            let (bridge, _) = self::bridge(oracle, &key.public_key());
            let identities = Identities::default();
            identities.register(Party {
                key: key.public_key(),
                name: "alice".into(),
            });
            Self {
                ledger: ledger(&storage),
                storage,
                key,
                identities,
                notary: notary.clone(),
                bridge,
                registry: Arc::new(Mutex::new(Registry::default())),
            }
        }

        async fn coordinator(&self) -> TestCoordinator {
            self.coordinator_with(Duration::from_secs(1), 3).await
        }

        async fn coordinator_with(&self, notary_timeout: Duration, rounds: u32) -> TestCoordinator {
            let client = notary::Client::new(
                self.notary.clone(),
                notary::Config {
                    timeout: notary_timeout,
                    max_attempts: 3,
                    backoff: Duration::from_millis(100),
                    max_backoff: Duration::from_secs(1),
                    registry: Arc::new(Mutex::new(Registry::default())),
                },
            );
            Coordinator::init(
                self.storage.clone(),
                Config {
                    public_key: self.key.public_key(),
                    ledger: self.ledger.clone(),
                    identity: self.identities.clone(),
                    notary: client,
                    validator: (),
                    bridge: self.bridge.clone(),
                    notaries: vec![self.notary.public_key()],
                    partition: CHECKPOINTS.into(),
                    limits: Limits::default(),
                    max_transaction_size: 512 * 1024,
                    broadcast_rounds: rounds,
                    round_timeout: Duration::from_secs(10),
                    round_delay: Duration::from_millis(500),
                    registry: self.registry.clone(),
                },
            )
            .await
            .unwrap()
        }

        fn checkpoints(&self) -> usize {
            self.storage.snapshot(CHECKPOINTS).len()
        }

        /// An issuance (no inputs, no time-window) of a state shared with `participants`.
        fn issue(&self, data: &'static [u8], participants: Vec<PublicKey>) -> Transaction {
            Transaction::new(
                vec![],
                vec![State {
                    participants,
                    data: Bytes::from_static(data),
                }],
                Some(self.notary.public_key()),
                None,
                vec![Command {
                    name: "issue".into(),
                    signers: vec![self.key.public_key()],
                }],
            )
            .sign(&self.key)
        }

        /// A transaction consuming output 0 of `input`.
        fn spend(&self, input: &Transaction, data: &'static [u8]) -> Transaction {
            Transaction::new(
                vec![StateRef {
                    txid: input.id(),
                    index: 0,
                }],
                vec![State {
                    participants: vec![self.key.public_key()],
                    data: Bytes::from_static(data),
                }],
                Some(self.notary.public_key()),
                None,
                vec![Command {
                    name: "move".into(),
                    signers: vec![self.key.public_key()],
                }],
            )
            .sign(&self.key)
        }
    }

    /// Apply every payload delivered to the inbox until it stays idle for a minute.
    fn consume(mut inbox: Inbox) -> JoinHandle<Vec<Bytes>> {
        tokio::spawn(async move {
            let mut received = Vec::new();
            while let Ok(Some((_, envelope, acknowledgement))) =
                tokio::time::timeout(Duration::from_secs(60), inbox.next()).await
            {
                acknowledgement.acknowledge();
                received.push(envelope.payload);
            }
            received
        })
    }

    #[test]
    fn test_stage_transitions() {
        assert!(Stage::Created.allows(Stage::Verifying));
        assert!(Stage::Verifying.allows(Stage::Failed));
        assert!(Stage::AwaitingNotary.allows(Stage::Failed));
        assert!(!Stage::Committed.allows(Stage::Failed));
        assert!(!Stage::Broadcasting.allows(Stage::Failed));
        assert!(!Stage::Done.allows(Stage::Broadcasting));
        assert!(Stage::Done.is_terminal());
        assert!(!Stage::Broadcasting.is_terminal());
    }

    #[test_traced]
    async fn test_issuance_skips_notary_and_delivers_once() {
        let oracle = network();
        let notary = mocks::Notary::new(PrivateKey::from_seed(0));
        let fixture = Fixture::new(&oracle, &notary);
        let bob = PrivateKey::from_seed(2).public_key();
        let carol = PrivateKey::from_seed(3).public_key();
        link(&oracle, &fixture.key.public_key(), &bob);
        link(&oracle, &fixture.key.public_key(), &carol);
        let bob_inbox = consume(bridge(&oracle, &bob).1);
        let carol_inbox = consume(bridge(&oracle, &carol).1);
        fixture.identities.register(Party {
            key: bob.clone(),
            name: "bob".into(),
        });

        let coordinator = fixture.coordinator().await;
        let tx = fixture.issue(b"issued", vec![bob.clone(), carol.clone()]);
        let finalized = coordinator.finalize(tx.clone(), vec![]).await.unwrap();
        assert!(finalized.is_complete());
        assert!(!finalized.cancelled);
        assert_eq!(finalized.transaction, tx);
        assert!(finalized.recipients.contains(&Recipient::WellKnown(Party {
            key: bob.clone(),
            name: "bob".into(),
        })));
        assert!(finalized
            .recipients
            .contains(&Recipient::Anonymous(carol.clone())));

        // Notarization skipped
        assert_eq!(notary.requests(), 0);
        assert!(fixture.ledger.has_transaction(&tx.id()).await.unwrap());
        assert_eq!(fixture.checkpoints(), 0);

        // Exactly one delivery each
        let payload = tx.encode().freeze();
        assert_eq!(bob_inbox.await.unwrap(), vec![payload.clone()]);
        assert_eq!(carol_inbox.await.unwrap(), vec![payload]);
    }

    #[test_traced]
    async fn test_unreachable_notary_commits_same_transaction() {
        let oracle = network();
        let signer = PrivateKey::from_seed(0);

        // Immediate success
        let immediate = {
            let notary = mocks::Notary::new(signer.clone());
            let fixture = Fixture::new(&oracle, &notary);
            let coordinator = fixture.coordinator().await;
            let issue = fixture.issue(b"issued", vec![]);
            coordinator.finalize(issue.clone(), vec![]).await.unwrap();
            let spend = fixture.spend(&issue, b"spent");
            coordinator.finalize(spend, vec![]).await.unwrap().transaction
        };

        // Unreachable twice, then success
        let notary = mocks::Notary::new(signer);
        notary.fail_next(2);
        let fixture = Fixture::new(&oracle, &notary);
        let coordinator = fixture.coordinator().await;
        let issue = fixture.issue(b"issued", vec![]);
        coordinator.finalize(issue.clone(), vec![]).await.unwrap();
        let spend = fixture.spend(&issue, b"spent");
        let finalized = coordinator.finalize(spend.clone(), vec![]).await.unwrap();
        assert_eq!(notary.requests(), 3);
        assert_eq!(finalized.transaction, immediate);
        assert!(finalized.transaction.is_notary_complete());
        assert_eq!(
            fixture.ledger.transaction(&spend.id()).await.unwrap(),
            Some(immediate)
        );
    }

    #[test_traced]
    async fn test_concurrent_double_spend() {
        let oracle = network();
        let notary = mocks::Notary::new(PrivateKey::from_seed(0));
        let fixture = Fixture::new(&oracle, &notary);
        let coordinator = fixture.coordinator().await;
        let issue = fixture.issue(b"issued", vec![]);
        coordinator.finalize(issue.clone(), vec![]).await.unwrap();

        let first = coordinator.start(fixture.spend(&issue, b"first"), vec![]);
        let second = coordinator.start(fixture.spend(&issue, b"second"), vec![]);
        let results = join_all([first.wait(), second.wait()]).await;

        let committed: Vec<&Finalized> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
        assert_eq!(committed.len(), 1);
        let winner = committed[0].transaction.id();
        let rejected = results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .collect::<Vec<_>>();
        assert_eq!(rejected.len(), 1);
        match rejected[0] {
            Error::Rejected(Rejection::Conflict { consumer, .. }) => assert_eq!(*consumer, winner),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(notary.notarized(), 1);
        assert_eq!(fixture.checkpoints(), 0);

        let mut buffer = String::new();
        encode(&mut buffer, &fixture.registry.lock().unwrap()).unwrap();
        assert!(buffer.contains("coordinator_runs_total{status=\"Failure\"} 1"));
    }

    #[test_traced]
    async fn test_verification_failures() {
        let oracle = network();
        let notary = mocks::Notary::new(PrivateKey::from_seed(0));
        let fixture = Fixture::new(&oracle, &notary);
        let coordinator = fixture.coordinator().await;

        // Missing command signature
        let unsigned = Transaction::new(
            vec![],
            vec![],
            None,
            None,
            vec![Command {
                name: "issue".into(),
                signers: vec![fixture.key.public_key()],
            }],
        );
        assert!(matches!(
            coordinator.finalize(unsigned, vec![]).await,
            Err(Error::Verification(VerificationError::MissingSignatures(_)))
        ));

        // Input never recorded
        let unknown = fixture.issue(b"unknown", vec![]);
        let spend = fixture.spend(&unknown, b"spent");
        assert!(matches!(
            coordinator.finalize(spend, vec![]).await,
            Err(Error::Verification(VerificationError::UnresolvedInput(_)))
        ));

        // Notary not in the network parameters
        let rogue = PrivateKey::from_seed(66);
        let tx = Transaction::new(
            vec![],
            vec![],
            Some(rogue.public_key()),
            TimeWindow::new(None, Some(u64::MAX)),
            vec![],
        );
        let err = coordinator.finalize(tx, vec![]).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Verification(VerificationError::UnknownNotary(_))
        ));
        assert!(err.is_fatal());

        // Nothing was checkpointed or notarized
        assert_eq!(fixture.checkpoints(), 0);
        assert_eq!(notary.requests(), 0);
    }

    #[test_traced]
    async fn test_validator_rejects() {
        #[derive(Clone)]
        struct NoEmptyOutputs;

        impl Validator for NoEmptyOutputs {
            fn validate(&self, transaction: &Transaction, _: &[State]) -> Result<(), String> {
                if transaction.outputs().iter().any(|s| s.data.is_empty()) {
                    return Err("empty output".into());
                }
                Ok(())
            }
        }

        let oracle = network();
        let notary = mocks::Notary::new(PrivateKey::from_seed(0));
        let fixture = Fixture::new(&oracle, &notary);
        let client = notary::Client::new(
            notary.clone(),
            notary::Config {
                timeout: Duration::from_secs(1),
                max_attempts: 1,
                backoff: Duration::from_millis(100),
                max_backoff: Duration::from_secs(1),
                registry: Arc::new(Mutex::new(Registry::default())),
            },
        );
        let coordinator = Coordinator::init(
            fixture.storage.clone(),
            Config {
                public_key: fixture.key.public_key(),
                ledger: fixture.ledger.clone(),
                identity: fixture.identities.clone(),
                notary: client,
                validator: NoEmptyOutputs,
                bridge: fixture.bridge.clone(),
                notaries: vec![notary.public_key()],
                partition: CHECKPOINTS.into(),
                limits: Limits::default(),
                max_transaction_size: 512 * 1024,
                broadcast_rounds: 1,
                round_timeout: Duration::from_secs(1),
                round_delay: Duration::from_secs(1),
                registry: fixture.registry.clone(),
            },
        )
        .await
        .unwrap();

        let result = coordinator.finalize(fixture.issue(b"", vec![]), vec![]).await;
        assert!(matches!(
            result,
            Err(Error::Verification(VerificationError::Invalid(reason))) if reason == "empty output"
        ));
        coordinator
            .finalize(fixture.issue(b"full", vec![]), vec![])
            .await
            .unwrap();
    }

    #[test_traced]
    async fn test_resume_after_crash_awaiting_notary() {
        let oracle = network();
        let notary = mocks::Notary::new(PrivateKey::from_seed(0));
        let fixture = Fixture::new(&oracle, &notary);
        let bob = PrivateKey::from_seed(2).public_key();
        link(&oracle, &fixture.key.public_key(), &bob);
        let bob_inbox = consume(bridge(&oracle, &bob).1);

        let coordinator = fixture.coordinator_with(Duration::from_secs(60), 3).await;
        let issue = fixture.issue(b"issued", vec![]);
        coordinator.finalize(issue.clone(), vec![]).await.unwrap();

        // Crash while the notary is considering the request
        notary.stall_next(1, Duration::from_secs(30));
        let spend = fixture.spend(&issue, b"spent");
        let mut handle = coordinator.start(spend.clone(), vec![bob.clone()]);
        assert!(handle.reached(Stage::AwaitingNotary).await);
        handle.abort();
        drop(coordinator);
        assert_eq!(fixture.checkpoints(), 1);
        assert!(!fixture.ledger.has_transaction(&spend.id()).await.unwrap());

        // Restart and resume
        let restarted = fixture.coordinator().await;
        let handles = restarted.resume_all().await.unwrap();
        assert_eq!(handles.len(), 1);
        assert_eq!(handles[0].stage(), Stage::AwaitingNotary);
        let finalized = handles.into_iter().next().unwrap().wait().await.unwrap();
        assert!(finalized.is_complete());
        assert!(finalized.transaction.is_notary_complete());
        assert_eq!(notary.notarized(), 1);
        assert_eq!(
            fixture.ledger.transaction(&spend.id()).await.unwrap(),
            Some(finalized.transaction.clone())
        );
        assert_eq!(fixture.checkpoints(), 0);
        assert_eq!(
            bob_inbox.await.unwrap(),
            vec![finalized.transaction.encode().freeze()]
        );

        // Nothing left to resume
        assert!(restarted.resume_all().await.unwrap().is_empty());
    }

    #[test_traced]
    async fn test_resume_after_crash_broadcasting() {
        let oracle = network();
        let notary = mocks::Notary::new(PrivateKey::from_seed(0));
        let fixture = Fixture::new(&oracle, &notary);
        let bob = PrivateKey::from_seed(2).public_key();

        // Bob is offline
        let coordinator = fixture.coordinator().await;
        let tx = fixture.issue(b"issued", vec![bob.clone()]);
        let mut handle = coordinator.start(tx.clone(), vec![]);
        assert!(handle.reached(Stage::Broadcasting).await);
        handle.abort();
        drop(coordinator);
        assert!(fixture.ledger.has_transaction(&tx.id()).await.unwrap());
        assert_eq!(fixture.checkpoints(), 1);

        // Bob comes online and the node restarts
        link(&oracle, &fixture.key.public_key(), &bob);
        let bob_inbox = consume(bridge(&oracle, &bob).1);
        let restarted = fixture.coordinator().await;
        let mut handles = restarted.resume_all().await.unwrap();
        assert_eq!(handles.len(), 1);
        let finalized = handles.remove(0).wait().await.unwrap();
        assert!(finalized.is_complete());
        assert_eq!(finalized.transaction, tx);
        assert_eq!(fixture.checkpoints(), 0);
        assert_eq!(bob_inbox.await.unwrap(), vec![tx.encode().freeze()]);
    }

    #[test_traced]
    async fn test_broadcast_incomplete() {
        let oracle = network();
        let notary = mocks::Notary::new(PrivateKey::from_seed(0));
        let fixture = Fixture::new(&oracle, &notary);
        let bob = PrivateKey::from_seed(2).public_key();

        let coordinator = fixture.coordinator_with(Duration::from_secs(1), 2).await;
        let tx = fixture.issue(b"issued", vec![bob.clone()]);
        let finalized = coordinator.finalize(tx.clone(), vec![]).await.unwrap();
        assert_eq!(finalized.unacknowledged, vec![bob]);
        assert!(!finalized.cancelled);
        assert!(fixture.ledger.has_transaction(&tx.id()).await.unwrap());
        assert_eq!(fixture.checkpoints(), 0);

        let mut buffer = String::new();
        encode(&mut buffer, &fixture.registry.lock().unwrap()).unwrap();
        assert!(buffer.contains("coordinator_incomplete_total 1"));
    }

    #[test_traced]
    async fn test_cancel_before_commit() {
        let oracle = network();
        let notary = mocks::Notary::new(PrivateKey::from_seed(0));
        let fixture = Fixture::new(&oracle, &notary);
        let coordinator = fixture.coordinator_with(Duration::from_secs(60), 3).await;
        let issue = fixture.issue(b"issued", vec![]);
        coordinator.finalize(issue.clone(), vec![]).await.unwrap();

        notary.stall_next(1, Duration::from_secs(30));
        let spend = fixture.spend(&issue, b"spent");
        let mut handle = coordinator.start(spend.clone(), vec![]);
        assert!(handle.reached(Stage::AwaitingNotary).await);
        handle.cancel();
        assert!(matches!(handle.wait().await, Err(Error::Cancelled)));
        assert!(!fixture.ledger.has_transaction(&spend.id()).await.unwrap());
        assert_eq!(fixture.checkpoints(), 0);
    }

    #[test_traced]
    async fn test_cancel_after_commit() {
        let oracle = network();
        let notary = mocks::Notary::new(PrivateKey::from_seed(0));
        let fixture = Fixture::new(&oracle, &notary);
        let bob = PrivateKey::from_seed(2).public_key();
        let coordinator = fixture.coordinator().await;

        let tx = fixture.issue(b"issued", vec![bob.clone()]);
        let mut handle = coordinator.start(tx.clone(), vec![]);
        assert!(handle.reached(Stage::Broadcasting).await);
        handle.cancel();
        let finalized = handle.wait().await.unwrap();
        assert!(finalized.cancelled);
        assert_eq!(finalized.unacknowledged, vec![bob]);

        // Never un-committed
        assert!(fixture.ledger.has_transaction(&tx.id()).await.unwrap());
        assert_eq!(fixture.checkpoints(), 0);
    }

    #[test_traced]
    async fn test_finalize_twice_is_idempotent() {
        let oracle = network();
        let notary = mocks::Notary::new(PrivateKey::from_seed(0));
        let fixture = Fixture::new(&oracle, &notary);
        let bob = PrivateKey::from_seed(2).public_key();
        link(&oracle, &fixture.key.public_key(), &bob);
        let bob_inbox = consume(bridge(&oracle, &bob).1);
        let coordinator = fixture.coordinator().await;

        let issue = fixture.issue(b"issued", vec![]);
        coordinator.finalize(issue.clone(), vec![]).await.unwrap();
        let spend = fixture.spend(&issue, b"spent");
        let first = coordinator
            .finalize(spend.clone(), vec![bob.clone()])
            .await
            .unwrap();
        let ledger = fixture.storage.snapshot("ledger");

        let second = coordinator.finalize(spend, vec![bob]).await.unwrap();
        assert_eq!(first.transaction, second.transaction);
        assert_eq!(fixture.storage.snapshot("ledger"), ledger);
        assert_eq!(notary.notarized(), 1);
        assert_eq!(bob_inbox.await.unwrap().len(), 1);
    }

    #[test_traced]
    async fn test_resume_skips_acknowledged_recipients() {
        let oracle = network();
        let notary = mocks::Notary::new(PrivateKey::from_seed(0));
        let fixture = Fixture::new(&oracle, &notary);
        let alice = fixture.key.public_key();
        let bob = PrivateKey::from_seed(2).public_key();
        let carol = PrivateKey::from_seed(3).public_key();

        // Bob acknowledges while carol is offline, then the node crashes mid-round
        link(&oracle, &alice, &bob);
        let bob_inbox = consume(bridge(&oracle, &bob).1);
        let coordinator = fixture.coordinator().await;
        let tx = fixture.issue(b"issued", vec![bob.clone(), carol.clone()]);
        let mut handle = coordinator.start(tx.clone(), vec![]);
        assert!(handle.reached(Stage::Broadcasting).await);
        tokio::time::sleep(Duration::from_secs(2)).await;
        handle.abort();
        drop(coordinator);
        assert_eq!(fixture.checkpoints(), 1);

        // Bob goes offline and carol comes online before the restart
        oracle.unlink(&alice, &bob);
        oracle.unlink(&bob, &alice);
        link(&oracle, &alice, &carol);
        let carol_inbox = consume(bridge(&oracle, &carol).1);
        let restarted = fixture.coordinator().await;
        let mut handles = restarted.resume_all().await.unwrap();
        assert_eq!(handles.len(), 1);

        // Only carol was still owed the transaction
        let finalized = handles.remove(0).wait().await.unwrap();
        assert!(finalized.is_complete());
        assert!(finalized.unacknowledged.is_empty());
        assert_eq!(fixture.checkpoints(), 0);
        assert_eq!(bob_inbox.await.unwrap(), vec![tx.encode().freeze()]);
        assert_eq!(carol_inbox.await.unwrap(), vec![tx.encode().freeze()]);
    }

    #[test_traced]
    async fn test_too_many_recipients_fails_before_commit() {
        let oracle = network();
        let notary = mocks::Notary::new(PrivateKey::from_seed(0));
        let fixture = Fixture::new(&oracle, &notary);
        let coordinator = fixture.coordinator().await;

        let extra: Vec<PublicKey> = (0..1_100)
            .map(|i| PrivateKey::from_seed(100 + i).public_key())
            .collect();
        let tx = fixture.issue(b"crowded", vec![]);
        let err = coordinator.finalize(tx.clone(), extra).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Verification(VerificationError::TooManyRecipients(1_100))
        ));
        assert!(err.is_fatal());

        // Nothing was committed or left to resume
        assert!(!fixture.ledger.has_transaction(&tx.id()).await.unwrap());
        assert_eq!(fixture.checkpoints(), 0);
        assert!(coordinator.resume_all().await.unwrap().is_empty());
    }
}
