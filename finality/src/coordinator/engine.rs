use super::{
    config::Config,
    metrics::Metrics,
    state::{RunState, MAX_RECIPIENTS},
    Finalized, RunHandle, Stage, Validator,
};
use crate::{
    identity::IdentityResolver,
    ledger::Ledger,
    notary::{self, Notary},
    types::{Limits, State},
    Error, Transaction, VerificationError,
};
use futures::{stream::FuturesUnordered, StreamExt};
use prometheus_client::metrics::gauge::Gauge;
use ratify_bridge::reliable::{self, Mailbox};
use ratify_codec::{Decode as _, Encode as _, EncodeSize as _};
use ratify_cryptography::ed25519::PublicKey;
use ratify_runtime::{
    telemetry::status::{CounterExt, Status},
    Storage,
};
use ratify_storage::checkpoint::{self, RunId};
use std::{
    collections::{BTreeSet, HashSet},
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::{
    select,
    sync::watch,
    time::{sleep, sleep_until, Instant},
};
use tracing::{debug, info, trace, warn};

/// How a run begins.
enum Start {
    Fresh {
        transaction: Transaction,
        extra_recipients: Vec<PublicKey>,
    },
    Resume {
        sequence: u64,
        state: RunState,
    },
}

/// A run being driven by this process.
struct Run {
    id: RunId,
    sequence: u64,
    stage: watch::Sender<Stage>,
    cancel: watch::Receiver<bool>,
}

impl Run {
    fn enter(&self, next: Stage) {
        let current = *self.stage.borrow();
        if current == next {
            return;
        }
        debug_assert!(current.allows(next), "invalid transition {current:?} -> {next:?}");
        trace!(run = %self.id, from = ?current, to = ?next, "stage");
        self.stage.send_replace(next);
    }

    fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }
}

/// Resolves once cancellation is requested (never, if the handle was dropped).
async fn wait_cancelled(cancel: &mut watch::Receiver<bool>) {
    if cancel.wait_for(|cancelled| *cancelled).await.is_err() {
        futures::future::pending::<()>().await;
    }
}

/// Exclusive claim on driving a run in this process.
struct Claim {
    active: Arc<Mutex<HashSet<RunId>>>,
    gauge: Gauge,
    run: RunId,
}

impl Drop for Claim {
    fn drop(&mut self) {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        active.remove(&self.run);
        self.gauge.dec();
    }
}

struct Inner<S, L, I, N, V>
where
    S: Storage,
    L: Ledger,
    I: IdentityResolver,
    N: Notary,
    V: Validator,
{
    public_key: PublicKey,
    checkpoints: checkpoint::Store<S>,
    ledger: L,
    identity: I,
    notary: notary::Client<N>,
    validator: V,
    bridge: Mailbox,

    notaries: Vec<PublicKey>,
    limits: Limits,
    max_transaction_size: usize,
    broadcast_rounds: u32,
    round_timeout: Duration,
    round_delay: Duration,

    active: Arc<Mutex<HashSet<RunId>>>,
    metrics: Metrics,
}

/// Drives transactions to finality. Clones share the same checkpoint store and collaborators.
pub struct Coordinator<S, L, I, N, V>
where
    S: Storage,
    L: Ledger,
    I: IdentityResolver,
    N: Notary,
    V: Validator,
{
    inner: Arc<Inner<S, L, I, N, V>>,
}

impl<S, L, I, N, V> Clone for Coordinator<S, L, I, N, V>
where
    S: Storage,
    L: Ledger,
    I: IdentityResolver,
    N: Notary,
    V: Validator,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S, L, I, N, V> Coordinator<S, L, I, N, V>
where
    S: Storage,
    L: Ledger,
    I: IdentityResolver,
    N: Notary,
    V: Validator,
{
    /// Create a coordinator whose runs are checkpointed in `storage`.
    ///
    /// Runs suspended by a previous process are not resumed until [Coordinator::resume_all].
    pub async fn init(storage: S, cfg: Config<L, I, N, V>) -> Result<Self, Error> {
        let checkpoints = checkpoint::Store::init(
            storage,
            checkpoint::Config {
                partition: cfg.partition,
                max_state_size: RunState::max_size(cfg.max_transaction_size),
                registry: cfg.registry.clone(),
            },
        )
        .await?;
        let metrics = {
            let mut registry = cfg.registry.lock().unwrap_or_else(|e| e.into_inner());
            Metrics::init(&mut registry)
        };
        Ok(Self {
            inner: Arc::new(Inner {
                public_key: cfg.public_key,
                checkpoints,
                ledger: cfg.ledger,
                identity: cfg.identity,
                notary: cfg.notary,
                validator: cfg.validator,
                bridge: cfg.bridge,
                notaries: cfg.notaries,
                limits: cfg.limits,
                max_transaction_size: cfg.max_transaction_size,
                broadcast_rounds: cfg.broadcast_rounds.max(1),
                round_timeout: cfg.round_timeout,
                round_delay: cfg.round_delay,
                active: Arc::new(Mutex::new(HashSet::new())),
                metrics,
            }),
        })
    }

    /// Drive `transaction` to finality on the current task.
    ///
    /// Besides the participants of its input and output states, the finalized transaction is
    /// sent to every key in `extra_recipients`.
    pub async fn finalize(
        &self,
        transaction: Transaction,
        extra_recipients: Vec<PublicKey>,
    ) -> Result<Finalized, Error> {
        let (run, claim) = self.claim_fresh();
        let (_cancel, cancelled) = watch::channel(false);
        let (stage, _) = watch::channel(Stage::Created);
        let start = Start::Fresh {
            transaction,
            extra_recipients,
        };
        self.execute(run, start, stage, cancelled, claim).await
    }

    /// Drive `transaction` to finality on a new task.
    pub fn start(&self, transaction: Transaction, extra_recipients: Vec<PublicKey>) -> RunHandle {
        let (run, claim) = self.claim_fresh();
        let start = Start::Fresh {
            transaction,
            extra_recipients,
        };
        self.spawn(run, claim, start, Stage::Created)
    }

    /// Resume every run with a live checkpoint that is not already being driven.
    pub async fn resume_all(&self) -> Result<Vec<RunHandle>, Error> {
        let mut suspended = Vec::new();
        {
            let mut scan = Box::pin(self.inner.checkpoints.scan());
            while let Some(item) = scan.next().await {
                let (run, checkpoint) = item?;
                match RunState::decode_cfg(checkpoint.state, &self.inner.limits) {
                    Ok(state) => suspended.push((run, checkpoint.sequence, state)),
                    Err(err) => warn!(%run, ?err, "skipping undecodable checkpoint"),
                }
            }
        }

        let mut handles = Vec::with_capacity(suspended.len());
        for (run, sequence, state) in suspended {
            let stage = state.stage();
            let start = Start::Resume {
                sequence: sequence + 1,
                state,
            };
            let Some(claim) = self.claim(run) else {
                debug!(%run, "run already active");
                continue;
            };
            self.inner.metrics.resumed.inc();
            info!(%run, ?stage, "resumed run");
            handles.push(self.spawn(run, claim, start, stage));
        }
        Ok(handles)
    }

    fn claim(&self, run: RunId) -> Option<Claim> {
        let mut active = self.inner.active.lock().unwrap_or_else(|e| e.into_inner());
        if !active.insert(run) {
            return None;
        }
        self.inner.metrics.active.inc();
        Some(Claim {
            active: self.inner.active.clone(),
            gauge: self.inner.metrics.active.clone(),
            run,
        })
    }

    /// Claim a fresh run id.
    fn claim_fresh(&self) -> (RunId, Claim) {
        loop {
            let run = RunId::random();
            if let Some(claim) = self.claim(run) {
                return (run, claim);
            }
        }
    }

    fn spawn(&self, run: RunId, claim: Claim, start: Start, initial: Stage) -> RunHandle {
        let (cancel, cancelled) = watch::channel(false);
        let (stage, observer) = watch::channel(initial);
        let coordinator = self.clone();
        let join = tokio::spawn(async move {
            coordinator
                .execute(run, start, stage, cancelled, claim)
                .await
        });
        RunHandle::new(run, cancel, observer, join)
    }

    async fn execute(
        &self,
        run: RunId,
        start: Start,
        stage: watch::Sender<Stage>,
        cancel: watch::Receiver<bool>,
        _claim: Claim,
    ) -> Result<Finalized, Error> {
        let mut ctx = Run {
            id: run,
            sequence: 0,
            stage,
            cancel,
        };
        let result = match start {
            Start::Fresh {
                transaction,
                extra_recipients,
            } => self.begin(&mut ctx, transaction, extra_recipients).await,
            Start::Resume { sequence, state } => {
                ctx.sequence = sequence;
                self.advance(&mut ctx, state).await
            }
        };

        let status = match &result {
            Ok(finalized) if finalized.cancelled => Status::Dropped,
            Ok(_) => Status::Success,
            Err(Error::Verification(_)) => Status::Invalid,
            Err(err) if err.is_fatal() => Status::Failure,
            Err(_) => Status::Dropped,
        };
        self.inner.metrics.runs.inc(status);
        result
    }

    async fn begin(
        &self,
        ctx: &mut Run,
        transaction: Transaction,
        extra_recipients: Vec<PublicKey>,
    ) -> Result<Finalized, Error> {
        let id = transaction.id();
        ctx.enter(Stage::Verifying);
        let verified = match self.verify(&transaction).await {
            Ok(inputs) => self.recipients(&transaction, &inputs, extra_recipients),
            Err(err) => Err(err),
        };
        let recipients = match verified {
            Ok(recipients) => recipients,
            Err(err) => {
                warn!(run = %ctx.id, %id, %err, "verification failed");
                ctx.enter(Stage::Failed);
                return Err(err);
            }
        };
        debug!(run = %ctx.id, %id, recipients = recipients.len(), "verified transaction");

        if transaction.needs_notarization() && !transaction.is_notary_complete() {
            if ctx.is_cancelled() {
                ctx.enter(Stage::Failed);
                return Err(Error::Cancelled);
            }
            let state = RunState::AwaitingNotary {
                transaction,
                recipients,
            };
            self.checkpoint(ctx, &state).await?;
            ctx.enter(Stage::AwaitingNotary);
            return self.advance(ctx, state).await;
        }
        let state = self.commit(ctx, transaction, recipients).await?;
        self.advance(ctx, state).await
    }

    async fn advance(&self, ctx: &mut Run, mut state: RunState) -> Result<Finalized, Error> {
        loop {
            state = match state {
                RunState::AwaitingNotary {
                    transaction,
                    recipients,
                } => {
                    let transaction = self.notarize(ctx, transaction).await?;
                    self.commit(ctx, transaction, recipients).await?
                }
                RunState::Committed {
                    transaction,
                    recipients,
                } => RunState::Broadcasting {
                    transaction,
                    recipients,
                    acknowledged: Vec::new(),
                    round: 0,
                },
                RunState::Broadcasting {
                    transaction,
                    recipients,
                    acknowledged,
                    round,
                } => {
                    return self
                        .broadcast(ctx, transaction, recipients, acknowledged, round)
                        .await
                }
            };
        }
    }

    /// Check size, signatures (except the notary's), the notary, inputs, and domain rules.
    ///
    /// Returns the states consumed by the transaction.
    async fn verify(&self, transaction: &Transaction) -> Result<Vec<State>, Error> {
        let size = transaction.encode_size();
        if size > self.inner.max_transaction_size {
            return Err(VerificationError::TooLarge(size).into());
        }
        let notary = transaction.notary().cloned();
        if transaction.needs_notarization() {
            let Some(notary) = &notary else {
                return Err(VerificationError::MissingNotary.into());
            };
            if !self.inner.notaries.contains(notary) || *notary != self.inner.notary.notary_key()
            {
                return Err(VerificationError::UnknownNotary(notary.clone()).into());
            }
        }
        let exempt: Vec<PublicKey> = notary.into_iter().collect();
        transaction.verify_signatures_except(&exempt)?;

        let mut inputs = Vec::with_capacity(transaction.inputs().len());
        for input in transaction.inputs() {
            let state = self
                .inner
                .ledger
                .transaction(&input.txid)
                .await?
                .and_then(|defining| defining.outputs().get(input.index as usize).cloned())
                .ok_or(VerificationError::UnresolvedInput(*input))?;
            inputs.push(state);
        }
        self.inner
            .validator
            .validate(transaction, &inputs)
            .map_err(VerificationError::Invalid)?;
        Ok(inputs)
    }

    /// Every participant of the consumed and produced states plus `extra`, except ourselves.
    ///
    /// Fails if there are more recipients than a checkpoint can track.
    fn recipients(
        &self,
        transaction: &Transaction,
        inputs: &[State],
        extra: Vec<PublicKey>,
    ) -> Result<Vec<PublicKey>, Error> {
        let mut keys: BTreeSet<PublicKey> = inputs
            .iter()
            .chain(transaction.outputs())
            .flat_map(|state| state.participants.iter().cloned())
            .collect();
        keys.extend(extra);
        keys.remove(&self.inner.public_key);
        if keys.len() > MAX_RECIPIENTS {
            return Err(VerificationError::TooManyRecipients(keys.len()).into());
        }
        Ok(keys.into_iter().collect())
    }

    async fn notarize(&self, ctx: &mut Run, transaction: Transaction) -> Result<Transaction, Error> {
        let id = transaction.id();
        let Some(notary) = transaction.notary().cloned() else {
            return Err(VerificationError::MissingNotary.into());
        };
        let mut cancel = ctx.cancel.clone();
        let result = select! {
            _ = wait_cancelled(&mut cancel) => Err(Error::Cancelled),
            result = self.inner.notary.request_signature(&transaction) => result,
        };
        match result {
            Ok(signature) => {
                debug!(run = %ctx.id, %id, "notarized transaction");
                Ok(transaction.with_signature(notary, signature))
            }
            Err(err) if err.is_fatal() || matches!(err, Error::Cancelled) => {
                self.inner.checkpoints.delete(&ctx.id).await?;
                ctx.enter(Stage::Failed);
                warn!(run = %ctx.id, %id, %err, "notarization failed");
                Err(err)
            }
            Err(err) => {
                // The checkpoint remains, so the run resumes by re-issuing the request
                warn!(run = %ctx.id, %id, %err, "notarization suspended");
                Err(err)
            }
        }
    }

    /// Record `transaction` in the ledger (the point of no return) and checkpoint it.
    async fn commit(
        &self,
        ctx: &mut Run,
        transaction: Transaction,
        recipients: Vec<PublicKey>,
    ) -> Result<RunState, Error> {
        if ctx.is_cancelled() {
            self.inner.checkpoints.delete(&ctx.id).await?;
            ctx.enter(Stage::Failed);
            return Err(Error::Cancelled);
        }
        let id = transaction.id();
        self.inner
            .ledger
            .record_transactions(vec![transaction.clone()])
            .await?;
        let state = RunState::Committed {
            transaction,
            recipients,
        };
        self.checkpoint(ctx, &state).await?;
        ctx.enter(Stage::Committed);
        info!(run = %ctx.id, %id, "committed transaction");
        Ok(state)
    }

    async fn broadcast(
        &self,
        ctx: &mut Run,
        transaction: Transaction,
        recipients: Vec<PublicKey>,
        mut acknowledged: Vec<PublicKey>,
        mut round: u32,
    ) -> Result<Finalized, Error> {
        let id = transaction.id();
        let payload = transaction.encode().freeze();
        let mut cancel = ctx.cancel.clone();
        let mut cancelled = false;
        loop {
            let pending: Vec<PublicKey> = recipients
                .iter()
                .filter(|key| !acknowledged.contains(key))
                .cloned()
                .collect();
            if pending.is_empty() || round >= self.inner.broadcast_rounds {
                break;
            }
            if ctx.is_cancelled() {
                cancelled = true;
                break;
            }

            // Record progress before suspending on the network
            let state = RunState::Broadcasting {
                transaction: transaction.clone(),
                recipients: recipients.clone(),
                acknowledged: acknowledged.clone(),
                round,
            };
            self.checkpoint(ctx, &state).await?;
            ctx.enter(Stage::Broadcasting);
            if round > 0 {
                select! {
                    _ = wait_cancelled(&mut cancel) => {
                        cancelled = true;
                        break;
                    },
                    _ = sleep(self.inner.round_delay) => {},
                }
            }

            let mut bridge = self.inner.bridge.clone();
            let mut deliveries = FuturesUnordered::new();
            for key in pending {
                match bridge.send(key.clone(), payload.clone()).await {
                    Ok(delivery) => deliveries.push(async move { (key, delivery.await) }),
                    Err(reliable::Error::Closed) => return Err(reliable::Error::Closed.into()),
                    Err(err) => warn!(run = %ctx.id, %id, peer = %key, %err, "failed to send"),
                }
            }
            let deadline = Instant::now() + self.inner.round_timeout;
            loop {
                select! {
                    _ = wait_cancelled(&mut cancel) => {
                        cancelled = true;
                        break;
                    },
                    _ = sleep_until(deadline) => break,
                    delivery = deliveries.next() => match delivery {
                        Some((key, Ok(()))) => {
                            debug!(run = %ctx.id, %id, peer = %key, "recipient acknowledged");
                            acknowledged.push(key);

                            // A resumed run only re-sends to recipients not yet acknowledged
                            let state = RunState::Broadcasting {
                                transaction: transaction.clone(),
                                recipients: recipients.clone(),
                                acknowledged: acknowledged.clone(),
                                round,
                            };
                            self.checkpoint(ctx, &state).await?;
                        }
                        Some((key, Err(err))) => {
                            debug!(run = %ctx.id, %id, peer = %key, %err, "delivery failed");
                        }
                        None => break,
                    },
                }
            }
            if cancelled {
                break;
            }
            round += 1;
        }

        self.inner.checkpoints.delete(&ctx.id).await?;
        ctx.enter(Stage::Done);
        let unacknowledged: Vec<PublicKey> = recipients
            .iter()
            .filter(|key| !acknowledged.contains(key))
            .cloned()
            .collect();
        if cancelled {
            info!(run = %ctx.id, %id, unacknowledged = unacknowledged.len(), "broadcast cancelled");
        } else if !unacknowledged.is_empty() {
            self.inner.metrics.incomplete.inc();
            warn!(run = %ctx.id, %id, rounds = round, unacknowledged = unacknowledged.len(), "broadcast incomplete");
        } else {
            info!(run = %ctx.id, %id, recipients = recipients.len(), "finalized transaction");
        }
        Ok(Finalized {
            recipients: recipients
                .iter()
                .map(|key| self.inner.identity.recipient(key))
                .collect(),
            transaction,
            unacknowledged,
            cancelled,
        })
    }

    async fn checkpoint(&self, ctx: &mut Run, state: &RunState) -> Result<(), Error> {
        self.inner
            .checkpoints
            .save(&ctx.id, ctx.sequence, state.encode().freeze())
            .await?;
        trace!(run = %ctx.id, sequence = ctx.sequence, stage = ?state.stage(), "checkpointed run");
        ctx.sequence += 1;
        Ok(())
    }
}
