//! The local ledger: every transaction this node has committed or received.

use crate::{
    types::{Limits, Transaction},
    Error,
};
use prometheus_client::{metrics::counter::Counter, registry::Registry};
use ratify_codec::{Decode as _, Encode as _};
use ratify_cryptography::sha256::Digest;
use ratify_runtime::Storage;
use ratify_storage::slot::{self, Slots};
use std::{
    future::Future,
    sync::{Arc, Mutex},
};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, trace};

/// Durable record of transactions.
pub trait Ledger: Clone + Send + Sync + 'static {
    /// Record every transaction. Recording a transaction again (possibly with more signatures)
    /// is idempotent.
    fn record_transactions(
        &self,
        transactions: Vec<Transaction>,
    ) -> impl Future<Output = Result<(), Error>> + Send;

    /// Returns whether a transaction with `id` was recorded.
    fn has_transaction(&self, id: &Digest) -> impl Future<Output = Result<bool, Error>> + Send;

    /// Returns the recorded transaction with `id`, if any.
    fn transaction(
        &self,
        id: &Digest,
    ) -> impl Future<Output = Result<Option<Transaction>, Error>> + Send;
}

/// Configuration for [Store].
#[derive(Clone)]
pub struct Config {
    /// The [Storage] partition holding transactions.
    pub partition: String,

    /// Bounds applied when decoding stored transactions.
    pub limits: Limits,

    /// Largest encoded transaction accepted.
    pub max_transaction_size: usize,

    /// Registry for metrics.
    pub registry: Arc<Mutex<Registry>>,
}

struct Inner<S: Storage> {
    slots: Slots<S>,
    limits: Limits,

    // Serializes read-modify-write of records.
    writer: AsyncMutex<()>,

    recorded: Counter,
    merged: Counter,
}

/// [Ledger] backed by crash-safe [Slots] keyed by transaction id.
///
/// Recording a transaction that is already present merges its signatures into the stored copy.
#[derive(Clone)]
pub struct Store<S: Storage> {
    inner: Arc<Inner<S>>,
}

impl<S: Storage> Store<S> {
    pub fn new(storage: S, cfg: Config) -> Self {
        let recorded = Counter::default();
        let merged = Counter::default();
        {
            let mut registry = cfg.registry.lock().unwrap_or_else(|e| e.into_inner());
            registry.register(
                "ledger_recorded",
                "Transactions recorded for the first time",
                recorded.clone(),
            );
            registry.register(
                "ledger_merged",
                "Recorded transactions updated with new signatures",
                merged.clone(),
            );
        }
        Self {
            inner: Arc::new(Inner {
                slots: Slots::new(
                    storage,
                    slot::Config {
                        partition: cfg.partition,
                        max_value_size: cfg.max_transaction_size,
                    },
                ),
                limits: cfg.limits,
                writer: AsyncMutex::new(()),
                recorded,
                merged,
            }),
        }
    }

    async fn load(&self, id: &Digest) -> Result<Option<(u64, Transaction)>, Error> {
        let Some((version, raw)) = self.inner.slots.get(id.as_ref()).await? else {
            return Ok(None);
        };
        let transaction = Transaction::decode_cfg(raw.as_slice(), &self.inner.limits)?;
        Ok(Some((version, transaction)))
    }
}

impl<S: Storage> Ledger for Store<S> {
    async fn record_transactions(&self, transactions: Vec<Transaction>) -> Result<(), Error> {
        let _guard = self.inner.writer.lock().await;
        for transaction in transactions {
            let id = transaction.id();
            let (version, stored) = match self.load(&id).await? {
                Some((version, existing)) => {
                    let merged = existing.merge_signatures(&transaction);
                    if merged == existing {
                        trace!(%id, "transaction already recorded");
                        continue;
                    }
                    self.inner.merged.inc();
                    (version + 1, merged)
                }
                None => {
                    self.inner.recorded.inc();
                    (0, transaction)
                }
            };
            self.inner
                .slots
                .put(id.as_ref(), version, &stored.encode())
                .await?;
            debug!(%id, version, signatures = stored.signatures().len(), "recorded transaction");
        }
        Ok(())
    }

    async fn has_transaction(&self, id: &Digest) -> Result<bool, Error> {
        Ok(self.inner.slots.version(id.as_ref()).await?.is_some())
    }

    async fn transaction(&self, id: &Digest) -> Result<Option<Transaction>, Error> {
        Ok(self.load(id).await?.map(|(_, transaction)| transaction))
    }
}
