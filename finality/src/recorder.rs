//! Record transactions finalized by peers.
//!
//! The [Recorder] consumes the reliable bridge's inbox. Every payload is decoded as a
//! [Transaction], checked for a complete set of valid signatures (including the notary's, from
//! a notary listed in the network parameters), and recorded in the local ledger. A delivery is
//! acknowledged to its origin only once it is recorded (or found invalid), so a ledger failure
//! leaves the transaction with the sender to replay. The bridge applies each delivery at most
//! once and the ledger is idempotent, so redelivery after a restart is harmless.

use crate::{
    ledger::Ledger,
    types::{Limits, Transaction},
    Error, VerificationError,
};
use bytes::Bytes;
use futures::StreamExt;
use prometheus_client::registry::Registry;
use ratify_bridge::reliable::Inbox;
use ratify_codec::Decode as _;
use ratify_cryptography::{ed25519::PublicKey, sha256::Digest};
use ratify_runtime::telemetry::status::{self, CounterExt, Status};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Configuration for [Recorder].
pub struct Config<L: Ledger> {
    /// Where received transactions are recorded.
    pub ledger: L,

    /// Notaries listed in the active network parameters.
    pub notaries: Vec<PublicKey>,

    /// Bounds applied when decoding received transactions.
    pub limits: Limits,

    /// Registry for metrics.
    pub registry: Arc<Mutex<Registry>>,
}

/// Records transactions received over the bridge.
pub struct Recorder<L: Ledger> {
    ledger: L,
    notaries: Vec<PublicKey>,
    limits: Limits,

    received: status::Counter,
}

impl<L: Ledger> Recorder<L> {
    pub fn new(cfg: Config<L>) -> Self {
        let received = status::Counter::default();
        {
            let mut registry = cfg.registry.lock().unwrap_or_else(|e| e.into_inner());
            registry.register(
                "recorder_received",
                "Received transactions by status",
                received.clone(),
            );
        }
        Self {
            ledger: cfg.ledger,
            notaries: cfg.notaries,
            limits: cfg.limits,
            received,
        }
    }

    /// Record everything delivered to `inbox` until the bridge shuts down.
    pub fn start(self, inbox: Inbox) -> JoinHandle<()> {
        tokio::spawn(self.run(inbox))
    }

    async fn run(self, mut inbox: Inbox) {
        while let Some((origin, envelope, acknowledgement)) = inbox.next().await {
            match self.record(&origin, envelope.payload).await {
                Ok(id) => {
                    self.received.inc(Status::Success);
                    info!(%id, %origin, "recorded transaction");
                    acknowledgement.acknowledge();
                }
                Err(err @ (Error::Codec(_) | Error::Verification(_))) => {
                    // Replaying an invalid transaction cannot make it valid
                    self.received.inc(Status::Invalid);
                    warn!(%origin, %err, "dropping invalid transaction");
                    acknowledgement.acknowledge();
                }
                Err(err) => {
                    // Refused: the origin keeps it and replays later
                    self.received.inc(Status::Failure);
                    error!(%origin, %err, "failed to record transaction");
                }
            }
        }
        debug!("inbox closed");
    }

    /// Verify and record the transaction encoded in `payload`.
    pub async fn record(&self, origin: &PublicKey, payload: Bytes) -> Result<Digest, Error> {
        let transaction = Transaction::decode_cfg(payload, &self.limits)?;
        let id = transaction.id();
        transaction.verify_required_signatures()?;
        if transaction.needs_notarization() {
            let notary = transaction
                .notary()
                .ok_or(VerificationError::MissingNotary)?;
            if !self.notaries.contains(notary) {
                return Err(VerificationError::UnknownNotary(notary.clone()).into());
            }
        }
        debug!(%id, %origin, "verified received transaction");
        self.ledger.record_transactions(vec![transaction]).await?;
        Ok(id)
    }
}
