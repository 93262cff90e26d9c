use super::Validator;
use crate::{
    identity::IdentityResolver,
    ledger::Ledger,
    notary::{self, Notary},
    types::Limits,
};
use prometheus_client::registry::Registry;
use ratify_bridge::reliable::Mailbox;
use ratify_cryptography::ed25519::PublicKey;
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

/// Configuration for the [Coordinator](super::Coordinator).
pub struct Config<L: Ledger, I: IdentityResolver, N: Notary, V: Validator> {
    /// The public key of the local node (never a broadcast recipient).
    pub public_key: PublicKey,

    /// Local record of committed transactions, also used to resolve inputs.
    pub ledger: L,

    /// Resolves participant keys to well-known identities.
    pub identity: I,

    /// Client of the notary transactions are notarized by.
    pub notary: notary::Client<N>,

    /// Domain validation applied after signatures and inputs are checked.
    pub validator: V,

    /// Mailbox of the reliable bridge finalized transactions are broadcast over.
    pub bridge: Mailbox,

    /// Notaries listed in the active network parameters.
    pub notaries: Vec<PublicKey>,

    /// The [Storage](ratify_runtime::Storage) partition holding run checkpoints.
    pub partition: String,

    /// Bounds applied when decoding checkpointed transactions.
    pub limits: Limits,

    /// Largest encoded transaction accepted for finalization.
    pub max_transaction_size: usize,

    /// Broadcast rounds attempted before a run completes with unacknowledged recipients.
    pub broadcast_rounds: u32,

    /// How long a broadcast round waits for acknowledgements.
    pub round_timeout: Duration,

    /// Pause between broadcast rounds.
    pub round_delay: Duration,

    /// Registry for metrics.
    pub registry: Arc<Mutex<Registry>>,
}
