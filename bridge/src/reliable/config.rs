use prometheus_client::registry::Registry;
use ratify_cryptography::ed25519::PublicKey;
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

/// Configuration for the [Engine](super::Engine).
#[derive(Clone)]
pub struct Config {
    /// The public key of the participant.
    pub public_key: PublicKey,

    /// Registry for bridge metrics.
    pub registry: Arc<Mutex<Registry>>,

    /// The maximum size of the mailbox backlog.
    pub mailbox_size: usize,

    /// The maximum number of received envelopes waiting for the application. A full inbox
    /// nacks new envelopes.
    pub inbox_size: usize,

    /// The maximum number of unacknowledged envelopes in flight per destination.
    pub window_size: usize,

    /// The maximum number of times an envelope is handed to the transport before its delivery
    /// fails.
    pub max_attempts: u32,

    /// How long to wait for an acknowledgement before replaying a destination's window.
    pub ack_timeout: Duration,

    /// How long a destination stalls after a nack.
    pub retry_delay: Duration,

    /// The number of recently applied delivery ids remembered per origin.
    pub dedup_capacity: usize,

    /// The number of acknowledged envelopes replayed to a new subscriber.
    pub history_size: usize,

    /// The maximum payload size accepted from the application and from peers.
    pub max_payload_size: usize,
}
