use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Quality of every simulated link.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct LinkConfig {
    /// Mean latency (milliseconds).
    pub latency_mean: f64,
    /// Latency standard deviation (milliseconds).
    pub latency_stddev: f64,
    /// Probability a message is delivered.
    pub success_rate: f64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            latency_mean: 50.0,
            latency_stddev: 20.0,
            success_rate: 0.9,
        }
    }
}

/// Configuration of a simulation run, loaded from YAML.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Directory holding each participant's ledger, checkpoints, and parameters.
    pub storage_directory: PathBuf,

    /// One of `TRACE`, `DEBUG`, `INFO`, `WARN`, or `ERROR`.
    pub log_level: String,
    pub json_logs: bool,

    /// Number of participants (the first finalizes transactions).
    pub participants: u64,

    /// Number of issue-then-spend pairs to finalize.
    pub transactions: usize,

    /// Seed of the simulated network.
    pub seed: u64,

    pub link: LinkConfig,

    /// Bridge in-flight window per destination.
    pub window_size: usize,

    /// Bridge transmission attempts per envelope.
    pub max_attempts: u32,

    /// Notary requests attempted per transaction.
    pub notary_attempts: u32,

    /// Requests the notary drops before answering.
    pub notary_failures: u32,

    /// Broadcast rounds per transaction.
    pub broadcast_rounds: u32,

    /// How long a broadcast round waits for acknowledgements (milliseconds).
    pub round_timeout_ms: u64,

    /// Print collected metrics on exit.
    pub print_metrics: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            storage_directory: PathBuf::from("/tmp/ratify"),
            log_level: "INFO".into(),
            json_logs: false,
            participants: 4,
            transactions: 8,
            seed: 0,
            link: LinkConfig::default(),
            window_size: 16,
            max_attempts: 20,
            notary_attempts: 5,
            notary_failures: 0,
            broadcast_rounds: 3,
            round_timeout_ms: 10_000,
            print_metrics: false,
        }
    }
}

impl NodeConfig {
    pub fn round_timeout(&self) -> Duration {
        Duration::from_millis(self.round_timeout_ms)
    }
}
