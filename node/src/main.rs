//! Finalize transactions across a simulated network of participants.
//!
//! Every participant runs a ledger, a reliable bridge over a lossy simulated network, and a
//! recorder for transactions finalized by others. The first participant issues assets to the
//! others and then moves each one (which requires the notary), driving every transaction through
//! the finality coordinator.
//!
//! All state is persisted below `storage_directory`. Interrupting the process and starting it
//! again resumes every incomplete run before finalizing anything new.
//!
//! # Usage
//!
//! ```sh
//! cargo run --release --bin ratify-node -- --config node.yaml
//! ```
//!
//! ```yaml
//! storage_directory: /tmp/ratify
//! participants: 4
//! transactions: 8
//! link:
//!   latency_mean: 50.0
//!   latency_stddev: 20.0
//!   success_rate: 0.8
//! notary_failures: 2
//! ```

mod config;
mod simulation;

use clap::{Arg, Command};
use config::NodeConfig;
use std::str::FromStr;
use tracing::{error, info, Level};

fn main() {
    // Parse arguments
    let matches = Command::new("ratify-node")
        .about("finalize transactions across a simulated network of participants")
        .arg(
            Arg::new("config")
                .long("config")
                .required(false)
                .help("Path to a YAML configuration file"),
        )
        .get_matches();

    // Load config
    let config = match matches.get_one::<String>("config") {
        Some(path) => {
            let file = std::fs::read_to_string(path).expect("Could not read config file");
            serde_yaml::from_str::<NodeConfig>(&file).expect("Could not parse config file")
        }
        None => NodeConfig::default(),
    };

    // Create logger
    let level = Level::from_str(&config.log_level).expect("Invalid log level");
    ratify_runtime::telemetry::init(level, config.json_logs).expect("Could not install logger");
    info!(
        participants = config.participants,
        transactions = config.transactions,
        storage = %config.storage_directory.display(),
        "starting simulation"
    );

    // Run
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("Could not start runtime");
    if let Err(err) = runtime.block_on(simulation::run(config)) {
        error!(%err, "simulation failed");
        std::process::exit(1);
    }
}
