//! Utilities for collecting and reporting telemetry data.

use tracing::Level;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, util::TryInitError, EnvFilter,
};

pub mod status;

/// Install the process-wide `tracing` subscriber.
///
/// Events at `level` and above are written to stdout, as JSON when `json` is set. Returns an
/// error if a global subscriber was already installed.
pub fn init(level: Level, json: bool) -> Result<(), TryInitError> {
    let filter = EnvFilter::new(level.to_string());
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_line_number(true)
                    .with_thread_ids(true)
                    .with_file(true),
            )
            .try_init()
    } else {
        registry.with(fmt::layer().with_line_number(true)).try_init()
    }
}
