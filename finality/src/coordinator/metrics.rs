use prometheus_client::{
    metrics::{counter::Counter, gauge::Gauge},
    registry::Registry,
};
use ratify_runtime::telemetry::status;

/// Metrics for the [Coordinator](super::Coordinator)
#[derive(Default)]
pub struct Metrics {
    /// Number of finished runs by status
    pub runs: status::Counter,
    /// Number of runs currently being driven
    pub active: Gauge,
    /// Number of runs resumed from a checkpoint
    pub resumed: Counter,
    /// Number of committed runs that completed with unacknowledged recipients
    pub incomplete: Counter,
}

impl Metrics {
    /// Create and return a new set of metrics, registered with the given registry.
    pub fn init(registry: &mut Registry) -> Self {
        let metrics = Metrics::default();
        registry.register(
            "coordinator_runs",
            "Number of finished runs by status",
            metrics.runs.clone(),
        );
        registry.register(
            "coordinator_active",
            "Number of runs currently being driven",
            metrics.active.clone(),
        );
        registry.register(
            "coordinator_resumed",
            "Number of runs resumed from a checkpoint",
            metrics.resumed.clone(),
        );
        registry.register(
            "coordinator_incomplete",
            "Number of committed runs that completed with unacknowledged recipients",
            metrics.incomplete.clone(),
        );
        metrics
    }
}
