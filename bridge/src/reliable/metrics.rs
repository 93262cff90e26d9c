use prometheus_client::{
    metrics::{counter::Counter, gauge::Gauge},
    registry::Registry,
};
use ratify_runtime::telemetry::status;

/// Metrics for the [Engine](super::Engine)
#[derive(Default)]
pub struct Metrics {
    /// Number of data frames handed to the transport
    pub sent: Counter,
    /// Number of envelopes acknowledged by their destination
    pub acked: Counter,
    /// Number of deliveries abandoned after exhausting their attempts
    pub failed: Counter,
    /// Number of nacks received
    pub nacked: Counter,
    /// Number of window replays (after a nack or an ack timeout)
    pub replayed: Counter,
    /// Number of received envelopes that were already applied
    pub duplicate: Counter,
    /// Number of received envelopes by status
    pub receive: status::Counter,
    /// Number of destinations with deliveries outstanding
    pub destinations: Gauge,
}

impl Metrics {
    /// Create and return a new set of metrics, registered with the given registry.
    pub fn init(registry: &mut Registry) -> Self {
        let metrics = Metrics::default();
        registry.register(
            "bridge_sent",
            "Number of data frames handed to the transport",
            metrics.sent.clone(),
        );
        registry.register(
            "bridge_acked",
            "Number of envelopes acknowledged by their destination",
            metrics.acked.clone(),
        );
        registry.register(
            "bridge_failed",
            "Number of deliveries abandoned after exhausting their attempts",
            metrics.failed.clone(),
        );
        registry.register(
            "bridge_nacked",
            "Number of nacks received",
            metrics.nacked.clone(),
        );
        registry.register(
            "bridge_replayed",
            "Number of window replays",
            metrics.replayed.clone(),
        );
        registry.register(
            "bridge_duplicate",
            "Number of received envelopes that were already applied",
            metrics.duplicate.clone(),
        );
        registry.register(
            "bridge_receive",
            "Number of received envelopes by status",
            metrics.receive.clone(),
        );
        registry.register(
            "bridge_destinations",
            "Number of destinations with deliveries outstanding",
            metrics.destinations.clone(),
        );
        metrics
    }
}
