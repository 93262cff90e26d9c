//! Count the outcome of operations with a shared `status` label.

use prometheus_client::{
    encoding::{EncodeLabelSet, EncodeLabelValue},
    metrics::{counter::Counter as Inner, family::Family},
};

/// Outcome of an operation.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum Status {
    /// Completed as intended.
    Success,
    /// Failed and will not be retried.
    Failure,
    /// Abandoned before completion (cancelled, exhausted, or shed).
    Dropped,
    /// Rejected as malformed or unverifiable.
    Invalid,
}

/// Label set wrapping a [Status].
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct Label {
    status: Status,
}

impl Label {
    pub fn new(status: Status) -> Self {
        Self { status }
    }
}

/// Counter family keyed by [Status].
pub type Counter = Family<Label, Inner>;

/// Extension to increment a [Counter] family by [Status].
pub trait CounterExt {
    /// Increment the counter for `status`.
    fn inc(&self, status: Status);

    /// Current value of the counter for `status`.
    fn value(&self, status: Status) -> u64;
}

impl CounterExt for Counter {
    fn inc(&self, status: Status) {
        self.get_or_create(&Label::new(status)).inc();
    }

    fn value(&self, status: Status) -> u64 {
        self.get_or_create(&Label::new(status)).get()
    }
}
