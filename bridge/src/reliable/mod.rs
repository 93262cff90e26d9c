//! Deliver payloads to peers at-least-once and apply payloads from peers at-most-once.
//!
//! # Design
//!
//! The [Engine] keeps one [outbound] arena per destination and one [inbound] arena per origin.
//!
//! Each delivery is wrapped in an [Envelope] whose [DeliveryId] is derived from the origin, the
//! destination, and the payload (so retries and re-sends after a restart share it), unless the
//! caller names the delivery with [Mailbox::send_with_id]. Envelopes to a destination are
//! numbered within a session and at most `window_size` are in flight. A receiver only accepts the
//! next expected sequence and hands it to the application through the [Inbox] together with an
//! [Acknowledgement]. The origin is acknowledged (cumulatively) only once the application
//! confirms. A missing or refused sequence is nacked and everything after it is ignored until the
//! sender replays from there. Senders stall for `retry_delay` after a nack and replay their window
//! when no acknowledgement arrives within `ack_timeout` (backing off as attempts grow). An
//! envelope that reaches `max_attempts` fails and its successors are renumbered in a new session.
//!
//! Receivers remember the ids they applied recently and acknowledge repeats without handing them
//! to the application again.

use futures::channel::mpsc;
use ratify_cryptography::ed25519::PublicKey;
use thiserror::Error;

mod config;
pub use config::Config;
mod engine;
pub use engine::Engine;
pub mod inbound;
mod ingress;
pub use ingress::{Acknowledged, Acknowledgement, DeliveryHandle, Mailbox, Message};
mod metrics;
pub mod outbound;
mod wire;
pub use wire::{DeliveryId, Envelope, Frame};

/// Envelopes received from peers, applied at most once each (within the dedup window).
///
/// Each envelope must be acknowledged once applied. Dropping its [Acknowledgement] refuses it.
pub type Inbox = mpsc::Receiver<(PublicKey, Envelope, Acknowledgement)>;

/// Errors that can occur when delivering a payload.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("engine closed")]
    Closed,
    #[error("cannot deliver to self")]
    SelfDelivery,
    #[error("payload too large: {0}")]
    PayloadTooLarge(usize),
    #[error("delivery abandoned after {0} attempts")]
    Exhausted(u32),
}
