//! Deliver payloads at-least-once (and apply them at-most-once) over an unreliable transport.
//!
//! The transport is abstracted by [Sender] and [Receiver]: point-to-point, unordered delivery of
//! opaque bytes between peers identified by [PublicKey]. [simulated] provides a lossy, delayed
//! implementation for tests and demos. [reliable] layers sequencing, acknowledgements, replay,
//! and deduplication on top of any transport.

use bytes::Bytes;
use ratify_cryptography::ed25519::PublicKey;
use std::{error::Error as StdError, fmt::Debug, future::Future};

pub mod reliable;
pub mod simulated;

/// Tuple representing a message received from a given public key.
///
/// This message is guaranteed to adhere to the configuration of the channel and
/// will already be decrypted and authenticated.
pub type Message = (PublicKey, Bytes);

/// Interface for sending messages to a single recipient.
pub trait Sender: Clone + Debug + Send + Sync + 'static {
    /// Error that can occur when sending a message.
    type Error: Debug + StdError + Send + Sync;

    /// Send a message to `recipient`.
    ///
    /// Returns whether the message was handed to the transport (it may still be dropped in
    /// flight).
    fn send(
        &mut self,
        recipient: PublicKey,
        message: Bytes,
    ) -> impl Future<Output = Result<bool, Self::Error>> + Send;
}

/// Interface for receiving messages from arbitrary senders.
pub trait Receiver: Debug + Send + 'static {
    /// Error that can occur when receiving a message.
    type Error: Debug + StdError + Send + Sync;

    /// Receive a message from an arbitrary sender.
    fn recv(&mut self) -> impl Future<Output = Result<Message, Self::Error>> + Send;
}
