//! Obtain a notary's signature over a transaction.
//!
//! A [Notary] is any capability that, given a [Request], either signs the transaction id or
//! rejects the request. The [Client] derives a deterministic request id from the transaction id
//! (so a retry against the same or a backup replica is the same logical request), bounds each
//! attempt with a timeout, retries transient failures with exponential backoff, and verifies the
//! returned signature against the notary's key.

mod client;
pub use client::{Client, Config};
mod wire;
pub use wire::{Fault, Rejection, Request};

use ratify_cryptography::ed25519::{PublicKey, Signature};
use std::future::Future;

/// A notary service.
pub trait Notary: Clone + Send + Sync + 'static {
    /// The key the notary signs with.
    fn public_key(&self) -> PublicKey;

    /// Sign the transaction described by `request` (over its id, in the transaction
    /// namespace) or refuse it.
    fn notarize(&self, request: Request) -> impl Future<Output = Result<Signature, Fault>> + Send;
}
