//! Verify, notarize, commit, and disseminate transactions, resuming after any crash.
//!
//! # Overview
//!
//! A [coordinator::Coordinator] drives a [Transaction] from "received, unverified" to "committed
//! and broadcast":
//!
//! 1. Verify every non-notary signature, resolve every input against the local [ledger::Ledger],
//!    and run the pluggable [coordinator::Validator].
//! 2. Resolve the keys of every input and output participant through an
//!    [identity::IdentityResolver] (unresolvable keys remain anonymous recipients).
//! 3. If the transaction consumes inputs or is time-bound and lacks the notary's signature,
//!    checkpoint and request one with a [notary::Client].
//! 4. Record the transaction in the local ledger and checkpoint `Committed`. This is the commit
//!    point: nothing after it can fail the run.
//! 5. Send the finalized transaction to every remote recipient over the reliable bridge,
//!    checkpointing acknowledged recipients so a resumed run only re-sends to the rest.
//! 6. Delete the checkpoint.
//!
//! Every suspension point (the notary request and each broadcast round) is preceded by a
//! checkpoint write, so a run interrupted anywhere resumes from [coordinator::Coordinator::resume_all]
//! and reaches the same terminal state an uninterrupted run would have.
//!
//! On the receiving side, a [recorder::Recorder] consumes the bridge inbox, verifies each
//! transaction (including the notary's signature), and records it idempotently.
//!
//! The notary identities and size limits all nodes agree on are read from signed
//! [parameters::NetworkParameters], resolved against a [parameters::Directory] at startup.

pub mod coordinator;
pub mod identity;
pub mod ledger;
#[cfg(any(test, feature = "mocks"))]
pub mod mocks;
pub mod notary;
pub mod parameters;
pub mod recorder;
pub mod types;

pub use types::{Transaction, TRANSACTION_NAMESPACE};

use ratify_cryptography::{ed25519::PublicKey, sha256::Digest};
use thiserror::Error;
use types::StateRef;

/// Why a transaction failed verification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerificationError {
    #[error("invalid signature from {0}")]
    InvalidSignature(PublicKey),
    #[error("missing signatures from {0:?}")]
    MissingSignatures(Vec<PublicKey>),
    #[error("transaction requires notarization but names no notary")]
    MissingNotary,
    #[error("notary {0} is not listed in the network parameters")]
    UnknownNotary(PublicKey),
    #[error("input {0} does not resolve to a recorded transaction")]
    UnresolvedInput(StateRef),
    #[error("transaction too large: {0} bytes")]
    TooLarge(usize),
    #[error("too many recipients: {0}")]
    TooManyRecipients(usize),
    #[error("rejected by validator: {0}")]
    Invalid(String),
}

/// Errors that can occur while finalizing or recording a transaction.
#[derive(Debug, Error)]
pub enum Error {
    #[error("verification failed: {0}")]
    Verification(#[from] VerificationError),
    #[error("notary rejected transaction: {0}")]
    Rejected(notary::Rejection),
    #[error("notary unavailable after {0} attempts")]
    Unavailable(u32),
    #[error("notary signature does not verify")]
    InvalidResponse,
    #[error("no network parameters available")]
    NoParametersAvailable,
    #[error("network parameters mismatch: active={active} advertised={advertised}")]
    ParametersMismatch { active: Digest, advertised: Digest },
    #[error("network parameters signature does not verify")]
    InvalidParametersSignature,
    #[error("stale network parameters update: active epoch={active} update epoch={update}")]
    StaleParametersUpdate { active: u64, update: u64 },
    #[error("storage error: {0}")]
    Storage(#[from] ratify_storage::Error),
    #[error("codec error: {0}")]
    Codec(#[from] ratify_codec::Error),
    #[error("bridge error: {0}")]
    Bridge(#[from] ratify_bridge::reliable::Error),
    #[error("run cancelled")]
    Cancelled,
}

impl Error {
    /// Returns whether retrying the operation cannot succeed.
    ///
    /// Fatal errors end a run as failed. Everything else (an unavailable notary, storage or
    /// transport trouble, cancellation) leaves the run resumable.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Verification(_)
                | Error::Rejected(_)
                | Error::InvalidResponse
                | Error::InvalidParametersSignature
                | Error::ParametersMismatch { .. }
                | Error::StaleParametersUpdate { .. }
                | Error::Codec(_)
        )
    }
}
