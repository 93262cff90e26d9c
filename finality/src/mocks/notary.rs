use crate::{
    notary::{self, Fault, Rejection, Request},
    types::StateRef,
    TRANSACTION_NAMESPACE,
};
use ratify_cryptography::{
    ed25519::{PrivateKey, PublicKey, Signature},
    sha256::Digest,
    Signer as _,
};
use ratify_utils::SystemTimeExt;
use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
    time::{Duration, SystemTime},
};
use tokio::time::sleep;
use tracing::debug;

#[derive(Default)]
struct State {
    consumed: HashMap<StateRef, Digest>,
    notarized: HashSet<Digest>,

    unreachable: u32,
    stalls: u32,
    stall: Duration,
    now: Option<u64>,
    corrupt: bool,

    requests: usize,
}

/// A single-replica notary that tracks consumed inputs in memory.
///
/// Re-notarizing a transaction it already signed succeeds (and returns the same signature),
/// so retried requests are safe.
#[derive(Clone)]
pub struct Notary {
    signer: PrivateKey,
    state: Arc<Mutex<State>>,
}

impl Notary {
    pub fn new(signer: PrivateKey) -> Self {
        Self {
            signer,
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    /// Answer the next `n` requests with [Fault::Unreachable].
    pub fn fail_next(&self, n: u32) {
        self.lock().unreachable = n;
    }

    /// Delay the next `n` requests by `delay` before answering.
    pub fn stall_next(&self, n: u32, delay: Duration) {
        let mut state = self.lock();
        state.stalls = n;
        state.stall = delay;
    }

    /// Fix the notary's clock (milliseconds since the epoch), or follow the system clock.
    pub fn set_time(&self, now: Option<u64>) {
        self.lock().now = now;
    }

    /// Sign with the wrong namespace, producing signatures that do not verify.
    pub fn corrupt(&self, corrupt: bool) {
        self.lock().corrupt = corrupt;
    }

    /// Number of requests received.
    pub fn requests(&self) -> usize {
        self.lock().requests
    }

    /// Number of distinct transactions signed.
    pub fn notarized(&self) -> usize {
        self.lock().notarized.len()
    }

    /// The transaction that consumed `input`, if any.
    pub fn consumer(&self, input: &StateRef) -> Option<Digest> {
        self.lock().consumed.get(input).copied()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn decide(&self, request: &Request) -> Result<Signature, Fault> {
        let mut state = self.lock();
        let now = state.now.unwrap_or_else(|| SystemTime::now().epoch_millis());
        if let Some(window) = &request.time_window {
            if !window.contains(now) {
                return Err(Fault::Rejected(Rejection::OutsideTimeWindow { now }));
            }
        }
        for input in &request.inputs {
            if let Some(consumer) = state.consumed.get(input) {
                if *consumer != request.transaction {
                    return Err(Fault::Rejected(Rejection::Conflict {
                        input: *input,
                        consumer: *consumer,
                    }));
                }
            }
        }
        for input in &request.inputs {
            state.consumed.insert(*input, request.transaction);
        }
        state.notarized.insert(request.transaction);
        let namespace: &[u8] = if state.corrupt {
            b"_CORRUPT"
        } else {
            TRANSACTION_NAMESPACE
        };
        Ok(self
            .signer
            .sign(Some(namespace), request.transaction.as_ref()))
    }
}

impl notary::Notary for Notary {
    fn public_key(&self) -> PublicKey {
        self.signer.public_key()
    }

    async fn notarize(&self, request: Request) -> Result<Signature, Fault> {
        let stall = {
            let mut state = self.lock();
            state.requests += 1;
            if state.unreachable > 0 {
                state.unreachable -= 1;
                debug!(id = %request.transaction, "dropping notarization request");
                return Err(Fault::Unreachable);
            }
            if state.stalls > 0 {
                state.stalls -= 1;
                Some(state.stall)
            } else {
                None
            }
        };
        if let Some(delay) = stall {
            sleep(delay).await;
        }
        self.decide(&request)
    }
}
