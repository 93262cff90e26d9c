use super::{Fault, Notary, Request};
use crate::{types::TRANSACTION_NAMESPACE, Error, Transaction, VerificationError};
use prometheus_client::registry::Registry;
use ratify_cryptography::{
    ed25519::{PublicKey, Signature},
    Verifier as _,
};
use ratify_runtime::telemetry::status::{self, CounterExt, Status};
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

/// Configuration for [Client].
#[derive(Clone)]
pub struct Config {
    /// How long a single attempt may take.
    pub timeout: Duration,

    /// Maximum number of attempts before giving up with [Error::Unavailable].
    pub max_attempts: u32,

    /// Delay before the first retry (doubling after every failed attempt).
    pub backoff: Duration,

    /// Largest delay between attempts.
    pub max_backoff: Duration,

    /// Registry for metrics.
    pub registry: Arc<Mutex<Registry>>,
}

/// Requests notarization with bounded, backed-off retries.
#[derive(Clone)]
pub struct Client<N: Notary> {
    notary: N,
    timeout: Duration,
    max_attempts: u32,
    backoff: Duration,
    max_backoff: Duration,

    attempts: status::Counter,
}

impl<N: Notary> Client<N> {
    pub fn new(notary: N, cfg: Config) -> Self {
        let attempts = status::Counter::default();
        {
            let mut registry = cfg.registry.lock().unwrap_or_else(|e| e.into_inner());
            registry.register(
                "notary_attempts",
                "Notarization attempts by status",
                attempts.clone(),
            );
        }
        Self {
            notary,
            timeout: cfg.timeout,
            max_attempts: cfg.max_attempts.max(1),
            backoff: cfg.backoff,
            max_backoff: cfg.max_backoff,
            attempts,
        }
    }

    /// The key of the notary this client talks to.
    pub fn notary_key(&self) -> PublicKey {
        self.notary.public_key()
    }

    /// Obtain the notary's signature over `transaction`.
    ///
    /// Rejections and signatures that do not verify against the transaction's notary are
    /// returned immediately. Timeouts and unreachable notaries are retried until the attempts
    /// are exhausted, then surfaced as [Error::Unavailable].
    pub async fn request_signature(&self, transaction: &Transaction) -> Result<Signature, Error> {
        let id = transaction.id();
        let Some(notary) = transaction.notary() else {
            return Err(VerificationError::MissingNotary.into());
        };
        let request = Request::new(
            id,
            transaction.inputs().to_vec(),
            transaction.time_window().copied(),
        );

        let mut delay = self.backoff;
        for attempt in 1..=self.max_attempts {
            match timeout(self.timeout, self.notary.notarize(request.clone())).await {
                Ok(Ok(signature)) => return self.verify(notary, &id, signature, attempt),
                Ok(Err(Fault::Rejected(rejection))) => {
                    self.attempts.inc(Status::Failure);
                    info!(%id, %rejection, "notary rejected transaction");
                    return Err(Error::Rejected(rejection));
                }
                Ok(Err(Fault::Unreachable)) => {
                    self.attempts.inc(Status::Dropped);
                    debug!(%id, attempt, "notary unreachable");
                }
                Err(_) => {
                    self.attempts.inc(Status::Dropped);
                    debug!(%id, attempt, "notary timed out");
                }
            }
            if attempt < self.max_attempts {
                sleep(delay).await;
                delay = delay.saturating_mul(2).min(self.max_backoff);
            }
        }
        warn!(%id, attempts = self.max_attempts, "notary unavailable");
        Err(Error::Unavailable(self.max_attempts))
    }

    fn verify(
        &self,
        notary: &PublicKey,
        id: &ratify_cryptography::sha256::Digest,
        signature: Signature,
        attempt: u32,
    ) -> Result<Signature, Error> {
        if !notary.verify(Some(TRANSACTION_NAMESPACE), id.as_ref(), &signature) {
            self.attempts.inc(Status::Invalid);
            warn!(%id, %notary, "notary signature does not verify");
            return Err(Error::InvalidResponse);
        }
        self.attempts.inc(Status::Success);
        debug!(%id, attempt, "notarized");
        Ok(signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        mocks,
        notary::Rejection,
        types::{State, StateRef, TimeWindow},
    };
    use bytes::Bytes;
    use ratify_cryptography::{ed25519::PrivateKey, hash, Signer as _};
    use ratify_macros::test_traced;

    fn config() -> Config {
        Config {
            timeout: Duration::from_secs(1),
            max_attempts: 3,
            backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(1),
            registry: Arc::new(Mutex::new(Registry::default())),
        }
    }

    fn spend(notary: &PublicKey, input: &[u8], output: &[u8]) -> Transaction {
        Transaction::new(
            vec![StateRef {
                txid: hash(input),
                index: 0,
            }],
            vec![State {
                participants: vec![],
                data: Bytes::copy_from_slice(output),
            }],
            Some(notary.clone()),
            None,
            vec![],
        )
    }

    #[test_traced]
    async fn test_retries_then_succeeds() {
        let notary = mocks::Notary::new(PrivateKey::from_seed(0));
        notary.fail_next(2);
        let client = Client::new(notary.clone(), config());
        let tx = spend(&notary.public_key(), b"input", b"a");
        let signature = client.request_signature(&tx).await.unwrap();
        assert!(tx
            .with_signature(notary.public_key(), signature)
            .is_notary_complete());
        assert_eq!(notary.requests(), 3);
    }

    #[test_traced]
    async fn test_unavailable_after_attempts() {
        let notary = mocks::Notary::new(PrivateKey::from_seed(0));
        notary.fail_next(10);
        let client = Client::new(notary.clone(), config());
        let tx = spend(&notary.public_key(), b"input", b"a");
        let result = client.request_signature(&tx).await;
        assert!(matches!(result, Err(Error::Unavailable(3))));
        assert!(!result.unwrap_err().is_fatal());
    }

    #[test_traced]
    async fn test_timeout_retried() {
        let notary = mocks::Notary::new(PrivateKey::from_seed(0));
        notary.stall_next(1, Duration::from_secs(10));
        let client = Client::new(notary.clone(), config());
        let tx = spend(&notary.public_key(), b"input", b"a");
        client.request_signature(&tx).await.unwrap();
        assert_eq!(notary.requests(), 2);
    }

    #[test_traced]
    async fn test_rejected_not_retried() {
        let notary = mocks::Notary::new(PrivateKey::from_seed(0));
        let client = Client::new(notary.clone(), config());
        let first = spend(&notary.public_key(), b"input", b"a");
        let second = spend(&notary.public_key(), b"input", b"b");
        client.request_signature(&first).await.unwrap();

        let result = client.request_signature(&second).await;
        match result {
            Err(Error::Rejected(Rejection::Conflict { consumer, .. })) => {
                assert_eq!(consumer, first.id())
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(notary.requests(), 2);
    }

    #[test_traced]
    async fn test_time_window_enforced() {
        let notary = mocks::Notary::new(PrivateKey::from_seed(0));
        notary.set_time(Some(50));
        let client = Client::new(notary.clone(), config());
        let tx = Transaction::new(
            vec![],
            vec![],
            Some(notary.public_key()),
            TimeWindow::new(Some(100), None),
            vec![],
        );
        let result = client.request_signature(&tx).await;
        assert!(matches!(
            result,
            Err(Error::Rejected(Rejection::OutsideTimeWindow { now: 50 }))
        ));
        notary.set_time(Some(150));
        client.request_signature(&tx).await.unwrap();
    }

    #[test_traced]
    async fn test_invalid_response() {
        let notary = mocks::Notary::new(PrivateKey::from_seed(0));
        notary.corrupt(true);
        let client = Client::new(notary.clone(), config());
        let tx = spend(&notary.public_key(), b"input", b"a");
        let result = client.request_signature(&tx).await;
        assert!(matches!(result, Err(Error::InvalidResponse)));
        assert!(result.unwrap_err().is_fatal());
    }

    #[test_traced]
    async fn test_idempotent_request() {
        let notary = mocks::Notary::new(PrivateKey::from_seed(0));
        let client = Client::new(notary.clone(), config());
        let tx = spend(&notary.public_key(), b"input", b"a");
        let first = client.request_signature(&tx).await.unwrap();
        let second = client.request_signature(&tx).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(notary.notarized(), 1);
    }
}
