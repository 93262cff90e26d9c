//! Send messages between arbitrary peers with configurable performance (drops and latency).
//!
//! Peers are registered and linked through an [network::Oracle]. Links are unidirectional and
//! deliver in the order messages were handed to them (like a stream connection that may silently
//! lose frames).

mod metrics;
pub mod network;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("message too large: {0}")]
    MessageTooLarge(usize),
    #[error("network closed")]
    NetworkClosed,
    #[error("not valid to link self")]
    LinkingSelf,
    #[error("invalid success rate (must be in [0, 1]): {0}")]
    InvalidSuccessRate(f64),
    #[error("invalid latency (must be finite and non-negative): mean={0} stddev={1}")]
    InvalidLatency(f64, f64),
}

#[cfg(test)]
mod tests {
    use super::{network::*, *};
    use crate::{Receiver as _, Sender as _};
    use bytes::Bytes;
    use prometheus_client::{encoding::text::encode, registry::Registry};
    use ratify_cryptography::{ed25519::PrivateKey, Signer as _};
    use ratify_macros::test_traced;
    use std::sync::{Arc, Mutex};

    fn config(seed: u64) -> Config {
        Config {
            registry: Arc::new(Mutex::new(Registry::default())),
            max_message_size: 1024,
            seed,
        }
    }

    fn reliable() -> Link {
        Link {
            latency_mean: 10.0,
            latency_stddev: 5.0,
            success_rate: 1.0,
        }
    }

    #[test_traced]
    async fn test_delivers_in_link_order() {
        let (network, oracle) = Network::new(config(0));
        network.start();

        let a = PrivateKey::from_seed(0).public_key();
        let b = PrivateKey::from_seed(1).public_key();
        let (mut sender, _) = oracle.register(a.clone());
        let (_, mut receiver) = oracle.register(b.clone());
        oracle.link(a.clone(), b.clone(), reliable()).unwrap();

        for i in 0..100u8 {
            assert!(sender.send(b.clone(), Bytes::from(vec![i])).await.unwrap());
        }
        for i in 0..100u8 {
            let (origin, message) = receiver.recv().await.unwrap();
            assert_eq!(origin, a);
            assert_eq!(message, Bytes::from(vec![i]));
        }
    }

    #[test_traced]
    async fn test_missing_link() {
        let (network, oracle) = Network::new(config(0));
        network.start();

        let a = PrivateKey::from_seed(0).public_key();
        let b = PrivateKey::from_seed(1).public_key();
        let (mut sender, _) = oracle.register(a.clone());
        let _peer = oracle.register(b.clone());

        // Only link in the opposite direction
        oracle.link(b.clone(), a.clone(), reliable()).unwrap();
        assert!(!sender.send(b.clone(), Bytes::from_static(b"hi")).await.unwrap());

        // Unknown recipient
        let c = PrivateKey::from_seed(2).public_key();
        assert!(!sender.send(c, Bytes::from_static(b"hi")).await.unwrap());
    }

    #[test_traced]
    async fn test_unlink_partitions() {
        let (network, oracle) = Network::new(config(0));
        network.start();

        let a = PrivateKey::from_seed(0).public_key();
        let b = PrivateKey::from_seed(1).public_key();
        let (mut sender, _) = oracle.register(a.clone());
        let _peer = oracle.register(b.clone());
        oracle.link(a.clone(), b.clone(), reliable()).unwrap();
        assert!(sender.send(b.clone(), Bytes::from_static(b"hi")).await.unwrap());

        oracle.unlink(&a, &b);
        assert!(!sender.send(b.clone(), Bytes::from_static(b"hi")).await.unwrap());
    }

    #[test_traced]
    async fn test_lossy_link_drops_some() {
        let cfg = config(42);
        let registry = cfg.registry.clone();
        let (network, oracle) = Network::new(cfg);
        network.start();

        let a = PrivateKey::from_seed(0).public_key();
        let b = PrivateKey::from_seed(1).public_key();
        let (mut sender, _) = oracle.register(a.clone());
        let (_, mut receiver) = oracle.register(b.clone());
        oracle
            .link(
                a.clone(),
                b.clone(),
                Link {
                    latency_mean: 1.0,
                    latency_stddev: 0.0,
                    success_rate: 0.5,
                },
            )
            .unwrap();

        // Every message is accepted even though some are dropped in flight
        for i in 0..200u8 {
            assert!(sender.send(b.clone(), Bytes::from(vec![i])).await.unwrap());
        }
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;

        let mut received = 0;
        let mut last = None;
        while let Ok(Some((_, message))) =
            tokio::time::timeout(std::time::Duration::from_millis(10), receiver.recv())
                .await
                .map(Result::ok)
        {
            // Survivors still arrive in order
            if let Some(last) = last {
                assert!(message[0] > last);
            }
            last = Some(message[0]);
            received += 1;
        }
        assert!(received > 0 && received < 200);

        let mut buffer = String::new();
        encode(&mut buffer, &registry.lock().unwrap()).unwrap();
        assert!(buffer.contains("messages_sent_total"));
    }

    #[test_traced]
    async fn test_message_too_large() {
        let (network, oracle) = Network::new(config(0));
        network.start();

        let a = PrivateKey::from_seed(0).public_key();
        let b = PrivateKey::from_seed(1).public_key();
        let (mut sender, _) = oracle.register(a.clone());
        let result = sender.send(b, Bytes::from(vec![0; 2048])).await;
        assert!(matches!(result, Err(Error::MessageTooLarge(2048))));
    }

    #[test]
    fn test_invalid_links() {
        let (_, oracle) = Network::new(config(0));
        let a = PrivateKey::from_seed(0).public_key();
        let b = PrivateKey::from_seed(1).public_key();
        assert!(matches!(
            oracle.link(a.clone(), a.clone(), reliable()),
            Err(Error::LinkingSelf)
        ));
        let mut link = reliable();
        link.success_rate = 1.5;
        assert!(matches!(
            oracle.link(a.clone(), b.clone(), link),
            Err(Error::InvalidSuccessRate(_))
        ));
        let mut link = reliable();
        link.latency_stddev = -1.0;
        assert!(matches!(
            oracle.link(a, b, link),
            Err(Error::InvalidLatency(_, _))
        ));
    }
}
