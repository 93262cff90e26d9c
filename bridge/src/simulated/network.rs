//! Implementation of a `simulated` network.

use super::{metrics, Error};
use crate::Message;
use bytes::Bytes;
use futures::{
    channel::{mpsc, oneshot},
    StreamExt,
};
use prometheus_client::{
    metrics::{counter::Counter, family::Family},
    registry::Registry,
};
use rand::{rngs::StdRng, Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use ratify_cryptography::ed25519::PublicKey;
use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::{
    task::JoinHandle,
    time::{sleep_until, Instant},
};
use tracing::{debug, error};

type Task = (PublicKey, PublicKey, Bytes, oneshot::Sender<bool>);

/// Messages queued on a link, with the instant each should arrive.
type Transmission = (Instant, PublicKey, Bytes);

/// Describes a connection between two peers.
///
/// Links are unidirectional (and must be set up in both directions
/// for a bidirectional connection).
#[derive(Clone, Debug)]
pub struct Link {
    /// Mean latency for the delivery of a message in milliseconds.
    pub latency_mean: f64,

    /// Standard deviation of the latency for the delivery of a message in milliseconds.
    pub latency_stddev: f64,

    /// Probability of a message being delivered successfully (in range [0,1]).
    pub success_rate: f64,
}

/// Configuration for a `simulated` network.
pub struct Config {
    pub registry: Arc<Mutex<Registry>>,

    /// Largest message a [Sender] will accept.
    pub max_message_size: usize,

    /// Seed for the link failure and latency samples.
    pub seed: u64,
}

#[derive(Default)]
struct State {
    agents: BTreeMap<PublicKey, mpsc::UnboundedSender<Message>>,
    links: HashMap<(PublicKey, PublicKey), Link>,
}

/// Implementation of a `simulated` network.
pub struct Network {
    rng: StdRng,
    receiver: mpsc::UnboundedReceiver<Task>,
    state: Arc<Mutex<State>>,
    queues: HashMap<(PublicKey, PublicKey), LinkQueue>,

    received_messages: Family<metrics::Message, Counter>,
    sent_messages: Family<metrics::Message, Counter>,
}

struct LinkQueue {
    agent: mpsc::UnboundedSender<Message>,
    transmissions: mpsc::UnboundedSender<Transmission>,
}

/// Registers peers and manages links of a running [Network].
#[derive(Clone)]
pub struct Oracle {
    max_message_size: usize,
    sender: mpsc::UnboundedSender<Task>,
    state: Arc<Mutex<State>>,
}

impl Network {
    /// Create a new simulated network and the [Oracle] that configures it.
    pub fn new(cfg: Config) -> (Self, Oracle) {
        let (sender, receiver) = mpsc::unbounded();
        let state = Arc::new(Mutex::new(State::default()));
        let sent_messages = Family::<metrics::Message, Counter>::default();
        let received_messages = Family::<metrics::Message, Counter>::default();
        {
            let mut registry = cfg.registry.lock().unwrap_or_else(|e| e.into_inner());
            registry.register("messages_sent", "messages sent", sent_messages.clone());
            registry.register(
                "messages_received",
                "messages received",
                received_messages.clone(),
            );
        }

        (
            Self {
                rng: StdRng::seed_from_u64(cfg.seed),
                receiver,
                state: state.clone(),
                queues: HashMap::new(),
                received_messages,
                sent_messages,
            },
            Oracle {
                max_message_size: cfg.max_message_size,
                sender,
                state,
            },
        )
    }

    /// Spawn the network onto the current runtime.
    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        while let Some((origin, recipient, message, reply)) = self.receiver.next().await {
            // Determine if there is a link with a listening recipient
            let (link, agent) = {
                let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
                (
                    state.links.get(&(origin.clone(), recipient.clone())).cloned(),
                    state.agents.get(&recipient).cloned(),
                )
            };
            let Some(agent) = agent else {
                debug!(%recipient, reason = "no agent", "dropping message");
                let _ = reply.send(false);
                continue;
            };
            let Some(link) = link else {
                debug!(%recipient, reason = "no link", "dropping message");
                let _ = reply.send(false);
                continue;
            };

            // Record sent message as soon as we determine there is a link with recipient (approximates
            // having an open connection)
            self.sent_messages
                .get_or_create(&metrics::Message::new(&origin, &recipient))
                .inc();
            if reply.send(true).is_err() {
                debug!(%origin, "sender exited before handoff");
            }

            // Apply link settings
            if !self.rng.gen_bool(link.success_rate) {
                debug!(%recipient, reason = "random link failure", "dropping message");
                continue;
            }
            let delay = Normal::new(link.latency_mean, link.latency_stddev)
                .map(|normal| normal.sample(&mut self.rng))
                .unwrap_or(link.latency_mean)
                .max(0.0);
            debug!(%origin, %recipient, delay, "sending message");
            let arrival = Instant::now() + Duration::from_micros((delay * 1_000.0) as u64);

            // Hand to the link, replacing its queue if the recipient re-registered
            let key = (origin.clone(), recipient.clone());
            let stale = self
                .queues
                .get(&key)
                .map(|queue| !queue.agent.same_receiver(&agent) || queue.transmissions.is_closed())
                .unwrap_or(true);
            if stale {
                let queue = self.spawn_link(origin.clone(), recipient.clone(), agent);
                self.queues.insert(key.clone(), queue);
            }
            if let Some(queue) = self.queues.get(&key) {
                if let Err(err) = queue.transmissions.unbounded_send((arrival, origin, message)) {
                    error!(?err, "failed to queue message");
                }
            }
        }
    }

    /// Deliver everything handed to a link, in order, once its arrival time passes.
    fn spawn_link(
        &self,
        origin: PublicKey,
        recipient: PublicKey,
        agent: mpsc::UnboundedSender<Message>,
    ) -> LinkQueue {
        let (transmissions, mut pending) = mpsc::unbounded::<Transmission>();
        let received_messages = self.received_messages.clone();
        let label = metrics::Message::new(&origin, &recipient);
        tokio::spawn({
            let agent = agent.clone();
            async move {
                while let Some((arrival, origin, message)) = pending.next().await {
                    sleep_until(arrival).await;
                    if let Err(err) = agent.unbounded_send((origin, message)) {
                        // This can only happen if the receiver exited.
                        debug!(%recipient, ?err, "recipient exited");
                        return;
                    }
                    received_messages.get_or_create(&label).inc();
                }
            }
        });
        LinkQueue {
            agent,
            transmissions,
        }
    }
}

impl Oracle {
    /// Register a peer with the network.
    ///
    /// Registering a key again replaces the previous registration (simulating a restart). By
    /// default, the peer will not be linked to any other peers.
    pub fn register(&self, public_key: PublicKey) -> (Sender, Receiver) {
        let (sender, receiver) = mpsc::unbounded();
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .agents
            .insert(public_key.clone(), sender);
        (
            Sender {
                me: public_key,
                max_size: self.max_message_size,
                high: self.sender.clone(),
            },
            Receiver { receiver },
        )
    }

    /// Create a unidirectional link between two peers.
    ///
    /// Link can be called multiple times for the same sender/receiver. The latest
    /// setting will be used.
    pub fn link(&self, sender: PublicKey, receiver: PublicKey, config: Link) -> Result<(), Error> {
        if sender == receiver {
            return Err(Error::LinkingSelf);
        }
        if !(0.0..=1.0).contains(&config.success_rate) {
            return Err(Error::InvalidSuccessRate(config.success_rate));
        }
        if !config.latency_mean.is_finite()
            || !config.latency_stddev.is_finite()
            || config.latency_mean < 0.0
            || config.latency_stddev < 0.0
        {
            return Err(Error::InvalidLatency(
                config.latency_mean,
                config.latency_stddev,
            ));
        }
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .links
            .insert((sender, receiver), config);
        Ok(())
    }

    /// Remove a unidirectional link. Messages already in flight are still delivered.
    pub fn unlink(&self, sender: &PublicKey, receiver: &PublicKey) {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .links
            .remove(&(sender.clone(), receiver.clone()));
    }
}

/// Implementation of a [crate::Sender] for the simulated network.
#[derive(Clone, Debug)]
pub struct Sender {
    me: PublicKey,
    max_size: usize,
    high: mpsc::UnboundedSender<Task>,
}

impl crate::Sender for Sender {
    type Error = Error;

    async fn send(&mut self, recipient: PublicKey, message: Bytes) -> Result<bool, Error> {
        // Check message size
        if message.len() > self.max_size {
            return Err(Error::MessageTooLarge(message.len()));
        }

        // Send message
        let (sender, receiver) = oneshot::channel();
        self.high
            .unbounded_send((self.me.clone(), recipient, message, sender))
            .map_err(|_| Error::NetworkClosed)?;
        receiver.await.map_err(|_| Error::NetworkClosed)
    }
}

/// Implementation of a [crate::Receiver] for the simulated network.
#[derive(Debug)]
pub struct Receiver {
    receiver: mpsc::UnboundedReceiver<Message>,
}

impl crate::Receiver for Receiver {
    type Error = Error;

    async fn recv(&mut self) -> Result<Message, Error> {
        self.receiver.next().await.ok_or(Error::NetworkClosed)
    }
}
