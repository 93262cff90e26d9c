//! Engine for the reliable bridge.
//!
//! One task owns every per-destination [Outbound] arena and every per-origin [Inbound] arena.
//! It multiplexes the application mailbox, frames from the transport, confirmations from the
//! application, and retransmission deadlines.

use super::{
    config::Config,
    inbound::{Decision, Inbound},
    ingress::{Acknowledged, Acknowledgement, Mailbox, Message},
    metrics::Metrics,
    outbound::{Outbound, Settings},
    wire::{DeliveryId, Envelope, Frame},
    Error, Inbox,
};
use crate::{Receiver, Sender};
use bytes::Bytes;
use futures::{
    channel::{mpsc, oneshot},
    future::{self, BoxFuture},
    stream::FuturesUnordered,
    FutureExt as _, StreamExt,
};
use ratify_codec::{Decode as _, Encode as _, RangeCfg};
use ratify_cryptography::ed25519::PublicKey;
use ratify_runtime::telemetry::status::{CounterExt, Status};
use ratify_utils::SystemTimeExt;
use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    sync::atomic::{AtomicU64, Ordering},
    time::SystemTime,
};
use tokio::{
    select,
    task::JoinHandle,
    time::{sleep_until, Instant},
};
use tracing::{debug, trace, warn};

type Responder = oneshot::Sender<Result<(), Error>>;

/// The application's answer for an envelope handed to the inbox.
struct Applied {
    origin: PublicKey,
    session: u64,
    seq: u64,
    id: DeliveryId,
    confirmed: bool,
}

/// Room left between the sessions of consecutive engines for re-sequencing.
const SESSION_SPACING: u64 = 1 << 20;

/// Last session handed to an engine in this process.
static LAST_SESSION: AtomicU64 = AtomicU64::new(0);

/// Pick a session greater than any used before for a destination.
///
/// Sessions follow the wall clock across restarts and strictly increase within a process, so a
/// restarted engine (or a destination pruned and used again) numbers its frames in a session
/// receivers have not seen.
fn next_session() -> u64 {
    let floor = SystemTime::now()
        .epoch_millis()
        .saturating_mul(SESSION_SPACING);
    let next = |last: u64| floor.max(last.saturating_add(SESSION_SPACING));
    match LAST_SESSION.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |last| Some(next(last))) {
        Ok(last) | Err(last) => next(last),
    }
}

/// Delivers payloads to peers at-least-once and applies payloads from peers at-most-once.
pub struct Engine {
    ////////////////////////////////////////
    // Interfaces
    ////////////////////////////////////////
    public_key: PublicKey,

    ////////////////////////////////////////
    // Configuration
    ////////////////////////////////////////
    settings: Settings,
    dedup_capacity: usize,
    history_size: usize,
    max_payload_size: usize,

    ////////////////////////////////////////
    // Messaging
    ////////////////////////////////////////
    mailbox_receiver: mpsc::Receiver<Message>,
    inbox: mpsc::Sender<(PublicKey, Envelope, Acknowledgement)>,
    applying: FuturesUnordered<BoxFuture<'static, Applied>>,
    waiters: HashMap<(PublicKey, DeliveryId), Vec<Responder>>,
    subscribers: Vec<mpsc::UnboundedSender<Acknowledged>>,

    ////////////////////////////////////////
    // State
    ////////////////////////////////////////
    outbound: BTreeMap<PublicKey, Outbound>,
    inbound: BTreeMap<PublicKey, Inbound>,
    history: VecDeque<Acknowledged>,

    ////////////////////////////////////////
    // Metrics
    ////////////////////////////////////////
    metrics: Metrics,
}

impl Engine {
    /// Creates a new engine with the given configuration.
    ///
    /// Returns the engine, a mailbox for sending, and the inbox of envelopes received from peers.
    pub fn new(cfg: Config) -> (Self, Mailbox, Inbox) {
        let (mailbox_sender, mailbox_receiver) = mpsc::channel(cfg.mailbox_size);
        let (inbox, inbox_receiver) = mpsc::channel(cfg.inbox_size);
        let mailbox = Mailbox::new(cfg.public_key.clone(), mailbox_sender);
        let metrics = {
            let mut registry = cfg.registry.lock().unwrap_or_else(|e| e.into_inner());
            Metrics::init(&mut registry)
        };

        let result = Self {
            public_key: cfg.public_key,
            settings: Settings {
                window_size: cfg.window_size,
                max_attempts: cfg.max_attempts,
                ack_timeout: cfg.ack_timeout,
                retry_delay: cfg.retry_delay,
            },
            dedup_capacity: cfg.dedup_capacity,
            history_size: cfg.history_size,
            max_payload_size: cfg.max_payload_size,
            mailbox_receiver,
            inbox,
            applying: FuturesUnordered::new(),
            waiters: HashMap::new(),
            subscribers: Vec::new(),
            outbound: BTreeMap::new(),
            inbound: BTreeMap::new(),
            history: VecDeque::new(),
            metrics,
        };

        (result, mailbox, inbox_receiver)
    }

    /// Starts the engine with the given transport.
    pub fn start(
        self,
        sender: impl Sender,
        receiver: impl Receiver,
    ) -> JoinHandle<()> {
        tokio::spawn(self.run(sender, receiver))
    }

    /// Inner run loop called by `start`.
    ///
    /// Dropping every [Mailbox] stops new deliveries but the engine keeps receiving. It exits
    /// once the transport closes, or once nothing is left to deliver and nobody consumes the
    /// inbox.
    async fn run(mut self, mut sender: impl Sender, mut receiver: impl Receiver) {
        let mut mailbox_closed = false;
        loop {
            // Hand everything ready to the transport
            self.flush(&mut sender).await;
            self.prune();
            if mailbox_closed
                && self.outbound.is_empty()
                && self.applying.is_empty()
                && self.inbox.is_closed()
            {
                debug!("mailbox and inbox closed, shutting down");
                break;
            }

            // Wait for the next event
            let deadline = self
                .outbound
                .values()
                .filter_map(Outbound::deadline)
                .min();
            let timeout = async move {
                match deadline {
                    Some(deadline) => sleep_until(Instant::from_std(deadline)).await,
                    None => future::pending().await,
                }
            };
            select! {
                mail = self.mailbox_receiver.next(), if !mailbox_closed => {
                    let Some(mail) = mail else {
                        debug!("mailbox closed, only receiving");
                        mailbox_closed = true;
                        continue;
                    };
                    match mail {
                        Message::Send {
                            destination,
                            id,
                            payload,
                            responder,
                        } => self.handle_send(destination, id, payload, responder),
                        Message::Subscribe { responder } => self.handle_subscribe(responder),
                    }
                },
                applied = self.applying.next(), if !self.applying.is_empty() => {
                    if let Some(applied) = applied {
                        self.handle_applied(&mut sender, applied).await;
                    }
                },
                msg = receiver.recv() => {
                    let (peer, msg) = match msg {
                        Ok(msg) => msg,
                        Err(err) => {
                            debug!(?err, "transport closed");
                            break;
                        }
                    };
                    self.handle_frame(&mut sender, peer, msg).await;
                },
                _ = timeout => {
                    let now = Self::now();
                    for (destination, outbound) in self.outbound.iter_mut() {
                        if outbound.expire(now) {
                            self.metrics.replayed.inc();
                            debug!(%destination, pending = outbound.len(), "ack timeout, replaying window");
                        }
                    }
                },
            }
        }
    }

    fn now() -> std::time::Instant {
        Instant::now().into_std()
    }

    ////////////////////////////////////////
    // Handling
    ////////////////////////////////////////

    /// Drop destinations with nothing left to deliver.
    ///
    /// A destination used again starts over in a fresh session.
    fn prune(&mut self) {
        self.outbound.retain(|_, outbound| !outbound.is_empty());
        self.metrics.destinations.set(self.outbound.len() as i64);
    }

    /// Queue a delivery, joining any outstanding delivery with the same id.
    fn handle_send(
        &mut self,
        destination: PublicKey,
        id: DeliveryId,
        payload: Bytes,
        responder: Responder,
    ) {
        if destination == self.public_key {
            let _ = responder.send(Err(Error::SelfDelivery));
            return;
        }
        if payload.len() > self.max_payload_size {
            let _ = responder.send(Err(Error::PayloadTooLarge(payload.len())));
            return;
        }

        self.waiters
            .entry((destination.clone(), id))
            .or_default()
            .push(responder);
        let settings = self.settings;
        let outbound = self
            .outbound
            .entry(destination.clone())
            .or_insert_with(|| Outbound::new(settings, next_session()));
        if outbound.contains(&id) {
            debug!(%destination, %id, "joined outstanding delivery");
            return;
        }
        outbound.enqueue(Envelope {
            id,
            payload,
            attempt: 0,
        });
        trace!(%destination, %id, pending = outbound.len(), "queued delivery");
    }

    /// Register a subscriber, replaying recent history first.
    fn handle_subscribe(&mut self, responder: oneshot::Sender<mpsc::UnboundedReceiver<Acknowledged>>) {
        let (sender, receiver) = mpsc::unbounded();
        for acknowledged in &self.history {
            let _ = sender.unbounded_send(acknowledged.clone());
        }
        if responder.send(receiver).is_ok() {
            self.subscribers.push(sender);
        }
    }

    /// Handle a frame received from `peer`.
    async fn handle_frame(&mut self, sender: &mut impl Sender, peer: PublicKey, msg: Bytes) {
        let cfg = RangeCfg::from(..=self.max_payload_size);
        let frame = match Frame::decode_cfg(msg, &cfg) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(%peer, ?err, "failed to decode frame");
                self.metrics.receive.inc(Status::Invalid);
                return;
            }
        };

        match frame {
            Frame::Data {
                session,
                seq,
                envelope,
            } => {
                if let Some(reply) = self.handle_data(&peer, session, seq, envelope) {
                    Self::transmit(sender, peer, reply).await;
                }
            }
            Frame::Ack { session, seq } => {
                let Some(outbound) = self.outbound.get_mut(&peer) else {
                    return;
                };
                let acked = outbound.ack(session, seq, Self::now());
                self.acknowledged(&peer, acked);
            }
            Frame::Nack { session, seq } => {
                let Some(outbound) = self.outbound.get_mut(&peer) else {
                    return;
                };
                if outbound.session() != session {
                    trace!(%peer, session, "ignoring nack from old session");
                    return;
                }
                outbound.nack(session, seq, Self::now());
                self.metrics.nacked.inc();
                self.metrics.replayed.inc();
                debug!(%peer, seq, "nacked, stalling before replay");
            }
        }
    }

    /// Hand an envelope to the application at most once, returning the frame to reply with.
    ///
    /// Delivered envelopes are answered once the application confirms or refuses them.
    fn handle_data(
        &mut self,
        peer: &PublicKey,
        session: u64,
        seq: u64,
        envelope: Envelope,
    ) -> Option<Frame> {
        let dedup_capacity = self.dedup_capacity;
        let inbound = self
            .inbound
            .entry(peer.clone())
            .or_insert_with(|| Inbound::new(dedup_capacity));
        let id = envelope.id;
        match inbound.data(session, seq, &id) {
            Decision::Deliver => {
                let (acknowledgement, confirmed) = Acknowledgement::new();
                match self.inbox.try_send((peer.clone(), envelope, acknowledgement)) {
                    Ok(()) => {
                        trace!(%peer, %id, seq, "delivered envelope");
                        let origin = peer.clone();
                        self.applying.push(
                            async move {
                                Applied {
                                    origin,
                                    session,
                                    seq,
                                    id,
                                    confirmed: confirmed.await.is_ok(),
                                }
                            }
                            .boxed(),
                        );
                        None
                    }
                    Err(err) if err.is_full() => {
                        self.metrics.receive.inc(Status::Dropped);
                        debug!(%peer, %id, seq, "inbox full, rejecting");
                        inbound
                            .reject(session, seq, id)
                            .map(|seq| Frame::Nack { session, seq })
                    }
                    Err(_) => {
                        self.metrics.receive.inc(Status::Failure);
                        debug!(%peer, %id, "inbox closed");
                        inbound.reject(session, seq, id);
                        None
                    }
                }
            }
            Decision::Duplicate { ack } => {
                self.metrics.duplicate.inc();
                trace!(%peer, %id, seq, "duplicate envelope");
                Some(Frame::Ack { session, seq: ack })
            }
            Decision::Nack { seq } => Some(Frame::Nack { session, seq }),
            Decision::Ignore => None,
        }
    }

    /// Answer the origin of an envelope the application confirmed or refused.
    async fn handle_applied(&mut self, sender: &mut impl Sender, applied: Applied) {
        let Applied {
            origin,
            session,
            seq,
            id,
            confirmed,
        } = applied;
        let Some(inbound) = self.inbound.get_mut(&origin) else {
            return;
        };
        let reply = if confirmed {
            self.metrics.receive.inc(Status::Success);
            trace!(%origin, %id, seq, "applied envelope");
            inbound
                .confirm(session, seq, id)
                .map(|seq| Frame::Ack { session, seq })
        } else {
            self.metrics.receive.inc(Status::Dropped);
            debug!(%origin, %id, seq, "envelope refused by application");
            inbound
                .reject(session, seq, id)
                .map(|seq| Frame::Nack { session, seq })
        };
        if let Some(reply) = reply {
            Self::transmit(sender, origin, reply).await;
        }
    }

    ////////////////////////////////////////
    // Delivery
    ////////////////////////////////////////

    /// Transmit every frame that is ready and fail exhausted deliveries.
    async fn flush(&mut self, sender: &mut impl Sender) {
        let now = Self::now();
        let mut frames = Vec::new();
        let mut failed = Vec::new();
        for (destination, outbound) in self.outbound.iter_mut() {
            let transmit = outbound.transmit(now);
            failed.extend(
                transmit
                    .failed
                    .into_iter()
                    .map(|envelope| (destination.clone(), envelope)),
            );
            frames.extend(
                transmit
                    .frames
                    .into_iter()
                    .map(|frame| (destination.clone(), frame)),
            );
        }

        for (destination, envelope) in failed {
            warn!(%destination, id = %envelope.id, attempts = envelope.attempt, "delivery abandoned");
            self.metrics.failed.inc();
            self.resolve(&destination, &envelope.id, Err(Error::Exhausted(envelope.attempt)));
        }
        for (destination, frame) in frames {
            self.metrics.sent.inc();
            Self::transmit(sender, destination, frame).await;
        }
    }

    async fn transmit(sender: &mut impl Sender, recipient: PublicKey, frame: Frame) {
        let msg = frame.encode().freeze();
        match sender.send(recipient.clone(), msg).await {
            Ok(true) => {}
            Ok(false) => trace!(%recipient, "transport did not accept frame"),
            Err(err) => warn!(%recipient, ?err, "failed to send frame"),
        }
    }

    /// Resolve waiters and notify subscribers of acknowledged envelopes.
    fn acknowledged(&mut self, destination: &PublicKey, acked: Vec<Envelope>) {
        for envelope in acked {
            self.metrics.acked.inc();
            trace!(%destination, id = %envelope.id, "delivery acknowledged");
            self.resolve(destination, &envelope.id, Ok(()));

            let acknowledged = Acknowledged {
                destination: destination.clone(),
                envelope,
            };
            self.subscribers
                .retain(|subscriber| subscriber.unbounded_send(acknowledged.clone()).is_ok());
            self.history.push_back(acknowledged);
            while self.history.len() > self.history_size {
                self.history.pop_front();
            }
        }
    }

    fn resolve(&mut self, destination: &PublicKey, id: &DeliveryId, result: Result<(), Error>) {
        let Some(waiters) = self.waiters.remove(&(destination.clone(), *id)) else {
            return;
        };
        for waiter in waiters {
            let _ = waiter.send(result.clone());
        }
    }
}
