use super::{wire::DeliveryId, Envelope, Error};
use bytes::Bytes;
use futures::{
    channel::{mpsc, oneshot},
    SinkExt, Stream,
};
use ratify_cryptography::ed25519::PublicKey;
use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

/// An envelope acknowledged by `destination`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Acknowledged {
    pub destination: PublicKey,
    pub envelope: Envelope,
}

/// Message types that can be sent to the `Mailbox`
pub enum Message {
    /// Deliver `payload` to `destination` as delivery `id`.
    ///
    /// The responder is resolved once the destination acknowledges the delivery or it fails.
    Send {
        destination: PublicKey,
        id: DeliveryId,
        payload: Bytes,
        responder: oneshot::Sender<Result<(), Error>>,
    },

    /// Subscribe to acknowledged envelopes.
    Subscribe {
        responder: oneshot::Sender<mpsc::UnboundedReceiver<Acknowledged>>,
    },
}

/// Confirms that the application applied an envelope received from a peer.
///
/// The origin only learns about the envelope once it is acknowledged. Dropping the
/// acknowledgement refuses the envelope and the origin replays it later.
pub struct Acknowledgement {
    sender: oneshot::Sender<()>,
}

impl Acknowledgement {
    pub(super) fn new() -> (Self, oneshot::Receiver<()>) {
        let (sender, receiver) = oneshot::channel();
        (Self { sender }, receiver)
    }

    /// Mark the envelope as applied.
    pub fn acknowledge(self) {
        let _ = self.sender.send(());
    }
}

/// Resolves once a delivery is acknowledged or abandoned.
///
/// Dropping the handle does not cancel the delivery.
pub struct DeliveryHandle {
    id: DeliveryId,
    receiver: oneshot::Receiver<Result<(), Error>>,
}

impl DeliveryHandle {
    /// The deduplication id of the delivery.
    pub fn id(&self) -> DeliveryId {
        self.id
    }
}

impl Future for DeliveryHandle {
    type Output = Result<(), Error>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|result| result.unwrap_or(Err(Error::Closed)))
    }
}

/// Ingress mailbox for [Engine](super::Engine).
#[derive(Clone)]
pub struct Mailbox {
    public_key: PublicKey,
    sender: mpsc::Sender<Message>,
}

impl Mailbox {
    pub(super) fn new(public_key: PublicKey, sender: mpsc::Sender<Message>) -> Self {
        Self { public_key, sender }
    }

    /// Queue `payload` for delivery to `destination`.
    ///
    /// The delivery id is derived from the payload: sending the same bytes to the same
    /// destination again joins the outstanding delivery (and is applied at most once). Use
    /// [Mailbox::send_with_id] for distinct deliveries that may carry identical bytes.
    pub async fn send(
        &mut self,
        destination: PublicKey,
        payload: Bytes,
    ) -> Result<DeliveryHandle, Error> {
        let id = DeliveryId::new(&self.public_key, &destination, &payload);
        self.send_with_id(destination, id, payload).await
    }

    /// Queue `payload` for delivery to `destination` under a caller-chosen `id`.
    ///
    /// Sends sharing an `id` are one delivery, whatever their payloads. See
    /// [DeliveryId::keyed] for deriving ids from an application key.
    pub async fn send_with_id(
        &mut self,
        destination: PublicKey,
        id: DeliveryId,
        payload: Bytes,
    ) -> Result<DeliveryHandle, Error> {
        let (responder, receiver) = oneshot::channel();
        self.sender
            .send(Message::Send {
                destination,
                id,
                payload,
                responder,
            })
            .await
            .map_err(|_| Error::Closed)?;
        Ok(DeliveryHandle { id, receiver })
    }

    /// The public key deliveries are sent from.
    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    /// Stream every acknowledged envelope, starting with the engine's recent history.
    ///
    /// The stream is at-least-once: consumers should be idempotent on the envelope id.
    pub async fn subscribe(&mut self) -> Result<impl Stream<Item = Acknowledged>, Error> {
        let (responder, receiver) = oneshot::channel();
        self.sender
            .send(Message::Subscribe { responder })
            .await
            .map_err(|_| Error::Closed)?;
        receiver.await.map_err(|_| Error::Closed)
    }
}
