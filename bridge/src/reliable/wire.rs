//! Frames exchanged between bridge engines.

use bytes::{Buf, BufMut, Bytes};
use ratify_codec::{EncodeSize, Error, FixedSize, RangeCfg, Read, ReadExt, Write};
use ratify_cryptography::{ed25519::PublicKey, sha256::Digest, Hasher, Sha256};
use std::fmt;

/// Domain separator for [DeliveryId] derivation from a payload.
const DELIVERY_NAMESPACE: &[u8] = b"_RATIFY_BRIDGE_DELIVERY";

/// Domain separator for [DeliveryId] derivation from an application key.
const KEYED_NAMESPACE: &[u8] = b"_RATIFY_BRIDGE_KEYED_DELIVERY";

/// Stable identifier of one logical delivery.
///
/// By default the identifier is derived from the origin, the destination, and the payload, so
/// every retransmission (or re-send after a restart) of the same payload shares it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeliveryId(Digest);

impl DeliveryId {
    pub fn new(origin: &PublicKey, destination: &PublicKey, payload: &[u8]) -> Self {
        Self::derive(DELIVERY_NAMESPACE, origin, destination, payload)
    }

    /// Identifier of the delivery an application names `key` (independent of the payload).
    pub fn keyed(origin: &PublicKey, destination: &PublicKey, key: &[u8]) -> Self {
        Self::derive(KEYED_NAMESPACE, origin, destination, key)
    }

    fn derive(namespace: &[u8], origin: &PublicKey, destination: &PublicKey, data: &[u8]) -> Self {
        let mut hasher = Sha256::default();
        hasher
            .update(namespace)
            .update(origin.as_ref())
            .update(destination.as_ref())
            .update(data);
        Self(hasher.finalize())
    }

    pub fn digest(&self) -> &Digest {
        &self.0
    }
}

impl fmt::Display for DeliveryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl Write for DeliveryId {
    fn write(&self, buf: &mut impl BufMut) {
        self.0.write(buf);
    }
}

impl FixedSize for DeliveryId {
    const SIZE: usize = Digest::SIZE;
}

impl EncodeSize for DeliveryId {
    fn encode_size(&self) -> usize {
        Self::SIZE
    }
}

impl Read for DeliveryId {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, Error> {
        Ok(Self(Digest::read(buf)?))
    }
}

/// Transport-level delivery unit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    pub id: DeliveryId,
    pub payload: Bytes,
    /// Number of times this envelope has been handed to the transport.
    pub attempt: u32,
}

impl Write for Envelope {
    fn write(&self, buf: &mut impl BufMut) {
        self.id.write(buf);
        self.attempt.write(buf);
        self.payload.write(buf);
    }
}

impl EncodeSize for Envelope {
    fn encode_size(&self) -> usize {
        self.id.encode_size() + self.attempt.encode_size() + self.payload.encode_size()
    }
}

impl Read for Envelope {
    /// Bounds the payload length.
    type Cfg = RangeCfg;

    fn read_cfg(buf: &mut impl Buf, cfg: &RangeCfg) -> Result<Self, Error> {
        let id = DeliveryId::read(buf)?;
        let attempt = u32::read(buf)?;
        let payload = Bytes::read_cfg(buf, cfg)?;
        Ok(Self {
            id,
            payload,
            attempt,
        })
    }
}

/// A message exchanged between two bridge engines.
///
/// Sequence numbers are scoped to a `session`: a sender starts a new session whenever it must
/// renumber its outstanding envelopes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// An envelope at position `seq`.
    Data {
        session: u64,
        seq: u64,
        envelope: Envelope,
    },
    /// Every envelope up to and including `seq` was received.
    Ack { session: u64, seq: u64 },
    /// The envelope at `seq` (and every envelope after it) was rejected and must be replayed.
    ///
    /// Envelopes before `seq` are acknowledged separately.
    Nack { session: u64, seq: u64 },
}

impl Frame {
    const DATA: u8 = 0;
    const ACK: u8 = 1;
    const NACK: u8 = 2;
}

impl Write for Frame {
    fn write(&self, buf: &mut impl BufMut) {
        match self {
            Frame::Data {
                session,
                seq,
                envelope,
            } => {
                Self::DATA.write(buf);
                session.write(buf);
                seq.write(buf);
                envelope.write(buf);
            }
            Frame::Ack { session, seq } => {
                Self::ACK.write(buf);
                session.write(buf);
                seq.write(buf);
            }
            Frame::Nack { session, seq } => {
                Self::NACK.write(buf);
                session.write(buf);
                seq.write(buf);
            }
        }
    }
}

impl EncodeSize for Frame {
    fn encode_size(&self) -> usize {
        1 + match self {
            Frame::Data {
                session,
                seq,
                envelope,
            } => session.encode_size() + seq.encode_size() + envelope.encode_size(),
            Frame::Ack { session, seq } | Frame::Nack { session, seq } => {
                session.encode_size() + seq.encode_size()
            }
        }
    }
}

impl Read for Frame {
    type Cfg = RangeCfg;

    fn read_cfg(buf: &mut impl Buf, cfg: &RangeCfg) -> Result<Self, Error> {
        let tag = u8::read(buf)?;
        let session = u64::read(buf)?;
        let seq = u64::read(buf)?;
        match tag {
            Self::DATA => Ok(Frame::Data {
                session,
                seq,
                envelope: Envelope::read_cfg(buf, cfg)?,
            }),
            Self::ACK => Ok(Frame::Ack { session, seq }),
            Self::NACK => Ok(Frame::Nack { session, seq }),
            other => Err(Error::InvalidEnum(other)),
        }
    }
}
