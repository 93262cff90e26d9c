use crate::types::{StateRef, TimeWindow};
use bytes::{Buf, BufMut};
use ratify_codec::{EncodeSize, Error as CodecError, RangeCfg, Read, ReadExt, Write};
use ratify_cryptography::{sha256::Digest, Hasher, Sha256};
use std::fmt;
use thiserror::Error;

/// Domain separator for request ids.
const REQUEST_NAMESPACE: &[u8] = b"_RATIFY_NOTARY_REQUEST";

/// A request to notarize a transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Request {
    /// Id of the transaction to sign.
    pub transaction: Digest,
    /// The states the transaction consumes.
    pub inputs: Vec<StateRef>,
    /// The interval the notary's clock must fall in.
    pub time_window: Option<TimeWindow>,
    /// Identifies the logical request across retries.
    pub request_id: Digest,
}

impl Request {
    /// Build the request for `transaction`, deriving its request id.
    pub fn new(
        transaction: Digest,
        inputs: Vec<StateRef>,
        time_window: Option<TimeWindow>,
    ) -> Self {
        Self {
            transaction,
            inputs,
            time_window,
            request_id: Self::id(&transaction),
        }
    }

    /// The request id derived from a transaction id.
    pub fn id(transaction: &Digest) -> Digest {
        let mut hasher = Sha256::default();
        hasher.update(REQUEST_NAMESPACE).update(transaction.as_ref());
        hasher.finalize()
    }
}

impl Write for Request {
    fn write(&self, buf: &mut impl BufMut) {
        self.transaction.write(buf);
        self.inputs.write(buf);
        self.time_window.write(buf);
        self.request_id.write(buf);
    }
}

impl EncodeSize for Request {
    fn encode_size(&self) -> usize {
        self.transaction.encode_size()
            + self.inputs.encode_size()
            + self.time_window.encode_size()
            + self.request_id.encode_size()
    }
}

impl Read for Request {
    /// Bounds the number of inputs.
    type Cfg = RangeCfg;

    fn read_cfg(buf: &mut impl Buf, cfg: &RangeCfg) -> Result<Self, CodecError> {
        let transaction = Digest::read(buf)?;
        let inputs = Vec::<StateRef>::read_cfg(buf, &(*cfg, ()))?;
        let time_window = Option::<TimeWindow>::read(buf)?;
        let request_id = Digest::read(buf)?;
        Ok(Self {
            transaction,
            inputs,
            time_window,
            request_id,
        })
    }
}

/// Why a notary refused to sign.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Rejection {
    /// `input` was already consumed by transaction `consumer`.
    Conflict { input: StateRef, consumer: Digest },
    /// The notary's clock (`now`, in milliseconds) is outside the time-window.
    OutsideTimeWindow { now: u64 },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::Conflict { input, consumer } => {
                write!(f, "input {input} already consumed by {consumer}")
            }
            Rejection::OutsideTimeWindow { now } => {
                write!(f, "notary time {now} outside time-window")
            }
        }
    }
}

impl Rejection {
    const CONFLICT: u8 = 0;
    const OUTSIDE_TIME_WINDOW: u8 = 1;
}

impl Write for Rejection {
    fn write(&self, buf: &mut impl BufMut) {
        match self {
            Rejection::Conflict { input, consumer } => {
                Self::CONFLICT.write(buf);
                input.write(buf);
                consumer.write(buf);
            }
            Rejection::OutsideTimeWindow { now } => {
                Self::OUTSIDE_TIME_WINDOW.write(buf);
                now.write(buf);
            }
        }
    }
}

impl EncodeSize for Rejection {
    fn encode_size(&self) -> usize {
        1 + match self {
            Rejection::Conflict { input, consumer } => {
                input.encode_size() + consumer.encode_size()
            }
            Rejection::OutsideTimeWindow { now } => now.encode_size(),
        }
    }
}

impl Read for Rejection {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        match u8::read(buf)? {
            Self::CONFLICT => Ok(Rejection::Conflict {
                input: StateRef::read(buf)?,
                consumer: Digest::read(buf)?,
            }),
            Self::OUTSIDE_TIME_WINDOW => Ok(Rejection::OutsideTimeWindow {
                now: u64::read(buf)?,
            }),
            other => Err(CodecError::InvalidEnum(other)),
        }
    }
}

/// Failure of a single notarization attempt.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Fault {
    #[error("rejected: {0}")]
    Rejected(Rejection),
    #[error("notary unreachable")]
    Unreachable,
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratify_codec::{Decode as _, DecodeExt as _, Encode as _};
    use ratify_cryptography::hash;

    #[test]
    fn test_request_id_deterministic() {
        let txid = hash(b"tx");
        let a = Request::new(txid, vec![], None);
        let b = Request::new(txid, vec![], None);
        assert_eq!(a.request_id, b.request_id);
        assert_ne!(a.request_id, txid);
        assert_ne!(a.request_id, Request::new(hash(b"other"), vec![], None).request_id);
    }

    #[test]
    fn test_request_codec() {
        let request = Request::new(
            hash(b"tx"),
            vec![StateRef {
                txid: hash(b"input"),
                index: 2,
            }],
            TimeWindow::new(Some(1), Some(2)),
        );
        let decoded = Request::decode_cfg(request.encode(), &(..=4).into()).unwrap();
        assert_eq!(decoded, request);
        assert!(Request::decode_cfg(request.encode(), &(..=0).into()).is_err());
    }

    #[test]
    fn test_rejection_codec() {
        let rejections = [
            Rejection::Conflict {
                input: StateRef {
                    txid: hash(b"input"),
                    index: 0,
                },
                consumer: hash(b"other"),
            },
            Rejection::OutsideTimeWindow { now: 42 },
        ];
        for rejection in rejections {
            assert_eq!(Rejection::decode(rejection.encode()).unwrap(), rejection);
        }
    }
}
