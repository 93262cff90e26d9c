//! The durable state of a suspended run.

use super::Stage;
use crate::types::{Limits, Transaction};
use bytes::{Buf, BufMut};
use ratify_codec::{EncodeSize, Error as CodecError, FixedSize, RangeCfg, Read, ReadExt, Write};
use ratify_cryptography::ed25519::PublicKey;

/// Most recipients a single run broadcasts to.
pub const MAX_RECIPIENTS: usize = 1024;

/// What a run had completed when it was last checkpointed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RunState {
    /// Verified and about to request the notary's signature.
    AwaitingNotary {
        transaction: Transaction,
        recipients: Vec<PublicKey>,
    },
    /// Recorded in the local ledger.
    Committed {
        transaction: Transaction,
        recipients: Vec<PublicKey>,
    },
    /// About to start broadcast `round`.
    Broadcasting {
        transaction: Transaction,
        recipients: Vec<PublicKey>,
        acknowledged: Vec<PublicKey>,
        round: u32,
    },
}

impl RunState {
    const AWAITING_NOTARY: u8 = 0;
    const COMMITTED: u8 = 1;
    const BROADCASTING: u8 = 2;

    /// Largest encoding of a run whose transaction encodes to at most `max_transaction_size`.
    pub fn max_size(max_transaction_size: usize) -> usize {
        // Tag, round, two key lists (with length prefixes)
        1 + u32::SIZE + 2 * (5 + MAX_RECIPIENTS * PublicKey::SIZE) + max_transaction_size
    }

    pub fn transaction(&self) -> &Transaction {
        match self {
            RunState::AwaitingNotary { transaction, .. }
            | RunState::Committed { transaction, .. }
            | RunState::Broadcasting { transaction, .. } => transaction,
        }
    }

    /// The stage a run resumed from this state starts in.
    pub fn stage(&self) -> Stage {
        match self {
            RunState::AwaitingNotary { .. } => Stage::AwaitingNotary,
            RunState::Committed { .. } => Stage::Committed,
            RunState::Broadcasting { .. } => Stage::Broadcasting,
        }
    }
}

impl Write for RunState {
    fn write(&self, buf: &mut impl BufMut) {
        match self {
            RunState::AwaitingNotary {
                transaction,
                recipients,
            } => {
                Self::AWAITING_NOTARY.write(buf);
                transaction.write(buf);
                recipients.write(buf);
            }
            RunState::Committed {
                transaction,
                recipients,
            } => {
                Self::COMMITTED.write(buf);
                transaction.write(buf);
                recipients.write(buf);
            }
            RunState::Broadcasting {
                transaction,
                recipients,
                acknowledged,
                round,
            } => {
                Self::BROADCASTING.write(buf);
                transaction.write(buf);
                recipients.write(buf);
                acknowledged.write(buf);
                round.write(buf);
            }
        }
    }
}

impl EncodeSize for RunState {
    fn encode_size(&self) -> usize {
        1 + match self {
            RunState::AwaitingNotary {
                transaction,
                recipients,
            }
            | RunState::Committed {
                transaction,
                recipients,
            } => transaction.encode_size() + recipients.encode_size(),
            RunState::Broadcasting {
                transaction,
                recipients,
                acknowledged,
                round,
            } => {
                transaction.encode_size()
                    + recipients.encode_size()
                    + acknowledged.encode_size()
                    + round.encode_size()
            }
        }
    }
}

impl Read for RunState {
    type Cfg = Limits;

    fn read_cfg(buf: &mut impl Buf, cfg: &Limits) -> Result<Self, CodecError> {
        let keys = (RangeCfg::from(..=MAX_RECIPIENTS), ());
        let tag = u8::read(buf)?;
        let transaction = Transaction::read_cfg(buf, cfg)?;
        let recipients = Vec::<PublicKey>::read_cfg(buf, &keys)?;
        match tag {
            Self::AWAITING_NOTARY => Ok(RunState::AwaitingNotary {
                transaction,
                recipients,
            }),
            Self::COMMITTED => Ok(RunState::Committed {
                transaction,
                recipients,
            }),
            Self::BROADCASTING => {
                let acknowledged = Vec::<PublicKey>::read_cfg(buf, &keys)?;
                let round = u32::read(buf)?;
                Ok(RunState::Broadcasting {
                    transaction,
                    recipients,
                    acknowledged,
                    round,
                })
            }
            _ => Err(CodecError::InvalidEnum(tag)),
        }
    }
}
