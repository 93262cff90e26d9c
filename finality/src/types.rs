//! The transaction model.
//!
//! A [Transaction] consumes the outputs of earlier transactions (referenced by [StateRef]),
//! produces new [State]s, and lists [Command]s naming who must sign. Its id is the digest of
//! everything except the signatures, so collecting signatures never changes it.

use crate::VerificationError;
use bytes::{Buf, BufMut, Bytes};
use ratify_codec::{EncodeSize, Error as CodecError, FixedSize, RangeCfg, Read, ReadExt, Write};
use ratify_cryptography::{
    ed25519::{PrivateKey, PublicKey, Signature},
    sha256::Digest,
    Digestible, Hasher, Sha256, Signer, Verifier,
};
use std::collections::{BTreeMap, BTreeSet};

/// Namespace for every signature over a transaction id (including the notary's).
pub const TRANSACTION_NAMESPACE: &[u8] = b"_RATIFY_TRANSACTION";

/// Longest command name.
const MAX_COMMAND_NAME: usize = 64;

/// Bounds applied when decoding untrusted transactions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Limits {
    /// Maximum number of items in any list (inputs, outputs, commands, participants, signers,
    /// signatures).
    pub max_items: usize,

    /// Maximum size of a state's data.
    pub max_data: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_items: 256,
            max_data: 64 * 1024,
        }
    }
}

/// Reference to output `index` of transaction `txid`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StateRef {
    pub txid: Digest,
    pub index: u32,
}

impl Write for StateRef {
    fn write(&self, buf: &mut impl BufMut) {
        self.txid.write(buf);
        self.index.write(buf);
    }
}

impl FixedSize for StateRef {
    const SIZE: usize = Digest::SIZE + u32::SIZE;
}

impl EncodeSize for StateRef {
    fn encode_size(&self) -> usize {
        Self::SIZE
    }
}

impl Read for StateRef {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        let txid = Digest::read(buf)?;
        let index = u32::read(buf)?;
        Ok(Self { txid, index })
    }
}

impl std::fmt::Display for StateRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.txid, self.index)
    }
}

/// An output state: opaque data and the keys of the parties it concerns.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct State {
    pub participants: Vec<PublicKey>,
    pub data: Bytes,
}

impl Write for State {
    fn write(&self, buf: &mut impl BufMut) {
        self.participants.write(buf);
        self.data.write(buf);
    }
}

impl EncodeSize for State {
    fn encode_size(&self) -> usize {
        self.participants.encode_size() + self.data.encode_size()
    }
}

impl Read for State {
    type Cfg = Limits;

    fn read_cfg(buf: &mut impl Buf, cfg: &Limits) -> Result<Self, CodecError> {
        let participants = Vec::<PublicKey>::read_cfg(buf, &((..=cfg.max_items).into(), ()))?;
        let data = Bytes::read_cfg(buf, &(..=cfg.max_data).into())?;
        Ok(Self { participants, data })
    }
}

/// A named command and the keys required to sign for it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Command {
    pub name: String,
    pub signers: Vec<PublicKey>,
}

impl Write for Command {
    fn write(&self, buf: &mut impl BufMut) {
        self.name.write(buf);
        self.signers.write(buf);
    }
}

impl EncodeSize for Command {
    fn encode_size(&self) -> usize {
        self.name.encode_size() + self.signers.encode_size()
    }
}

impl Read for Command {
    type Cfg = Limits;

    fn read_cfg(buf: &mut impl Buf, cfg: &Limits) -> Result<Self, CodecError> {
        let name = String::read_cfg(buf, &(..=MAX_COMMAND_NAME).into())?;
        let signers = Vec::<PublicKey>::read_cfg(buf, &((..=cfg.max_items).into(), ()))?;
        Ok(Self { name, signers })
    }
}

/// Interval (in milliseconds since the epoch) during which a transaction may be notarized.
///
/// `from` is inclusive and `until` is exclusive. At least one bound is set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeWindow {
    from: Option<u64>,
    until: Option<u64>,
}

impl TimeWindow {
    /// Returns `None` if neither bound is set or the interval is empty.
    pub fn new(from: Option<u64>, until: Option<u64>) -> Option<Self> {
        match (from, until) {
            (None, None) => None,
            (Some(from), Some(until)) if from >= until => None,
            _ => Some(Self { from, until }),
        }
    }

    pub fn from(&self) -> Option<u64> {
        self.from
    }

    pub fn until(&self) -> Option<u64> {
        self.until
    }

    /// Returns whether `millis` falls within the window.
    pub fn contains(&self, millis: u64) -> bool {
        self.from.map_or(true, |from| millis >= from)
            && self.until.map_or(true, |until| millis < until)
    }
}

impl Write for TimeWindow {
    fn write(&self, buf: &mut impl BufMut) {
        self.from.write(buf);
        self.until.write(buf);
    }
}

impl EncodeSize for TimeWindow {
    fn encode_size(&self) -> usize {
        self.from.encode_size() + self.until.encode_size()
    }
}

impl Read for TimeWindow {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        let from = Option::<u64>::read(buf)?;
        let until = Option::<u64>::read(buf)?;
        Self::new(from, until).ok_or(CodecError::Invalid("TimeWindow", "empty"))
    }
}

/// An immutable, optionally signed transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    inputs: Vec<StateRef>,
    outputs: Vec<State>,
    notary: Option<PublicKey>,
    time_window: Option<TimeWindow>,
    commands: Vec<Command>,
    signatures: BTreeMap<PublicKey, Signature>,
}

impl Transaction {
    /// Create an unsigned transaction.
    pub fn new(
        inputs: Vec<StateRef>,
        outputs: Vec<State>,
        notary: Option<PublicKey>,
        time_window: Option<TimeWindow>,
        commands: Vec<Command>,
    ) -> Self {
        Self {
            inputs,
            outputs,
            notary,
            time_window,
            commands,
            signatures: BTreeMap::new(),
        }
    }

    pub fn inputs(&self) -> &[StateRef] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[State] {
        &self.outputs
    }

    pub fn notary(&self) -> Option<&PublicKey> {
        self.notary.as_ref()
    }

    pub fn time_window(&self) -> Option<&TimeWindow> {
        self.time_window.as_ref()
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn signatures(&self) -> &BTreeMap<PublicKey, Signature> {
        &self.signatures
    }

    /// Digest of everything but the signatures.
    pub fn id(&self) -> Digest {
        let mut content = Vec::with_capacity(self.content_size());
        self.write_content(&mut content);
        let mut hasher = Sha256::default();
        hasher.update(&content);
        hasher.finalize()
    }

    /// Returns a copy of this transaction carrying `signature` from `signer`.
    pub fn with_signature(&self, signer: PublicKey, signature: Signature) -> Self {
        let mut signed = self.clone();
        signed.signatures.insert(signer, signature);
        signed
    }

    /// Returns a copy of this transaction signed by `signer`.
    pub fn sign(&self, signer: &PrivateKey) -> Self {
        let signature = signer.sign(Some(TRANSACTION_NAMESPACE), self.id().as_ref());
        self.with_signature(signer.public_key(), signature)
    }

    /// Returns a copy of this transaction carrying every signature of `self` and `other`.
    ///
    /// Both must share an id.
    pub fn merge_signatures(&self, other: &Self) -> Self {
        let mut merged = self.clone();
        for (signer, signature) in &other.signatures {
            merged
                .signatures
                .entry(signer.clone())
                .or_insert(*signature);
        }
        merged
    }

    /// Returns whether a notary must sign (the transaction consumes inputs or is time-bound).
    pub fn needs_notarization(&self) -> bool {
        !self.inputs.is_empty() || self.time_window.is_some()
    }

    /// Returns whether the notary's signature is present.
    pub fn is_notary_complete(&self) -> bool {
        self.notary
            .as_ref()
            .is_some_and(|notary| self.signatures.contains_key(notary))
    }

    /// Keys whose signatures are required: every command signer, plus the notary when
    /// notarization is needed.
    pub fn required_signers(&self) -> BTreeSet<PublicKey> {
        let mut required: BTreeSet<PublicKey> = self
            .commands
            .iter()
            .flat_map(|command| command.signers.iter().cloned())
            .collect();
        if self.needs_notarization() {
            if let Some(notary) = &self.notary {
                required.insert(notary.clone());
            }
        }
        required
    }

    /// Verify every signature present and that every required signer except those in
    /// `allowed_missing` has signed.
    pub fn verify_signatures_except(
        &self,
        allowed_missing: &[PublicKey],
    ) -> Result<(), VerificationError> {
        let id = self.id();
        for (signer, signature) in &self.signatures {
            if !signer.verify(Some(TRANSACTION_NAMESPACE), id.as_ref(), signature) {
                return Err(VerificationError::InvalidSignature(signer.clone()));
            }
        }
        let missing: Vec<PublicKey> = self
            .required_signers()
            .into_iter()
            .filter(|key| !self.signatures.contains_key(key) && !allowed_missing.contains(key))
            .collect();
        if !missing.is_empty() {
            return Err(VerificationError::MissingSignatures(missing));
        }
        Ok(())
    }

    /// Verify every signature present and that every required signer has signed.
    pub fn verify_required_signatures(&self) -> Result<(), VerificationError> {
        self.verify_signatures_except(&[])
    }

    fn write_content(&self, buf: &mut impl BufMut) {
        self.inputs.write(buf);
        self.outputs.write(buf);
        self.notary.write(buf);
        self.time_window.write(buf);
        self.commands.write(buf);
    }

    fn content_size(&self) -> usize {
        self.inputs.encode_size()
            + self.outputs.encode_size()
            + self.notary.encode_size()
            + self.time_window.encode_size()
            + self.commands.encode_size()
    }
}

impl Digestible for Transaction {
    type Digest = Digest;

    fn digest(&self) -> Digest {
        self.id()
    }
}

impl Write for Transaction {
    fn write(&self, buf: &mut impl BufMut) {
        self.write_content(buf);
        self.signatures.write(buf);
    }
}

impl EncodeSize for Transaction {
    fn encode_size(&self) -> usize {
        self.content_size() + self.signatures.encode_size()
    }
}

impl Read for Transaction {
    type Cfg = Limits;

    fn read_cfg(buf: &mut impl Buf, cfg: &Limits) -> Result<Self, CodecError> {
        let items = RangeCfg::from(..=cfg.max_items);
        let inputs = Vec::<StateRef>::read_cfg(buf, &(items, ()))?;
        let outputs = Vec::<State>::read_cfg(buf, &(items, *cfg))?;
        let notary = Option::<PublicKey>::read(buf)?;
        let time_window = Option::<TimeWindow>::read(buf)?;
        let commands = Vec::<Command>::read_cfg(buf, &(items, *cfg))?;
        let signatures = BTreeMap::<PublicKey, Signature>::read_cfg(buf, &(items, ((), ())))?;
        Ok(Self {
            inputs,
            outputs,
            notary,
            time_window,
            commands,
            signatures,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratify_codec::{Decode as _, Encode as _};

    fn key(seed: u64) -> PrivateKey {
        PrivateKey::from_seed(seed)
    }

    fn transfer(notary: &PrivateKey) -> Transaction {
        let alice = key(1);
        let bob = key(2);
        Transaction::new(
            vec![StateRef {
                txid: ratify_cryptography::hash(b"issue"),
                index: 0,
            }],
            vec![State {
                participants: vec![bob.public_key()],
                data: Bytes::from_static(b"100"),
            }],
            Some(notary.public_key()),
            TimeWindow::new(Some(0), Some(1_000)),
            vec![Command {
                name: "move".into(),
                signers: vec![alice.public_key()],
            }],
        )
    }

    #[test]
    fn test_id_excludes_signatures() {
        let notary = key(0);
        let unsigned = transfer(&notary);
        let signed = unsigned.sign(&key(1));
        assert_eq!(unsigned.id(), signed.id());
        assert_ne!(unsigned, signed);

        // Originals are untouched
        assert!(unsigned.signatures().is_empty());
        assert_eq!(signed.signatures().len(), 1);
    }

    #[test]
    fn test_notary_complete() {
        let notary = key(0);
        let tx = transfer(&notary).sign(&key(1));
        assert!(tx.needs_notarization());
        assert!(!tx.is_notary_complete());
        assert!(tx.sign(&notary).is_notary_complete());

        // Issuance without a time-window needs no notary
        let issue = Transaction::new(vec![], vec![], None, None, vec![]);
        assert!(!issue.needs_notarization());
        assert!(!issue.is_notary_complete());
    }

    #[test]
    fn test_verify_signatures() {
        let notary = key(0);
        let unsigned = transfer(&notary);
        let mut missing = vec![key(1).public_key(), notary.public_key()];
        missing.sort();
        assert_eq!(
            unsigned.verify_required_signatures(),
            Err(VerificationError::MissingSignatures(missing))
        );

        let signed = unsigned.sign(&key(1));
        signed
            .verify_signatures_except(&[notary.public_key()])
            .unwrap();
        assert!(signed.verify_required_signatures().is_err());
        signed.sign(&notary).verify_required_signatures().unwrap();

        // A signature by the wrong key over the id does not count
        let forged = signed.with_signature(
            notary.public_key(),
            key(9).sign(Some(TRANSACTION_NAMESPACE), signed.id().as_ref()),
        );
        assert_eq!(
            forged.verify_required_signatures(),
            Err(VerificationError::InvalidSignature(notary.public_key()))
        );
    }

    #[test]
    fn test_merge_signatures() {
        let notary = key(0);
        let unsigned = transfer(&notary);
        let a = unsigned.sign(&key(1));
        let b = unsigned.sign(&notary);
        let merged = a.merge_signatures(&b);
        assert_eq!(merged.signatures().len(), 2);
        assert_eq!(merged, b.merge_signatures(&a));
        assert_eq!(merged.merge_signatures(&a), merged);
    }

    #[test]
    fn test_codec() {
        let notary = key(0);
        let tx = transfer(&notary).sign(&key(1)).sign(&notary);
        let encoded = tx.encode();
        assert_eq!(encoded.len(), tx.encode_size());
        let decoded = Transaction::decode_cfg(encoded, &Limits::default()).unwrap();
        assert_eq!(decoded, tx);
        assert_eq!(decoded.id(), tx.id());
    }

    #[test]
    fn test_codec_limits() {
        let notary = key(0);
        let tx = transfer(&notary);
        let limits = Limits {
            max_items: 8,
            max_data: 2,
        };
        assert!(matches!(
            Transaction::decode_cfg(tx.encode(), &limits),
            Err(CodecError::InvalidLength(3))
        ));
    }

    #[test]
    fn test_time_window() {
        assert!(TimeWindow::new(None, None).is_none());
        assert!(TimeWindow::new(Some(5), Some(5)).is_none());
        let window = TimeWindow::new(Some(5), Some(10)).unwrap();
        assert!(!window.contains(4));
        assert!(window.contains(5));
        assert!(!window.contains(10));
        let open = TimeWindow::new(None, Some(10)).unwrap();
        assert!(open.contains(0));
    }
}
