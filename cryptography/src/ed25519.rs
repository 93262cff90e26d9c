//! Ed25519 keys and signatures.
//!
//! This implementation uses the `ed25519-consensus` crate to adhere to a strict set of validation
//! rules for Ed25519 signatures (every node must agree on whether a notary or issuer signature is
//! valid). You can read more about this [here](https://hdevalence.ca/blog/2020-10-04-its-25519am).
//!
//! # Example
//!
//! ```rust
//! use ratify_cryptography::{ed25519, Signer, Verifier};
//! use rand::rngs::OsRng;
//!
//! let signer = ed25519::PrivateKey::from_rng(&mut OsRng);
//! let namespace = Some(&b"demo"[..]);
//! let msg = b"hello, world!";
//!
//! let signature = signer.sign(namespace, msg);
//! assert!(signer.public_key().verify(namespace, msg, &signature));
//! ```

use crate::{Signer, Verifier};
use bytes::{Buf, BufMut};
use ratify_codec::{EncodeSize, Error as CodecError, FixedSize, Read, ReadExt, Write};
use ratify_utils::{hex, union_unique};
use rand::{CryptoRng, Rng, SeedableRng};
use std::cmp::Ordering;
use std::fmt::{Debug, Display};
use std::hash::{Hash, Hasher};
use zeroize::Zeroizing;

const PRIVATE_KEY_LENGTH: usize = 32;
const PUBLIC_KEY_LENGTH: usize = 32;
const SIGNATURE_LENGTH: usize = 64;

/// Ed25519 private key.
///
/// The secret seed is zeroized when the key is dropped.
#[derive(Clone)]
pub struct PrivateKey {
    seed: Zeroizing<[u8; PRIVATE_KEY_LENGTH]>,
    public: PublicKey,
}

impl PrivateKey {
    /// Create a fresh key using the supplied RNG.
    pub fn from_rng<R: Rng + CryptoRng>(rng: &mut R) -> Self {
        let key = ed25519_consensus::SigningKey::new(rng);
        Self::from_bytes(key.to_bytes())
    }

    /// Create a key from a seed.
    ///
    /// # Warning
    ///
    /// This function is insecure and should only be used for examples and testing.
    pub fn from_seed(seed: u64) -> Self {
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        Self::from_rng(&mut rng)
    }

    /// Create a key from its 32-byte secret seed.
    pub fn from_bytes(seed: [u8; PRIVATE_KEY_LENGTH]) -> Self {
        let key = ed25519_consensus::SigningKey::from(seed);
        let public = PublicKey::from(key.verification_key());
        Self {
            seed: Zeroizing::new(seed),
            public,
        }
    }

    fn signing_key(&self) -> ed25519_consensus::SigningKey {
        ed25519_consensus::SigningKey::from(*self.seed)
    }
}

impl Signer for PrivateKey {
    type Signature = Signature;
    type PublicKey = PublicKey;

    fn public_key(&self) -> PublicKey {
        self.public.clone()
    }

    fn sign(&self, namespace: Option<&[u8]>, msg: &[u8]) -> Signature {
        let key = self.signing_key();
        let sig = match namespace {
            Some(namespace) => key.sign(&union_unique(namespace, msg)),
            None => key.sign(msg),
        };
        Signature::from(sig)
    }
}

impl PartialEq for PrivateKey {
    fn eq(&self, other: &Self) -> bool {
        *self.seed == *other.seed
    }
}

impl Eq for PrivateKey {}

impl Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PrivateKey({})", self.public)
    }
}

/// Ed25519 public key.
///
/// Equality, ordering, and hashing are defined over the encoded bytes.
#[derive(Clone)]
pub struct PublicKey {
    raw: [u8; PUBLIC_KEY_LENGTH],
    key: ed25519_consensus::VerificationKey,
}

impl Verifier for PublicKey {
    type Signature = Signature;

    fn verify(&self, namespace: Option<&[u8]>, msg: &[u8], sig: &Signature) -> bool {
        let signature = ed25519_consensus::Signature::from(sig.raw);
        match namespace {
            Some(namespace) => {
                let payload = union_unique(namespace, msg);
                self.key.verify(&signature, &payload).is_ok()
            }
            None => self.key.verify(&signature, msg).is_ok(),
        }
    }
}

impl From<ed25519_consensus::VerificationKey> for PublicKey {
    fn from(key: ed25519_consensus::VerificationKey) -> Self {
        Self {
            raw: key.to_bytes(),
            key,
        }
    }
}

impl TryFrom<[u8; PUBLIC_KEY_LENGTH]> for PublicKey {
    type Error = CodecError;

    fn try_from(raw: [u8; PUBLIC_KEY_LENGTH]) -> Result<Self, Self::Error> {
        let key = ed25519_consensus::VerificationKey::try_from(raw)
            .map_err(|_| CodecError::Invalid("PublicKey", "invalid point"))?;
        Ok(Self { raw, key })
    }
}

impl TryFrom<&[u8]> for PublicKey {
    type Error = CodecError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        let raw: [u8; PUBLIC_KEY_LENGTH] = value
            .try_into()
            .map_err(|_| CodecError::InvalidLength(value.len()))?;
        Self::try_from(raw)
    }
}

impl Write for PublicKey {
    fn write(&self, buf: &mut impl BufMut) {
        self.raw.write(buf);
    }
}

impl Read for PublicKey {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        let raw = <[u8; PUBLIC_KEY_LENGTH]>::read(buf)?;
        Self::try_from(raw)
    }
}

impl FixedSize for PublicKey {
    const SIZE: usize = PUBLIC_KEY_LENGTH;
}

impl EncodeSize for PublicKey {
    fn encode_size(&self) -> usize {
        Self::SIZE
    }
}

impl AsRef<[u8]> for PublicKey {
    fn as_ref(&self) -> &[u8] {
        &self.raw
    }
}

impl PartialEq for PublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for PublicKey {}

impl Ord for PublicKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.raw.cmp(&other.raw)
    }
}

impl PartialOrd for PublicKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Hash for PublicKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex(&self.raw))
    }
}

impl Display for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex(&self.raw))
    }
}

/// Ed25519 signature.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Signature {
    raw: [u8; SIGNATURE_LENGTH],
}

impl From<ed25519_consensus::Signature> for Signature {
    fn from(value: ed25519_consensus::Signature) -> Self {
        Self {
            raw: value.to_bytes(),
        }
    }
}

impl From<[u8; SIGNATURE_LENGTH]> for Signature {
    fn from(raw: [u8; SIGNATURE_LENGTH]) -> Self {
        Self { raw }
    }
}

impl Write for Signature {
    fn write(&self, buf: &mut impl BufMut) {
        self.raw.write(buf);
    }
}

impl Read for Signature {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        Ok(Self {
            raw: <[u8; SIGNATURE_LENGTH]>::read(buf)?,
        })
    }
}

impl FixedSize for Signature {
    const SIZE: usize = SIGNATURE_LENGTH;
}

impl EncodeSize for Signature {
    fn encode_size(&self) -> usize {
        Self::SIZE
    }
}

impl AsRef<[u8]> for Signature {
    fn as_ref(&self) -> &[u8] {
        &self.raw
    }
}

impl Debug for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex(&self.raw))
    }
}

impl Display for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex(&self.raw))
    }
}

#[cfg(test)]
mod tests {
    // Vectors from https://datatracker.ietf.org/doc/html/rfc8032#section-7.1
    use super::*;
    use ratify_codec::{DecodeExt, Encode};
    use ratify_utils::from_hex_formatted;

    fn vector_1() -> ([u8; 32], Vec<u8>, Vec<u8>) {
        let secret = from_hex_formatted(
            "
            9d61b19deffd5a60ba844af492ec2cc4
            4449c5697b326919703bac031cae7f60
            ",
        )
        .unwrap();
        let public = from_hex_formatted(
            "
            d75a980182b10ab7d54bfed3c964073a
            0ee172f3daa62325af021a68f707511a
            ",
        )
        .unwrap();
        let signature = from_hex_formatted(
            "
            e5564300c360ac729086e2cc806e828a
            84877f1eb8e5d974d873e06522490155
            5fb8821590a33bacc61e39701cf9b46b
            d25bf5f0595bbe24655141438e7a100b
            ",
        )
        .unwrap();
        (secret.try_into().unwrap(), public, signature)
    }

    #[test]
    fn test_rfc8032_vector_1() {
        let (secret, public, expected) = vector_1();
        let signer = PrivateKey::from_bytes(secret);
        assert_eq!(signer.public_key().as_ref(), &public[..]);

        let signature = signer.sign(None, b"");
        assert_eq!(signature.as_ref(), &expected[..]);
        assert!(signer.public_key().verify(None, b"", &signature));
    }

    #[test]
    fn test_namespace_mismatch() {
        let signer = PrivateKey::from_seed(0);
        let signature = signer.sign(Some(b"finality"), b"msg");
        let public = signer.public_key();
        assert!(public.verify(Some(b"finality"), b"msg", &signature));
        assert!(!public.verify(Some(b"parameters"), b"msg", &signature));
        assert!(!public.verify(None, b"msg", &signature));
    }

    #[test]
    fn test_wrong_key() {
        let signer = PrivateKey::from_seed(0);
        let other = PrivateKey::from_seed(1);
        let signature = signer.sign(None, b"msg");
        assert!(!other.public_key().verify(None, b"msg", &signature));
    }

    #[test]
    fn test_tampered_signature() {
        let signer = PrivateKey::from_seed(0);
        let signature = signer.sign(None, b"msg");
        let mut raw = signature.raw;
        raw[3] ^= 0xff;
        assert!(!signer
            .public_key()
            .verify(None, b"msg", &Signature::from(raw)));
    }

    #[test]
    fn test_from_seed_deterministic() {
        assert_eq!(PrivateKey::from_seed(7), PrivateKey::from_seed(7));
        assert_ne!(
            PrivateKey::from_seed(7).public_key(),
            PrivateKey::from_seed(8).public_key()
        );
    }

    #[test]
    fn test_codec() {
        let signer = PrivateKey::from_seed(3);
        let public = signer.public_key();
        let decoded = PublicKey::decode(public.encode()).unwrap();
        assert_eq!(decoded, public);

        let signature = signer.sign(None, b"codec");
        let decoded = Signature::decode(signature.encode()).unwrap();
        assert_eq!(decoded, signature);

        assert!(PublicKey::decode(&public.as_ref()[..31]).is_err());
    }
}
