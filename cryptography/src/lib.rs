//! Generate keys, sign arbitrary messages, and deterministically verify signatures.
//!
//! Every participant, notary, and parameters issuer is identified by an [ed25519::PublicKey].
//! Content is addressed by [sha256::Digest].

pub mod ed25519;
pub mod sha256;
pub use sha256::{hash, Sha256};

/// Produces signatures over messages that can be verified with a corresponding public key.
pub trait Signer: Send + Sync + Clone + 'static {
    /// The type of signature produced by this [Signer].
    type Signature: Clone + Send + Sync + 'static;

    /// The corresponding public key type.
    type PublicKey: Verifier<Signature = Self::Signature>;

    /// Returns the public key corresponding to this [Signer].
    fn public_key(&self) -> Self::PublicKey;

    /// Sign a message with the given namespace.
    ///
    /// A namespace should be used to prevent cross-domain attacks (where a signature can be
    /// reused in a different context). It is prepended to the message with
    /// [ratify_utils::union_unique].
    fn sign(&self, namespace: Option<&[u8]>, msg: &[u8]) -> Self::Signature;
}

/// Verifies signatures over messages.
pub trait Verifier {
    /// The type of signature that this verifier can verify.
    type Signature;

    /// Verify that a signature is valid over a given message.
    ///
    /// The namespace provided here must match the namespace provided during signing.
    fn verify(&self, namespace: Option<&[u8]>, msg: &[u8], sig: &Self::Signature) -> bool;
}

/// Interface that any hasher must implement.
pub trait Hasher: Default + Clone + Send + Sync + 'static {
    /// Digest generated by the hasher.
    type Digest: Copy + Ord + Send + Sync + 'static;

    /// Append message to previously recorded data.
    fn update(&mut self, message: &[u8]) -> &mut Self;

    /// Hash all recorded data and reset the hasher to the initial state.
    fn finalize(&mut self) -> Self::Digest;

    /// Reset the hasher without generating a hash.
    fn reset(&mut self);
}

/// An object that can produce a digest of itself.
pub trait Digestible {
    /// The type of digest produced by this object.
    type Digest: Copy + Ord + Send + Sync + 'static;

    /// Returns a unique representation of the object.
    ///
    /// Two objects with the same content must produce the same digest.
    fn digest(&self) -> Self::Digest;
}
