//! Resolve participant keys to well-known identities.

use ratify_cryptography::ed25519::PublicKey;
use std::{
    collections::BTreeMap,
    fmt,
    sync::{Arc, RwLock},
};

/// A well-known identity: a key and the name it is published under.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Party {
    pub key: PublicKey,
    pub name: String,
}

impl fmt::Display for Party {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.key)
    }
}

/// Someone a finalized transaction is sent to.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Recipient {
    /// Resolved to a [Party].
    WellKnown(Party),
    /// A bare key that did not resolve.
    Anonymous(PublicKey),
}

impl Recipient {
    pub fn key(&self) -> &PublicKey {
        match self {
            Recipient::WellKnown(party) => &party.key,
            Recipient::Anonymous(key) => key,
        }
    }
}

/// Pure lookup of the well-known identity behind a key.
pub trait IdentityResolver: Clone + Send + Sync + 'static {
    fn resolve(&self, key: &PublicKey) -> Option<Party>;

    /// Resolve `key`, falling back to an anonymous recipient.
    fn recipient(&self, key: &PublicKey) -> Recipient {
        match self.resolve(key) {
            Some(party) => Recipient::WellKnown(party),
            None => Recipient::Anonymous(key.clone()),
        }
    }
}

/// In-memory [IdentityResolver] shared by clones.
#[derive(Clone, Default)]
pub struct Registry {
    parties: Arc<RwLock<BTreeMap<PublicKey, Party>>>,
}

impl Registry {
    /// Publish `party`, replacing any identity previously published for its key.
    pub fn register(&self, party: Party) {
        let mut parties = self.parties.write().unwrap_or_else(|e| e.into_inner());
        parties.insert(party.key.clone(), party);
    }

    /// Every published identity, ordered by key.
    pub fn parties(&self) -> Vec<Party> {
        let parties = self.parties.read().unwrap_or_else(|e| e.into_inner());
        parties.values().cloned().collect()
    }
}

impl IdentityResolver for Registry {
    fn resolve(&self, key: &PublicKey) -> Option<Party> {
        let parties = self.parties.read().unwrap_or_else(|e| e.into_inner());
        parties.get(key).cloned()
    }
}
