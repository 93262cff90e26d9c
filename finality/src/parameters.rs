//! Resolve the signed network parameters every node agrees on.
//!
//! The parameters are persisted as two artifacts: the `active` set and an optional pending
//! `update`. [Resolver::resolve] compares the active set against the hash advertised by the
//! [Directory]:
//!
//! - directory unreachable: use the active set (or fail with [Error::NoParametersAvailable]);
//! - advertised hash matches the active set: use it without downloading anything;
//! - no active set: download, verify, persist, and adopt the advertised set;
//! - a pending update matches the advertised hash: promote it to active;
//! - otherwise: [Error::ParametersMismatch], which requires an operator.
//!
//! No set is ever adopted unless its signature verifies against the trust anchor.

use crate::Error;
use bytes::{Buf, BufMut, Bytes};
use ratify_codec::{
    Decode as _, Encode as _, EncodeSize, Error as CodecError, RangeCfg, Read, ReadExt, Write,
};
use ratify_cryptography::{
    ed25519::{PrivateKey, PublicKey, Signature},
    sha256::Digest,
    Hasher, Sha256, Signer as _, Verifier as _,
};
use ratify_runtime::Storage;
use ratify_storage::slot::{self, Slots};
use std::future::Future;
use tracing::{debug, info, warn};

/// Namespace of the issuer's signature over encoded parameters.
pub const PARAMETERS_NAMESPACE: &[u8] = b"_RATIFY_NETWORK_PARAMETERS";

/// Most notaries a parameters set may list.
const MAX_NOTARIES: usize = 64;

/// Largest encoded parameters set.
const MAX_PARAMETERS_SIZE: usize = 16 * 1024;

const ACTIVE: &[u8] = b"active";
const UPDATE: &[u8] = b"update";

/// Protocol constants shared by every node of a network.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NetworkParameters {
    /// Strictly increases with every published set.
    pub epoch: u64,
    pub min_platform_version: u32,
    /// Notaries transactions may name.
    pub notaries: Vec<PublicKey>,
    pub max_message_size: u32,
    pub max_transaction_size: u32,
    /// Publication time (milliseconds since the epoch).
    pub modified_time: u64,
}

impl NetworkParameters {
    /// Returns whether `key` is a listed notary.
    pub fn is_notary(&self, key: &PublicKey) -> bool {
        self.notaries.contains(key)
    }
}

impl Write for NetworkParameters {
    fn write(&self, buf: &mut impl BufMut) {
        self.epoch.write(buf);
        self.min_platform_version.write(buf);
        self.notaries.write(buf);
        self.max_message_size.write(buf);
        self.max_transaction_size.write(buf);
        self.modified_time.write(buf);
    }
}

impl EncodeSize for NetworkParameters {
    fn encode_size(&self) -> usize {
        self.epoch.encode_size()
            + self.min_platform_version.encode_size()
            + self.notaries.encode_size()
            + self.max_message_size.encode_size()
            + self.max_transaction_size.encode_size()
            + self.modified_time.encode_size()
    }
}

impl Read for NetworkParameters {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        let epoch = u64::read(buf)?;
        let min_platform_version = u32::read(buf)?;
        let notaries = Vec::<PublicKey>::read_cfg(buf, &((..=MAX_NOTARIES).into(), ()))?;
        let max_message_size = u32::read(buf)?;
        let max_transaction_size = u32::read(buf)?;
        let modified_time = u64::read(buf)?;
        Ok(Self {
            epoch,
            min_platform_version,
            notaries,
            max_message_size,
            max_transaction_size,
            modified_time,
        })
    }
}

/// Encoded [NetworkParameters] and the issuer's signature over them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignedNetworkParameters {
    raw: Bytes,
    signature: Signature,
}

impl SignedNetworkParameters {
    /// Encode and sign `parameters`.
    pub fn sign(parameters: &NetworkParameters, issuer: &PrivateKey) -> Self {
        let raw = parameters.encode().freeze();
        let signature = issuer.sign(Some(PARAMETERS_NAMESPACE), &raw);
        Self { raw, signature }
    }

    /// Digest of the encoded parameters (the value a [Directory] advertises).
    pub fn hash(&self) -> Digest {
        let mut hasher = Sha256::default();
        hasher.update(&self.raw);
        hasher.finalize()
    }

    /// Verify the signature against `anchor` and decode the parameters.
    pub fn verify(&self, anchor: &PublicKey) -> Result<NetworkParameters, Error> {
        if !anchor.verify(Some(PARAMETERS_NAMESPACE), &self.raw, &self.signature) {
            return Err(Error::InvalidParametersSignature);
        }
        Ok(NetworkParameters::decode_cfg(self.raw.clone(), &())?)
    }
}

impl Write for SignedNetworkParameters {
    fn write(&self, buf: &mut impl BufMut) {
        self.raw.write(buf);
        self.signature.write(buf);
    }
}

impl EncodeSize for SignedNetworkParameters {
    fn encode_size(&self) -> usize {
        self.raw.encode_size() + self.signature.encode_size()
    }
}

impl Read for SignedNetworkParameters {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        let raw = Bytes::read_cfg(buf, &RangeCfg::from(..=MAX_PARAMETERS_SIZE))?;
        let signature = Signature::read(buf)?;
        Ok(Self { raw, signature })
    }
}

/// Failure to reach or read from a [Directory].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DirectoryError {
    #[error("directory unreachable")]
    Unreachable,
    #[error("directory has no parameters with hash {0}")]
    Missing(Digest),
}

/// Where the current network parameters are published.
pub trait Directory: Clone + Send + Sync + 'static {
    /// Hash of the currently published parameters.
    fn current_hash(&self) -> impl Future<Output = Result<Digest, DirectoryError>> + Send;

    /// Download the parameters with `hash`.
    fn fetch_parameters(
        &self,
        hash: &Digest,
    ) -> impl Future<Output = Result<SignedNetworkParameters, DirectoryError>> + Send;
}

/// Configuration for [Resolver].
#[derive(Clone)]
pub struct Config {
    /// The [Storage] partition holding the `active` and `update` artifacts.
    pub partition: String,

    /// Key every adopted set must be signed by.
    pub trust_anchor: PublicKey,
}

/// Persists, versions, and resolves [NetworkParameters].
pub struct Resolver<S: Storage, D: Directory> {
    slots: Slots<S>,
    directory: D,
    anchor: PublicKey,
}

impl<S: Storage, D: Directory> Resolver<S, D> {
    pub fn new(storage: S, directory: D, cfg: Config) -> Self {
        Self {
            slots: Slots::new(
                storage,
                slot::Config {
                    partition: cfg.partition,
                    max_value_size: MAX_PARAMETERS_SIZE + 128,
                },
            ),
            directory,
            anchor: cfg.trust_anchor,
        }
    }

    /// Resolve the parameters this node should run with.
    pub async fn resolve(&self) -> Result<NetworkParameters, Error> {
        let active = self.load(ACTIVE).await?;
        let advertised = match self.directory.current_hash().await {
            Ok(hash) => hash,
            Err(err) => {
                let Some((_, parameters)) = active else {
                    warn!(?err, "directory unavailable and no cached parameters");
                    return Err(Error::NoParametersAvailable);
                };
                info!(?err, epoch = parameters.epoch, "directory unavailable, using cached parameters");
                return Ok(parameters);
            }
        };

        let Some((signed, parameters)) = active else {
            return self.join(advertised).await;
        };
        let active_hash = signed.hash();
        if active_hash == advertised {
            self.clean_update(&active_hash, parameters.epoch).await?;
            debug!(epoch = parameters.epoch, "cached parameters current");
            return Ok(parameters);
        }

        // Promote a pending update the directory now advertises
        if let Some((update, update_parameters)) = self.load(UPDATE).await? {
            if update.hash() == advertised {
                if update_parameters.epoch <= parameters.epoch {
                    return Err(Error::StaleParametersUpdate {
                        active: parameters.epoch,
                        update: update_parameters.epoch,
                    });
                }
                self.slots
                    .put(ACTIVE, update_parameters.epoch, &update.encode())
                    .await?;
                self.slots.remove(UPDATE).await?;
                info!(
                    from = parameters.epoch,
                    to = update_parameters.epoch,
                    "promoted parameters update"
                );
                return Ok(update_parameters);
            }
        }
        warn!(active = %active_hash, %advertised, "network parameters mismatch");
        Err(Error::ParametersMismatch {
            active: active_hash,
            advertised,
        })
    }

    /// Verify `update` and store it as the pending update.
    ///
    /// The update must carry a strictly newer epoch than the active set. It replaces any
    /// pending update.
    pub async fn accept_update(&self, update: SignedNetworkParameters) -> Result<(), Error> {
        let parameters = update.verify(&self.anchor)?;
        if let Some((_, active)) = self.load(ACTIVE).await? {
            if parameters.epoch <= active.epoch {
                return Err(Error::StaleParametersUpdate {
                    active: active.epoch,
                    update: parameters.epoch,
                });
            }
        }
        if let Some((pending, _)) = self.load(UPDATE).await? {
            if pending == update {
                return Ok(());
            }
            self.slots.remove(UPDATE).await?;
        }
        self.slots
            .put(UPDATE, parameters.epoch, &update.encode())
            .await?;
        info!(epoch = parameters.epoch, hash = %update.hash(), "accepted parameters update");
        Ok(())
    }

    /// The active set, if any, without consulting the directory.
    pub async fn active(&self) -> Result<Option<NetworkParameters>, Error> {
        Ok(self.load(ACTIVE).await?.map(|(_, parameters)| parameters))
    }

    /// The pending update, if any.
    pub async fn pending(&self) -> Result<Option<NetworkParameters>, Error> {
        Ok(self.load(UPDATE).await?.map(|(_, parameters)| parameters))
    }

    async fn join(&self, advertised: Digest) -> Result<NetworkParameters, Error> {
        let signed = match self.directory.fetch_parameters(&advertised).await {
            Ok(signed) => signed,
            Err(err) => {
                warn!(?err, %advertised, "failed to download parameters");
                return Err(Error::NoParametersAvailable);
            }
        };
        let downloaded = signed.hash();
        if downloaded != advertised {
            return Err(Error::ParametersMismatch {
                active: downloaded,
                advertised,
            });
        }
        let parameters = signed.verify(&self.anchor)?;
        self.slots
            .put(ACTIVE, parameters.epoch, &signed.encode())
            .await?;
        self.clean_update(&advertised, parameters.epoch).await?;
        info!(epoch = parameters.epoch, hash = %advertised, "adopted network parameters");
        Ok(parameters)
    }

    /// Remove a pending update that is no newer than the active set.
    async fn clean_update(&self, active: &Digest, epoch: u64) -> Result<(), Error> {
        let Some((update, parameters)) = self.load(UPDATE).await? else {
            return Ok(());
        };
        if update.hash() == *active || parameters.epoch <= epoch {
            self.slots.remove(UPDATE).await?;
            debug!(epoch = parameters.epoch, "removed stale parameters update");
        }
        Ok(())
    }

    async fn load(
        &self,
        key: &[u8],
    ) -> Result<Option<(SignedNetworkParameters, NetworkParameters)>, Error> {
        let Some((_, raw)) = self.slots.get(key).await? else {
            return Ok(None);
        };
        let signed = SignedNetworkParameters::decode_cfg(raw.as_slice(), &())?;
        let parameters = signed.verify(&self.anchor)?;
        Ok(Some((signed, parameters)))
    }
}
