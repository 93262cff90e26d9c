//! Durable store of suspended runs.
//!
//! A [Checkpoint] is the serialized state of a run at its latest suspension point. Each
//! [RunId] has at most one live checkpoint: [Store::save] atomically supersedes the previous one
//! (never merging with it) and rejects a sequence that does not advance. The store never
//! interprets the state it holds.
//!
//! Writes to different runs proceed in parallel. Writers of the same run must be serialized by the
//! caller.

use crate::{
    slot::{self, Slots},
    Error,
};
use bytes::{Buf, BufMut, Bytes};
use futures::{stream, Stream};
use prometheus_client::{
    metrics::{counter::Counter, gauge::Gauge},
    registry::Registry,
};
use ratify_codec::{EncodeSize, Error as CodecError, FixedSize, Read, ReadExt, Write};
use ratify_runtime::Storage;
use std::{
    collections::VecDeque,
    fmt::Display,
    sync::{Arc, Mutex},
};
use tracing::{debug, trace};
use uuid::Uuid;

/// Opaque, globally unique identifier of a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RunId(Uuid);

impl RunId {
    /// Generate a fresh, random identifier.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create an identifier from its raw bytes.
    pub fn from_bytes(raw: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(raw))
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<&[u8]> for RunId {
    type Error = Error;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        let raw: [u8; 16] = value
            .try_into()
            .map_err(|_| Error::InvalidKey(ratify_utils::hex(value)))?;
        Ok(Self::from_bytes(raw))
    }
}

impl Write for RunId {
    fn write(&self, buf: &mut impl BufMut) {
        self.as_bytes().write(buf);
    }
}

impl Read for RunId {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        Ok(Self::from_bytes(<[u8; 16]>::read(buf)?))
    }
}

impl FixedSize for RunId {
    const SIZE: usize = 16;
}

impl EncodeSize for RunId {
    fn encode_size(&self) -> usize {
        Self::SIZE
    }
}

/// The latest saved state of a run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Checkpoint {
    /// Strictly increases with every save of the same run.
    pub sequence: u64,

    /// Serialized run state.
    pub state: Bytes,
}

/// Configuration for [Store].
#[derive(Clone)]
pub struct Config {
    /// The [Storage] partition holding checkpoints.
    pub partition: String,

    /// Largest serialized state accepted by [Store::save].
    pub max_state_size: usize,

    /// Registry for metrics.
    pub registry: Arc<Mutex<Registry>>,
}

/// Durable store of [Checkpoint]s keyed by [RunId].
pub struct Store<S: Storage> {
    slots: Slots<S>,

    saves: Counter,
    stale: Counter,
    deletes: Counter,
    live: Gauge,
}

enum Scan {
    Start,
    Pending(VecDeque<Vec<u8>>),
}

impl<S: Storage> Store<S> {
    /// Initialize a [Store], counting the checkpoints already present.
    pub async fn init(storage: S, cfg: Config) -> Result<Self, Error> {
        let slots = Slots::new(
            storage,
            slot::Config {
                partition: cfg.partition,
                max_value_size: cfg.max_state_size,
            },
        );

        let saves = Counter::default();
        let stale = Counter::default();
        let deletes = Counter::default();
        let live = Gauge::default();
        {
            let mut registry = cfg.registry.lock().unwrap_or_else(|e| e.into_inner());
            registry.register("checkpoint_saves", "Checkpoints saved", saves.clone());
            registry.register(
                "checkpoint_stale",
                "Checkpoint saves rejected for a stale sequence",
                stale.clone(),
            );
            registry.register("checkpoint_deletes", "Checkpoints deleted", deletes.clone());
            registry.register("checkpoint_live", "Runs with a live checkpoint", live.clone());
        }

        let store = Self {
            slots,
            saves,
            stale,
            deletes,
            live,
        };
        let existing = store.slots.keys().await?.len();
        store.live.set(existing as i64);
        debug!(existing, "initialized checkpoint store");
        Ok(store)
    }

    /// Durably store `state` as the latest checkpoint of `run`, superseding any prior one.
    ///
    /// Returns [Error::StaleSequence] if `sequence` does not exceed the live checkpoint's.
    pub async fn save(&self, run: &RunId, sequence: u64, state: Bytes) -> Result<(), Error> {
        let first = self.slots.version(run.as_bytes()).await?.is_none();
        match self.slots.put(run.as_bytes(), sequence, &state).await {
            Ok(()) => {}
            Err(err @ Error::StaleSequence { .. }) => {
                self.stale.inc();
                return Err(err);
            }
            Err(err) => return Err(err),
        }
        self.saves.inc();
        if first {
            self.live.inc();
        }
        trace!(%run, sequence, "saved checkpoint");
        Ok(())
    }

    /// Returns the latest checkpoint of `run`, if any.
    pub async fn load(&self, run: &RunId) -> Result<Option<Checkpoint>, Error> {
        Ok(self
            .slots
            .get(run.as_bytes())
            .await?
            .map(|(sequence, state)| Checkpoint {
                sequence,
                state: Bytes::from(state),
            }))
    }

    /// Remove the checkpoint of `run`. Deleting a missing checkpoint is a no-op.
    pub async fn delete(&self, run: &RunId) -> Result<(), Error> {
        let existed = self.slots.version(run.as_bytes()).await?.is_some();
        self.slots.remove(run.as_bytes()).await?;
        if existed {
            self.deletes.inc();
            self.live.dec();
        }
        trace!(%run, "deleted checkpoint");
        Ok(())
    }

    /// Lazily stream every live checkpoint.
    ///
    /// The set of runs is captured on first poll, and each checkpoint is loaded only when
    /// yielded. Each run appears at most once; runs deleted before they are reached are skipped.
    /// Calling [Store::scan] again starts a new, independent scan. Order is unspecified.
    pub fn scan(&self) -> impl Stream<Item = Result<(RunId, Checkpoint), Error>> + Send + '_ {
        stream::unfold(Some(Scan::Start), move |state| async move {
            let state = match state {
                Some(state) => state,
                None => return None,
            };
            let mut pending = match state {
                Scan::Start => match self.slots.keys().await {
                    Ok(keys) => VecDeque::from(keys),
                    Err(err) => return Some((Err(err), None)),
                },
                Scan::Pending(pending) => pending,
            };
            while let Some(key) = pending.pop_front() {
                let run = match RunId::try_from(key.as_slice()) {
                    Ok(run) => run,
                    Err(err) => return Some((Err(err), Some(Scan::Pending(pending)))),
                };
                match self.load(&run).await {
                    Ok(Some(checkpoint)) => {
                        return Some((Ok((run, checkpoint)), Some(Scan::Pending(pending))))
                    }
                    Ok(None) => continue,
                    Err(err) => return Some((Err(err), Some(Scan::Pending(pending)))),
                }
            }
            None
        })
    }
}
