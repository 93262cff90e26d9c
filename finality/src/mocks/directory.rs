use crate::parameters::{self, DirectoryError, SignedNetworkParameters};
use ratify_cryptography::sha256::Digest;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

#[derive(Default)]
struct State {
    published: HashMap<Digest, SignedNetworkParameters>,
    current: Option<Digest>,
    unreachable: bool,
    fetches: usize,
}

/// A network directory advertising the most recently published parameters.
#[derive(Clone, Default)]
pub struct Directory {
    state: Arc<Mutex<State>>,
}

impl Directory {
    /// Publish `parameters` and advertise them as current.
    pub fn publish(&self, parameters: SignedNetworkParameters) {
        let mut state = self.lock();
        let hash = parameters.hash();
        state.published.insert(hash, parameters);
        state.current = Some(hash);
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.lock().unreachable = !reachable;
    }

    /// Number of parameter downloads served.
    pub fn fetches(&self) -> usize {
        self.lock().fetches
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl parameters::Directory for Directory {
    async fn current_hash(&self) -> Result<Digest, DirectoryError> {
        let state = self.lock();
        if state.unreachable {
            return Err(DirectoryError::Unreachable);
        }
        state.current.ok_or(DirectoryError::Unreachable)
    }

    async fn fetch_parameters(
        &self,
        hash: &Digest,
    ) -> Result<SignedNetworkParameters, DirectoryError> {
        let mut state = self.lock();
        if state.unreachable {
            return Err(DirectoryError::Unreachable);
        }
        state.fetches += 1;
        state
            .published
            .get(hash)
            .cloned()
            .ok_or(DirectoryError::Missing(*hash))
    }
}
