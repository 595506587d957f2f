//! Shared, serialized access to one `PersistentStore`.
//!
//! # Invariants
//! - Every store operation runs under one mutex: the single write context is
//!   never entered by two callers at once.
//! - Commit notifications happen while the lock is held, so observers see
//!   commits in the order they were made.

use crate::config::StoreConfig;
use crate::store::persistent_store::PersistentStore;
use crate::store::StoreResult;
use log::warn;
use std::sync::{Arc, Mutex};

/// Cloneable handle injected into services.
#[derive(Clone)]
pub struct StoreHandle {
    inner: Arc<Mutex<PersistentStore>>,
}

impl StoreHandle {
    pub fn new(store: PersistentStore) -> Self {
        Self {
            inner: Arc::new(Mutex::new(store)),
        }
    }

    pub fn open(config: StoreConfig) -> StoreResult<Self> {
        PersistentStore::open(config).map(Self::new)
    }

    /// Runs `op` inside the write context.
    ///
    /// Must not be called from a commit listener or another `with` closure on
    /// the same handle.
    pub fn with<R>(&self, op: impl FnOnce(&mut PersistentStore) -> R) -> R {
        let mut guard = self.inner.lock().unwrap_or_else(|poisoned| {
            warn!("event=store_lock module=store status=recovered reason=poisoned");
            poisoned.into_inner()
        });
        op(&mut guard)
    }
}
