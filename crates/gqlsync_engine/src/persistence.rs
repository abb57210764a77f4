//! Write-through persistence of the cache and offline metadata.

use gqlsync_cache::{
    CacheSnapshot, DeltaSyncMetadata, NormalizedCache, OfflineMetadata, OfflineStore,
    PersistedState, SuspendedSync,
};
use parking_lot::Mutex;
use tracing::warn;

/// Owns the in-memory copy of the metadata blob and saves both blobs.
///
/// Save failures are logged; the in-memory state stays authoritative.
#[derive(Debug)]
pub(crate) struct Persistence {
    store: OfflineStore,
    metadata: Mutex<OfflineMetadata>,
}

impl Persistence {
    pub(crate) fn new(store: OfflineStore) -> Self {
        Self {
            store,
            metadata: Mutex::new(OfflineMetadata::default()),
        }
    }

    pub(crate) fn store(&self) -> &OfflineStore {
        &self.store
    }

    /// Loads persisted state and adopts its metadata.
    pub(crate) fn load(&self) -> PersistedState {
        let state = self.store.load_or_default();
        *self.metadata.lock() = state.metadata.clone();
        state
    }

    pub(crate) fn metadata(&self) -> OfflineMetadata {
        self.metadata.lock().clone()
    }

    /// Mutates the metadata and saves it.
    pub(crate) fn update_metadata<F>(&self, update: F)
    where
        F: FnOnce(&mut OfflineMetadata),
    {
        let snapshot = {
            let mut metadata = self.metadata.lock();
            update(&mut metadata);
            metadata.clone()
        };
        if let Err(e) = self.store.save_metadata(&snapshot) {
            warn!(prefix = %self.store.prefix(), error = %e, "failed to persist metadata");
        }
    }

    pub(crate) fn delta_metadata(&self, key: &str) -> DeltaSyncMetadata {
        self.metadata
            .lock()
            .delta_sync
            .metadata
            .get(key)
            .copied()
            .unwrap_or_default()
    }

    /// Records a sync suspended by going offline.
    pub(crate) fn suspend_sync(&self, key: &str, sync: SuspendedSync) {
        if self.metadata.lock().delta_sync.suspended.get(key) == Some(&sync) {
            return;
        }
        self.update_metadata(|m| {
            m.delta_sync.suspended.insert(key.to_string(), sync);
        });
    }

    /// Drops the record of a suspended sync, if there is one.
    pub(crate) fn forget_sync(&self, key: &str) {
        if !self.metadata.lock().delta_sync.suspended.contains_key(key) {
            return;
        }
        self.update_metadata(|m| {
            m.delta_sync.suspended.remove(key);
        });
    }

    pub(crate) fn suspended_syncs(&self) -> Vec<SuspendedSync> {
        self.metadata
            .lock()
            .delta_sync
            .suspended
            .values()
            .cloned()
            .collect()
    }

    pub(crate) fn save_cache(&self, cache: &CacheSnapshot) {
        if let Err(e) = self.store.save_cache(cache) {
            warn!(prefix = %self.store.prefix(), error = %e, "failed to persist cache");
        }
    }

    pub(crate) fn save_cache_from(&self, cache: &dyn NormalizedCache) {
        self.save_cache(&cache.extract());
    }
}
