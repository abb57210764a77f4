//! Loading and saving the two persisted blobs.

use crate::backend::StorageBackend;
use crate::error::CacheResult;
use crate::metadata::OfflineMetadata;
use crate::store::CacheSnapshot;
use std::sync::Arc;
use tracing::{debug, warn};

/// Key suffix of the cache blob.
pub const CACHE_KEY: &str = "appsync";
/// Key suffix of the metadata blob.
pub const METADATA_KEY: &str = "appsync-metadata";

/// State read back from storage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PersistedState {
    /// Normalized cache contents.
    pub cache: CacheSnapshot,
    /// Offline metadata.
    pub metadata: OfflineMetadata,
}

/// Reads and writes the persisted blobs under one key prefix.
#[derive(Clone)]
pub struct OfflineStore {
    backend: Arc<dyn StorageBackend>,
    prefix: String,
}

impl OfflineStore {
    /// Creates a store over a backend.
    pub fn new(backend: Arc<dyn StorageBackend>, prefix: impl Into<String>) -> Self {
        Self {
            backend,
            prefix: prefix.into(),
        }
    }

    /// Returns the key prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Full key of the cache blob.
    pub fn cache_key(&self) -> String {
        format!("{}{CACHE_KEY}", self.prefix)
    }

    /// Full key of the metadata blob.
    pub fn metadata_key(&self) -> String {
        format!("{}{METADATA_KEY}", self.prefix)
    }

    /// Loads both blobs. Missing blobs load as empty state.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails or a blob is corrupt.
    pub fn load(&self) -> CacheResult<PersistedState> {
        let cache = match self.backend.get(&self.cache_key())? {
            Some(raw) => serde_json::from_str(&raw)?,
            None => CacheSnapshot::new(),
        };
        let metadata = match self.backend.get(&self.metadata_key())? {
            Some(raw) => serde_json::from_str(&raw)?,
            None => OfflineMetadata::default(),
        };
        debug!(
            prefix = %self.prefix,
            records = cache.len(),
            pending = metadata.snapshot.enqueued_mutations.len(),
            "loaded offline state"
        );
        Ok(PersistedState { cache, metadata })
    }

    /// Loads state, falling back to empty state on a corrupt blob.
    pub fn load_or_default(&self) -> PersistedState {
        self.load().unwrap_or_else(|e| {
            warn!(prefix = %self.prefix, error = %e, "discarding unreadable offline state");
            PersistedState::default()
        })
    }

    /// Saves the cache blob.
    pub fn save_cache(&self, cache: &CacheSnapshot) -> CacheResult<()> {
        self.backend
            .set(&self.cache_key(), &serde_json::to_string(cache)?)
    }

    /// Saves the metadata blob.
    pub fn save_metadata(&self, metadata: &OfflineMetadata) -> CacheResult<()> {
        self.backend
            .set(&self.metadata_key(), &serde_json::to_string(metadata)?)
    }

    /// Removes both blobs.
    pub fn clear(&self) -> CacheResult<()> {
        self.backend.remove(&self.cache_key())?;
        self.backend.remove(&self.metadata_key())
    }
}

impl std::fmt::Debug for OfflineStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OfflineStore")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}
