//! In-memory storage backend for testing.

use crate::backend::StorageBackend;
use crate::error::CacheResult;
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// An in-memory storage backend.
///
/// Suitable for tests and for clients that do not need to survive a
/// restart.
///
/// # Example
///
/// ```rust
/// use gqlsync_cache::{InMemoryBackend, StorageBackend};
///
/// let backend = InMemoryBackend::new();
/// backend.set("k", "v").unwrap();
/// assert_eq!(backend.get("k").unwrap().as_deref(), Some("v"));
/// ```
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    data: RwLock<BTreeMap<String, String>>,
}

impl InMemoryBackend {
    /// Creates a new empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored blobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

impl StorageBackend for InMemoryBackend {
    fn get(&self, key: &str) -> CacheResult<Option<String>> {
        Ok(self.data.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> CacheResult<()> {
        self.data.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> CacheResult<()> {
        self.data.write().remove(key);
        Ok(())
    }

    fn keys(&self) -> CacheResult<Vec<String>> {
        Ok(self.data.read().keys().cloned().collect())
    }
}
