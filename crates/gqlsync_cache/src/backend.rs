//! Storage backend trait definition.

use crate::error::CacheResult;

/// A key-value blob store for persisted offline state.
///
/// Backends are **opaque string stores**. They do not interpret the
/// blobs; [`crate::OfflineStore`] owns the layout.
///
/// # Invariants
///
/// - `get` returns exactly the last value passed to `set` for that key
/// - `set` is durable once it returns
/// - Backends must be `Send + Sync` so one store can be shared
pub trait StorageBackend: Send + Sync {
    /// Reads a blob.
    fn get(&self, key: &str) -> CacheResult<Option<String>>;

    /// Writes a blob, replacing any previous value.
    fn set(&self, key: &str, value: &str) -> CacheResult<()>;

    /// Removes a blob. Removing a missing key is not an error.
    fn remove(&self, key: &str) -> CacheResult<()>;

    /// Lists all stored keys.
    fn keys(&self) -> CacheResult<Vec<String>>;
}
