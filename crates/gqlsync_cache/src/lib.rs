//! # gqlsync Cache
//!
//! Offline cache adapter for gqlsync.
//!
//! This crate bridges the mutation outbox and the local normalized store:
//! - [`NormalizedCache`] - the keyed-store surface the sync layer relies on
//! - [`InMemoryCache`] - a small normalizing store implementing it
//! - [`RecordingCache`] - a decorator that records writes while forwarding
//! - [`StorageBackend`] with [`InMemoryBackend`] and [`FileBackend`]
//! - [`OfflineStore`] - the two persisted blobs (cache and metadata)
//! - A process-wide registry guarding persistence prefixes
//!
//! ## Persisted layout
//!
//! ```text
//! <prefix>appsync            # normalized cache blob
//! <prefix>appsync-metadata   # {idsMap, snapshot:{cache, enqueuedMutations}, deltaSync:{metadata, suspended}}
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;
mod metadata;
mod persist;
mod recording;
mod registry;
mod store;

pub use backend::StorageBackend;
pub use error::{CacheError, CacheResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
pub use metadata::{
    BaseSyncMark, DeltaSyncMetadata, DeltaSyncState, OfflineMetadata, PersistedMutation,
    SnapshotState, SuspendedSync,
};
pub use persist::{OfflineStore, PersistedState, CACHE_KEY, METADATA_KEY};
pub use recording::RecordingCache;
pub use registry::{is_prefix_registered, register_prefix};
pub use store::{
    entity_key, CacheEvent, CacheSnapshot, CacheWrite, InMemoryCache, NormalizedCache,
    ROOT_QUERY, TYPENAME_FIELD,
};
