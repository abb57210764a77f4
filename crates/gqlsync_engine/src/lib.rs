//! # gqlsync Engine
//!
//! Offline mutation outbox, conflict resolution and delta sync.
//!
//! This crate provides:
//! - [`SyncClient`] - the facade: `mutate`, `query`, `subscribe`, `sync`, `hydrated`
//! - A FIFO mutation outbox with optimistic results, snapshot rollback and
//!   local-to-server id remapping ([`IdentityMap`])
//! - [`ConflictEngine`] - re-issues mutations with resolver-corrected variables
//! - Delta sync ([`SyncOptions`], [`SyncHandle`]) over the shared realtime socket
//! - [`GraphQLExecutor`] - the HTTP seam, with [`MockExecutor`] for tests
//!
//! ## Mutation lifecycle
//!
//! ```text
//! mutate()  -> optimistic result written, entry queued and persisted
//! online    -> head entry sent (one in flight)
//!   success -> snapshot restored, server result applied, ids remapped,
//!              remaining optimistic results replayed, one broadcast
//!   conflict-> resolver decides: retry with new variables or discard
//!   error   -> transient: retried with backoff; otherwise rolled back
//! ```
//!
//! ## Key Invariants
//!
//! - Mutations reach the server in enqueue order
//! - A failed mutation leaves no optimistic residue in the cache
//! - Once a server id is known, no queued mutation or cache entry keeps
//!   the local id
//! - User callbacks never crash the engine

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod client;
mod config;
mod conflict;
mod delta;
mod error;
mod executor;
mod identity;
mod network;
mod outbox;
mod persistence;
mod update;

pub use client::SyncClient;
pub use config::{ClientConfig, FetchPolicy, DEFAULT_BASE_REFRESH_INTERVAL, DEFAULT_KEY_PREFIX};
pub use conflict::{ConflictEngine, ConflictResolver, DEFAULT_MAX_CONFLICT_RETRIES};
pub use delta::{SyncEvent, SyncHandle, SyncOptions, DEFAULT_ID_FIELD, LAST_SYNC_VARIABLE};
pub use error::{SyncError, SyncResult};
pub use executor::{GraphQLExecutor, MockExecutor};
pub use identity::IdentityMap;
pub use network::NetworkStatus;
pub use outbox::{MutationHandle, MutationOptions, MutationStatus, PendingMutationInfo};
pub use update::{apply_result, UpdateFn};
