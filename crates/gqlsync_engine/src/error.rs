//! Error types for the sync engine.

use gqlsync_cache::CacheError;
use gqlsync_protocol::{GraphQLError, Value};
use gqlsync_realtime::{RealtimeError, Retryable};
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur in the sync engine.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Invalid client configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Network or server failure while executing an operation.
    #[error("network error: {message}")]
    Network {
        /// Error message.
        message: String,
        /// HTTP status, if any.
        status: Option<u16>,
        /// Set when the server marked the failure as permanent.
        permanent: bool,
    },

    /// The server answered with GraphQL errors.
    #[error("graphql error: {}", .0.first().map(|e| e.message.as_str()).unwrap_or("unknown"))]
    GraphQL(Vec<GraphQLError>),

    /// A version conflict the resolver did not settle.
    #[error("unresolved conflict for {mutation_name} after {retries} resolver call(s)")]
    Conflict {
        /// Mutation name.
        mutation_name: String,
        /// Server's current record.
        data: Value,
        /// Resolver calls made.
        retries: u32,
    },

    /// Nothing cached for a cache-only read.
    #[error("no cached result for {0}")]
    CacheMiss(String),

    /// The client is offline and the operation needs the network.
    #[error("client is offline")]
    Offline,

    /// The operation was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// Cache or persistence failure.
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    /// Realtime transport failure.
    #[error("realtime error: {0}")]
    Realtime(#[from] RealtimeError),
}

impl SyncError {
    /// Creates a transient network error.
    pub fn network(message: impl Into<String>, status: Option<u16>) -> Self {
        Self::Network {
            message: message.into(),
            status,
            permanent: false,
        }
    }

    /// Creates a network error the server marked as permanent.
    pub fn permanent(message: impl Into<String>, status: Option<u16>) -> Self {
        Self::Network {
            message: message.into(),
            status,
            permanent: true,
        }
    }

    /// Status code carried by the error, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Network { status, .. } => *status,
            Self::Realtime(err) => err.status_code(),
            _ => None,
        }
    }

    /// Returns true if the operation can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network {
                status, permanent, ..
            } => !*permanent && !matches!(status, Some(400 | 401 | 403)),
            Self::Realtime(err) => err.is_retryable(),
            _ => false,
        }
    }
}

impl Retryable for SyncError {
    fn is_retryable(&self) -> bool {
        SyncError::is_retryable(self)
    }
}
