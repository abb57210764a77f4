//! Configuration for the sync client.

use crate::conflict::{ConflictResolver, DEFAULT_MAX_CONFLICT_RETRIES};
use crate::error::{SyncError, SyncResult};
use gqlsync_cache::{InMemoryBackend, StorageBackend};
use gqlsync_realtime::{AuthMode, RealtimeConfig, RetryConfig, SERVER_KEEP_ALIVE_TIMEOUT};
use std::sync::Arc;
use std::time::Duration;

/// Default persistence key prefix.
pub const DEFAULT_KEY_PREFIX: &str = "gqlsync:";

/// Default interval between base query runs of a delta sync.
pub const DEFAULT_BASE_REFRESH_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Where `query` reads from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FetchPolicy {
    /// Cached result if complete, network otherwise.
    #[default]
    CacheFirst,
    /// Cached result only; a miss is an error.
    CacheOnly,
    /// Always the network; the result is written to the cache.
    NetworkOnly,
}

/// Configuration for a [`SyncClient`](crate::SyncClient).
#[derive(Clone)]
pub struct ClientConfig {
    /// GraphQL endpoint.
    pub url: String,
    /// Region of the endpoint.
    pub region: Option<String>,
    /// Authorization.
    pub auth: Option<AuthMode>,
    /// Prefix of the persisted keys. Unique per client in a process.
    pub key_prefix: String,
    /// Where offline state is persisted.
    pub storage: Arc<dyn StorageBackend>,
    /// Policy for version conflicts.
    pub conflict_resolver: Option<Arc<dyn ConflictResolver>>,
    /// Maximum resolver calls per mutation.
    pub max_conflict_retries: u32,
    /// Overrides the server-advertised keep-alive timeout.
    pub keep_alive_timeout: Option<Duration>,
    /// Default base refresh interval for delta syncs.
    pub base_refresh_interval: Duration,
    /// Backoff for connection attempts and transient mutation failures.
    pub retry: RetryConfig,
}

impl ClientConfig {
    /// Creates a configuration for `url`. Region and auth must still be set.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            region: None,
            auth: None,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            storage: Arc::new(InMemoryBackend::new()),
            conflict_resolver: None,
            max_conflict_retries: DEFAULT_MAX_CONFLICT_RETRIES,
            keep_alive_timeout: None,
            base_refresh_interval: DEFAULT_BASE_REFRESH_INTERVAL,
            retry: RetryConfig::default(),
        }
    }

    /// Sets the region.
    #[must_use]
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Sets the auth mode.
    #[must_use]
    pub fn with_auth(mut self, auth: AuthMode) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Sets the persistence key prefix.
    #[must_use]
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Sets the storage backend.
    #[must_use]
    pub fn with_storage(mut self, storage: Arc<dyn StorageBackend>) -> Self {
        self.storage = storage;
        self
    }

    /// Sets the conflict resolver.
    #[must_use]
    pub fn with_conflict_resolver(mut self, resolver: impl ConflictResolver + 'static) -> Self {
        self.conflict_resolver = Some(Arc::new(resolver));
        self
    }

    /// Sets the maximum resolver calls per mutation.
    #[must_use]
    pub fn with_max_conflict_retries(mut self, retries: u32) -> Self {
        self.max_conflict_retries = retries;
        self
    }

    /// Overrides the keep-alive timeout.
    #[must_use]
    pub fn with_keep_alive_timeout(mut self, timeout: Duration) -> Self {
        self.keep_alive_timeout = Some(timeout);
        self
    }

    /// Sets the default base refresh interval.
    #[must_use]
    pub fn with_base_refresh_interval(mut self, interval: Duration) -> Self {
        self.base_refresh_interval = interval;
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Checks the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] for a missing url, region or auth, or
    /// a keep-alive override below the server minimum.
    pub fn validate(&self) -> SyncResult<()> {
        if self.url.trim().is_empty() {
            return Err(SyncError::Config("url is required".into()));
        }
        if self.region.as_deref().map_or(true, |r| r.trim().is_empty()) {
            return Err(SyncError::Config("region is required".into()));
        }
        if self.auth.is_none() {
            return Err(SyncError::Config("auth is required".into()));
        }
        if let Some(timeout) = self.keep_alive_timeout {
            if timeout < SERVER_KEEP_ALIVE_TIMEOUT {
                return Err(SyncError::Config(format!(
                    "keep-alive timeout must be at least {} ms",
                    SERVER_KEEP_ALIVE_TIMEOUT.as_millis()
                )));
            }
        }
        Ok(())
    }

    /// The realtime transport configuration derived from this one.
    pub fn realtime_config(&self) -> SyncResult<RealtimeConfig> {
        let auth = self
            .auth
            .clone()
            .ok_or_else(|| SyncError::Config("auth is required".into()))?;
        let mut config = RealtimeConfig::new(self.url.clone(), auth).with_retry(self.retry.clone());
        if let Some(region) = &self.region {
            config = config.with_region(region.clone());
        }
        if let Some(timeout) = self.keep_alive_timeout {
            config = config.with_keep_alive_timeout(timeout);
        }
        Ok(config)
    }
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("url", &self.url)
            .field("region", &self.region)
            .field("auth", &self.auth)
            .field("key_prefix", &self.key_prefix)
            .field("has_conflict_resolver", &self.conflict_resolver.is_some())
            .field("max_conflict_retries", &self.max_conflict_retries)
            .field("keep_alive_timeout", &self.keep_alive_timeout)
            .field("base_refresh_interval", &self.base_refresh_interval)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}
