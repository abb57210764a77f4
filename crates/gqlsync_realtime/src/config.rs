//! Configuration for the realtime transport.

use crate::auth::AuthMode;
use crate::error::{RealtimeError, RealtimeResult};
use crate::retry::RetryConfig;
use std::time::Duration;

/// Smallest keep-alive window a caller may request; the server sends `ka`
/// frames less often than this.
pub const SERVER_KEEP_ALIVE_TIMEOUT: Duration = Duration::from_secs(60);
/// Keep-alive window used until the server advertises one.
pub const DEFAULT_KEEP_ALIVE_TIMEOUT: Duration = Duration::from_secs(5 * 60);
/// Time allowed for `connection_ack`.
pub const CONNECTION_ACK_TIMEOUT: Duration = Duration::from_secs(15);
/// Time allowed for each `start_ack`.
pub const START_ACK_TIMEOUT: Duration = Duration::from_secs(15);
/// Idle time before an unused socket is closed.
pub const CLOSE_GRACE: Duration = Duration::from_secs(1);
/// Interval between drain checks while the send buffer is not empty.
pub const DRAIN_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Configuration for the realtime transport.
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// GraphQL HTTP endpoint the realtime URL is derived from.
    pub graphql_endpoint: String,
    /// Signing region; inferred from the host when absent.
    pub region: Option<String>,
    /// How frames are authorized.
    pub auth: AuthMode,
    /// Caller override for the keep-alive window.
    pub keep_alive_timeout: Option<Duration>,
    /// Time allowed for `connection_ack`.
    pub connection_ack_timeout: Duration,
    /// Time allowed for each `start_ack`.
    pub start_ack_timeout: Duration,
    /// Idle time before an unused socket is closed.
    pub close_grace: Duration,
    /// Connection retry policy.
    pub retry: RetryConfig,
}

impl RealtimeConfig {
    /// Creates a configuration with default timeouts.
    pub fn new(graphql_endpoint: impl Into<String>, auth: AuthMode) -> Self {
        Self {
            graphql_endpoint: graphql_endpoint.into(),
            region: None,
            auth,
            keep_alive_timeout: None,
            connection_ack_timeout: CONNECTION_ACK_TIMEOUT,
            start_ack_timeout: START_ACK_TIMEOUT,
            close_grace: CLOSE_GRACE,
            retry: RetryConfig::default(),
        }
    }

    /// Sets the signing region.
    #[must_use]
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Overrides the server-advertised keep-alive window.
    #[must_use]
    pub fn with_keep_alive_timeout(mut self, timeout: Duration) -> Self {
        self.keep_alive_timeout = Some(timeout);
        self
    }

    /// Sets the connection ack timeout.
    #[must_use]
    pub fn with_connection_ack_timeout(mut self, timeout: Duration) -> Self {
        self.connection_ack_timeout = timeout;
        self
    }

    /// Sets the start ack timeout.
    #[must_use]
    pub fn with_start_ack_timeout(mut self, timeout: Duration) -> Self {
        self.start_ack_timeout = timeout;
        self
    }

    /// Sets the close grace window.
    #[must_use]
    pub fn with_close_grace(mut self, grace: Duration) -> Self {
        self.close_grace = grace;
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
    /// Returns `Config` if the endpoint is empty or the keep-alive override
    /// is below [`SERVER_KEEP_ALIVE_TIMEOUT`].
    pub fn validate(&self) -> RealtimeResult<()> {
        if self.graphql_endpoint.trim().is_empty() {
            return Err(RealtimeError::Config("missing GraphQL endpoint".into()));
        }
        if let Some(timeout) = self.keep_alive_timeout {
            if timeout < SERVER_KEEP_ALIVE_TIMEOUT {
                return Err(RealtimeError::Config(format!(
                    "keep-alive timeout of {} ms is below the server minimum of {} ms",
                    timeout.as_millis(),
                    SERVER_KEEP_ALIVE_TIMEOUT.as_millis()
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ENDPOINT: &str = "https://api.example.com/graphql";

    #[test]
    fn realtime_config_builder() {
        let config = RealtimeConfig::new(ENDPOINT, AuthMode::api_key("da2-key"))
            .with_region("eu-west-1")
            .with_keep_alive_timeout(Duration::from_secs(90))
            .with_close_grace(Duration::from_millis(10));

        assert_eq!(config.graphql_endpoint, ENDPOINT);
        assert_eq!(config.region.as_deref(), Some("eu-west-1"));
        assert_eq!(config.keep_alive_timeout, Some(Duration::from_secs(90)));
        assert_eq!(config.connection_ack_timeout, CONNECTION_ACK_TIMEOUT);
        assert_eq!(config.start_ack_timeout, START_ACK_TIMEOUT);
        assert_eq!(config.close_grace, Duration::from_millis(10));
        config.validate().unwrap();
    }

    #[test]
    fn keep_alive_below_server_minimum_is_rejected() {
        let config = RealtimeConfig::new(ENDPOINT, AuthMode::api_key("k"))
            .with_keep_alive_timeout(Duration::from_secs(59));
        assert!(matches!(config.validate(), Err(RealtimeError::Config(_))));

        let config = RealtimeConfig::new(ENDPOINT, AuthMode::api_key("k"))
            .with_keep_alive_timeout(SERVER_KEEP_ALIVE_TIMEOUT);
        config.validate().unwrap();
    }

    #[test]
    fn empty_endpoint_is_rejected() {
        let config = RealtimeConfig::new("  ", AuthMode::api_key("k"));
        assert!(config.validate().is_err());
    }
}
