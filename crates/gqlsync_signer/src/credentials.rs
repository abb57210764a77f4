//! Credentials and the credentials collaborator.

use crate::error::{SignerError, SignerResult};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use std::fmt;

/// A credential tuple used to sign requests.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Access key id (public part).
    pub access_key_id: String,
    /// Secret access key.
    pub secret_access_key: String,
    /// Optional session token for temporary credentials.
    pub session_token: Option<String>,
    /// When temporary credentials stop being valid.
    pub expiration: Option<DateTime<Utc>>,
}

impl Credentials {
    /// Creates long-lived credentials.
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token: None,
            expiration: None,
        }
    }

    /// Sets the session token.
    #[must_use]
    pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(token.into());
        self
    }

    /// Sets the expiration time.
    #[must_use]
    pub fn with_expiration(mut self, expiration: DateTime<Utc>) -> Self {
        self.expiration = Some(expiration);
        self
    }

    /// Returns true if the credentials expire within `margin` of `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        match self.expiration {
            Some(expiration) => expiration - margin <= now,
            None => false,
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .field("expiration", &self.expiration)
            .finish()
    }
}

/// Supplies credentials, possibly asynchronously.
///
/// Implementations may call out to an identity service; the signer only
/// awaits the result.
#[async_trait]
pub trait CredentialsProvider: Send + Sync {
    /// Resolves the current credentials.
    async fn credentials(&self) -> SignerResult<Credentials>;
}

/// A provider that always yields the same credentials.
#[derive(Debug, Clone)]
pub struct StaticCredentials(Credentials);

impl StaticCredentials {
    /// Wraps fixed credentials.
    pub fn new(credentials: Credentials) -> Self {
        Self(credentials)
    }
}

#[async_trait]
impl CredentialsProvider for StaticCredentials {
    async fn credentials(&self) -> SignerResult<Credentials> {
        Ok(self.0.clone())
    }
}

#[async_trait]
impl<F> CredentialsProvider for F
where
    F: Fn() -> SignerResult<Credentials> + Send + Sync,
{
    async fn credentials(&self) -> SignerResult<Credentials> {
        self()
    }
}

/// Caches credentials from an inner provider until they are about to expire.
pub struct CachedCredentials<P> {
    inner: P,
    cached: RwLock<Option<Credentials>>,
    refresh_margin: Duration,
}

impl<P: CredentialsProvider> CachedCredentials<P> {
    /// Wraps a provider, refreshing five minutes before expiration.
    pub fn new(inner: P) -> Self {
        Self {
            inner,
            cached: RwLock::new(None),
            refresh_margin: Duration::minutes(5),
        }
    }

    /// Drops the cached credentials so the next call refreshes.
    pub fn invalidate(&self) {
        *self.cached.write() = None;
    }
}

#[async_trait]
impl<P: CredentialsProvider> CredentialsProvider for CachedCredentials<P> {
    async fn credentials(&self) -> SignerResult<Credentials> {
        if let Some(cached) = self.cached.read().as_ref() {
            if !cached.is_expired_at(Utc::now(), self.refresh_margin) {
                return Ok(cached.clone());
            }
        }

        let fresh = self.inner.credentials().await?;
        if fresh.access_key_id.is_empty() || fresh.secret_access_key.is_empty() {
            return Err(SignerError::Credentials("provider returned empty keys".into()));
        }
        *self.cached.write() = Some(fresh.clone());
        Ok(fresh)
    }
}
