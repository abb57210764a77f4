//! Error types for request signing.

use thiserror::Error;

/// Result type for signing operations.
pub type SignerResult<T> = Result<T, SignerError>;

/// Errors that can occur while signing a request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignerError {
    /// The request URL could not be parsed.
    #[error("malformed url: {0}")]
    MalformedUrl(String),

    /// Neither the caller nor the host supplied a region.
    #[error("cannot determine signing region for host {0}")]
    MissingRegion(String),

    /// Neither the caller nor the host supplied a service name.
    #[error("cannot determine signing service for host {0}")]
    MissingService(String),

    /// The credentials collaborator failed to produce credentials.
    #[error("credentials unavailable: {0}")]
    Credentials(String),
}

impl SignerError {
    /// Creates a malformed URL error.
    pub fn malformed_url(url: impl Into<String>) -> Self {
        Self::MalformedUrl(url.into())
    }
}
