//! Error types for protocol handling.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur while encoding or decoding protocol data.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A frame or payload was not valid JSON or had the wrong shape.
    #[error("malformed frame: {0}")]
    MalformedFrame(#[from] serde_json::Error),

    /// The endpoint URL cannot be turned into a realtime URL.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = ProtocolError::InvalidEndpoint("ftp://x".into());
        assert_eq!(err.to_string(), "invalid endpoint: ftp://x");

        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = ProtocolError::from(json_err);
        assert!(err.to_string().starts_with("malformed frame"));
    }
}
