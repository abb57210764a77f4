//! Error types for the realtime transport.

use gqlsync_protocol::ProtocolError;
use gqlsync_signer::SignerError;
use thiserror::Error;

/// Result type for realtime operations.
pub type RealtimeResult<T> = Result<T, RealtimeError>;

/// Error type reported to subscriptions when the keep-alive window lapses.
pub const TIMEOUT_DISCONNECT: &str = "TIMEOUT_DISCONNECT";

/// Errors that can occur in the realtime transport.
///
/// Errors are `Clone` so one connection failure can be delivered to every
/// subscriber waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RealtimeError {
    /// Invalid configuration, raised before any network activity.
    #[error("invalid realtime configuration: {0}")]
    Config(String),

    /// Signing the handshake or a start frame failed.
    #[error("signing failed: {0}")]
    Signer(#[from] SignerError),

    /// A token provider failed.
    #[error("token unavailable: {0}")]
    Token(String),

    /// A frame could not be encoded or decoded.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The socket could not be opened.
    #[error("connection failed: {message}")]
    Connect {
        /// Error message.
        message: String,
        /// HTTP-style status, if the failure carried one.
        status: Option<u16>,
    },

    /// The server rejected the handshake.
    #[error("connection rejected: {}", .error_type.as_deref().unwrap_or("unknown error"))]
    ConnectionRejected {
        /// Server error type.
        error_type: Option<String>,
        /// Server error code.
        status: Option<u16>,
    },

    /// No `connection_ack` arrived in time.
    #[error("connection ack not received within {0} ms")]
    ConnectionAckTimeout(u64),

    /// No `start_ack` arrived in time.
    #[error("start ack for subscription {0} not received in time")]
    StartAckTimeout(String),

    /// The server reported an error for one subscription.
    #[error("subscription {subscription_id} failed: {}", .error_type.as_deref().unwrap_or("unknown error"))]
    Subscription {
        /// Subscription id.
        subscription_id: String,
        /// Server error type.
        error_type: Option<String>,
        /// Server error code.
        status: Option<u16>,
    },

    /// No keep-alive arrived within the keep-alive window.
    #[error("connection timed out (TIMEOUT_DISCONNECT)")]
    KeepAliveTimeout,

    /// The socket closed underneath an operation.
    #[error("socket closed: {0}")]
    Closed(String),
}

impl RealtimeError {
    /// Creates a connect error.
    pub fn connect(message: impl Into<String>, status: Option<u16>) -> Self {
        Self::Connect {
            message: message.into(),
            status,
        }
    }

    /// Creates a socket-closed error.
    pub fn closed(message: impl Into<String>) -> Self {
        Self::Closed(message.into())
    }

    /// Status code carried by the error, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Connect { status, .. }
            | Self::ConnectionRejected { status, .. }
            | Self::Subscription { status, .. } => *status,
            _ => None,
        }
    }

    /// Returns true if establishing the connection again may succeed.
    pub fn is_retryable(&self) -> bool {
        if matches!(self.status_code(), Some(400 | 401 | 403)) {
            return false;
        }
        matches!(
            self,
            Self::Connect { .. }
                | Self::ConnectionRejected { .. }
                | Self::ConnectionAckTimeout(_)
                | Self::Closed(_)
        )
    }
}

impl From<ProtocolError> for RealtimeError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::InvalidEndpoint(endpoint) => {
                Self::Config(format!("invalid endpoint {endpoint}"))
            }
            other => Self::Protocol(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_class_status_codes_are_not_retryable() {
        for status in [400, 401, 403] {
            assert!(!RealtimeError::connect("denied", Some(status)).is_retryable());
            let rejected = RealtimeError::ConnectionRejected {
                error_type: Some("UnauthorizedException".into()),
                status: Some(status),
            };
            assert!(!rejected.is_retryable());
        }
    }

    #[test]
    fn transient_errors_are_retryable() {
        assert!(RealtimeError::connect("reset", None).is_retryable());
        assert!(RealtimeError::connect("bad gateway", Some(502)).is_retryable());
        assert!(RealtimeError::ConnectionAckTimeout(15_000).is_retryable());
        assert!(RealtimeError::closed("eof").is_retryable());
    }

    #[test]
    fn subscription_level_errors_are_terminal() {
        assert!(!RealtimeError::StartAckTimeout("s1".into()).is_retryable());
        assert!(!RealtimeError::KeepAliveTimeout.is_retryable());
        assert!(!RealtimeError::Config("x".into()).is_retryable());
    }

    #[test]
    fn error_display() {
        assert_eq!(
            RealtimeError::KeepAliveTimeout.to_string(),
            "connection timed out (TIMEOUT_DISCONNECT)"
        );
        let err = RealtimeError::Subscription {
            subscription_id: "s1".into(),
            error_type: None,
            status: None,
        };
        assert_eq!(err.to_string(), "subscription s1 failed: unknown error");
    }

    #[test]
    fn protocol_errors_convert() {
        let err: RealtimeError = ProtocolError::InvalidEndpoint("ftp://x".into()).into();
        assert!(matches!(err, RealtimeError::Config(_)));
    }
}
