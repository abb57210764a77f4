//! Realtime frames for the legacy `graphql-ws` sub-protocol.
//!
//! Frames are JSON objects discriminated by `type`:
//!
//! ```text
//! client → server: connection_init, start, stop
//! server → client: connection_ack, connection_error, start_ack, data,
//!                  ka, complete, error
//! ```

use crate::error::ProtocolResult;
use crate::operation::GraphQLOperation;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Payload of a `start` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartPayload {
    /// JSON-encoded `{query, variables}` string.
    pub data: String,
    /// Carries the signed authorization headers.
    pub extensions: Value,
}

/// Frames sent by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Opens the protocol session.
    ConnectionInit,
    /// Starts one subscription.
    Start {
        /// Subscription id.
        id: String,
        /// Request and authorization.
        payload: StartPayload,
    },
    /// Stops one subscription.
    Stop {
        /// Subscription id.
        id: String,
    },
}

impl ClientMessage {
    /// Builds a `start` frame for `operation` authorized by `headers`.
    pub fn start(id: impl Into<String>, operation: &GraphQLOperation, headers: Map<String, Value>) -> Self {
        Self::Start {
            id: id.into(),
            payload: StartPayload {
                data: operation.request_body().to_string(),
                extensions: serde_json::json!({ "authorization": Value::Object(headers) }),
            },
        }
    }

    /// Serializes the frame.
    pub fn to_json(&self) -> ProtocolResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Frames sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Handshake accepted.
    ConnectionAck {
        /// Carries `connectionTimeoutMs`.
        #[serde(default)]
        payload: Value,
    },
    /// Handshake rejected.
    ConnectionError {
        /// Carries `errors`.
        #[serde(default)]
        payload: Value,
    },
    /// Subscription registered.
    StartAck {
        /// Subscription id.
        id: String,
    },
    /// Subscription data.
    Data {
        /// Subscription id.
        id: String,
        /// GraphQL result.
        #[serde(default)]
        payload: Value,
    },
    /// Keep-alive heartbeat.
    Ka,
    /// Subscription finished on the server.
    Complete {
        /// Subscription id.
        id: String,
    },
    /// Subscription or connection error.
    Error {
        /// Subscription id; absent for connection-level errors.
        #[serde(default)]
        id: Option<String>,
        /// Carries `errors`.
        #[serde(default)]
        payload: Value,
    },
}

impl ServerMessage {
    /// Parses a frame.
    pub fn from_json(text: &str) -> ProtocolResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// The server-advertised keep-alive window from a `connection_ack`.
    pub fn connection_timeout_ms(&self) -> Option<u64> {
        match self {
            Self::ConnectionAck { payload } => {
                payload.get("connectionTimeoutMs").and_then(Value::as_u64)
            }
            _ => None,
        }
    }

    /// The first `errorType` / `errorCode` pair in an error payload.
    pub fn error_details(&self) -> Option<(Option<String>, Option<u16>)> {
        let payload = match self {
            Self::ConnectionError { payload } | Self::Error { payload, .. } => payload,
            _ => return None,
        };
        let first = payload.get("errors").and_then(|errors| errors.get(0))?;
        let error_type = first
            .get("errorType")
            .and_then(Value::as_str)
            .map(str::to_string);
        let error_code = first
            .get("errorCode")
            .and_then(Value::as_u64)
            .and_then(|code| u16::try_from(code).ok());
        Some((error_type, error_code))
    }
}
