//! # gqlsync Realtime
//!
//! One shared WebSocket carrying many GraphQL subscriptions.
//!
//! This crate provides:
//! - [`RealtimeTransport`] - the socket state machine (CLOSED, CONNECTING, READY)
//! - [`SubscriptionHandle`] - one logical subscription with an explicit `cancel()`
//! - [`AuthMode`] - handshake and start-frame authorization per auth mode
//! - [`RetryConfig`] - a pure backoff policy shared with the mutation outbox
//! - [`WebSocketConnector`] - the socket seam, with [`MockConnector`] for tests
//!
//! ## Handshake
//!
//! ```text
//! client                          server
//!   | -- connection_init ---------> |
//!   | <-------- connection_ack ---- |   payload.connectionTimeoutMs
//!   | -- start {id, payload} -----> |
//!   | <--------------- start_ack -- |
//!   | <-------------------- data -- |
//!   | <---------------------- ka -- |   resets the keep-alive timer
//!   | -- stop {id} ---------------> |
//! ```
//!
//! The socket is opened on the first subscription and closed with code 1000
//! once the last one is gone, after a short grace window.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod auth;
mod config;
mod error;
mod retry;
mod socket;
mod transport;

pub use auth::{AuthMode, AuthTarget, StaticToken, TokenProvider};
pub use config::{
    RealtimeConfig, CLOSE_GRACE, CONNECTION_ACK_TIMEOUT, DEFAULT_KEEP_ALIVE_TIMEOUT,
    DRAIN_RETRY_INTERVAL, SERVER_KEEP_ALIVE_TIMEOUT, START_ACK_TIMEOUT,
};
pub use error::{RealtimeError, RealtimeResult, TIMEOUT_DISCONNECT};
pub use retry::{RetryConfig, RetryDecision, Retryable};
pub use socket::{
    MockConnector, MockServerSocket, SocketChannel, SocketCommand, SocketEvent,
    WebSocketConnector, NORMAL_CLOSURE,
};
pub use transport::{
    RealtimeTransport, SocketStatus, SubscriptionEvent, SubscriptionHandle, SubscriptionState,
};
