//! The WebSocket seam.
//!
//! The transport never touches a socket library directly. A
//! [`WebSocketConnector`] opens a connection and hands back a pair of
//! channels; the connector's own task pumps frames between those channels
//! and the wire.

use crate::error::{RealtimeError, RealtimeResult};
use async_trait::async_trait;
use gqlsync_protocol::{ClientMessage, Value};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Close code for a normal closure.
pub const NORMAL_CLOSURE: u16 = 1000;

/// A command sent to the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketCommand {
    /// Sends a text frame.
    Text(String),
    /// Closes the socket.
    Close {
        /// Close code.
        code: u16,
        /// Close reason.
        reason: String,
    },
}

/// An event received from the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    /// A text frame arrived.
    Text(String),
    /// The socket closed.
    Closed {
        /// Close code.
        code: u16,
        /// Close reason.
        reason: String,
    },
    /// The socket failed.
    Error(String),
}

/// An open connection.
#[derive(Debug)]
pub struct SocketChannel {
    /// Commands toward the wire.
    pub outgoing: mpsc::UnboundedSender<SocketCommand>,
    /// Events from the wire.
    pub incoming: mpsc::UnboundedReceiver<SocketEvent>,
    /// Bytes accepted but not yet written to the wire.
    pub buffered: Arc<AtomicUsize>,
}

/// Opens WebSocket connections.
#[async_trait]
pub trait WebSocketConnector: Send + Sync {
    /// Connects to `url` negotiating `protocol`.
    async fn connect(&self, url: &str, protocol: &str) -> RealtimeResult<SocketChannel>;
}

/// A connector whose "server" side is driven by test code.
///
/// Each successful `connect` produces a [`MockServerSocket`], retrieved with
/// [`accept`](Self::accept).
#[derive(Debug)]
pub struct MockConnector {
    attempts: AtomicUsize,
    failures: Mutex<VecDeque<RealtimeError>>,
    accepted_tx: mpsc::UnboundedSender<MockServerSocket>,
    accepted_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<MockServerSocket>>,
}

impl MockConnector {
    /// Creates a connector that accepts every connection.
    pub fn new() -> Self {
        let (accepted_tx, accepted_rx) = mpsc::unbounded_channel();
        Self {
            attempts: AtomicUsize::new(0),
            failures: Mutex::new(VecDeque::new()),
            accepted_tx,
            accepted_rx: tokio::sync::Mutex::new(accepted_rx),
        }
    }

    /// Number of connect attempts so far, failed ones included.
    pub fn connect_count(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Makes the next connect attempt fail with `error`.
    pub fn fail_next(&self, error: RealtimeError) {
        self.failures.lock().push_back(error);
    }

    /// Waits for the next accepted connection.
    pub async fn accept(&self) -> Option<MockServerSocket> {
        self.accepted_rx.lock().await.recv().await
    }
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WebSocketConnector for MockConnector {
    async fn connect(&self, url: &str, protocol: &str) -> RealtimeResult<SocketChannel> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.failures.lock().pop_front() {
            return Err(error);
        }

        let (outgoing, commands) = mpsc::unbounded_channel();
        let (events, incoming) = mpsc::unbounded_channel();
        let buffered = Arc::new(AtomicUsize::new(0));
        let server = MockServerSocket {
            url: url.to_string(),
            protocol: protocol.to_string(),
            commands,
            events,
            buffered: buffered.clone(),
        };
        self.accepted_tx
            .send(server)
            .map_err(|_| RealtimeError::connect("mock connector dropped", None))?;

        Ok(SocketChannel {
            outgoing,
            incoming,
            buffered,
        })
    }
}

/// The server end of a mock connection.
#[derive(Debug)]
pub struct MockServerSocket {
    /// URL the client connected to.
    pub url: String,
    /// Negotiated sub-protocol.
    pub protocol: String,
    commands: mpsc::UnboundedReceiver<SocketCommand>,
    events: mpsc::UnboundedSender<SocketEvent>,
    buffered: Arc<AtomicUsize>,
}

impl MockServerSocket {
    /// Receives the next raw command from the client.
    pub async fn recv(&mut self) -> Option<SocketCommand> {
        self.commands.recv().await
    }

    /// Receives the next client frame, or `None` once the client closed.
    pub async fn recv_message(&mut self) -> Option<ClientMessage> {
        loop {
            match self.recv().await? {
                SocketCommand::Text(text) => {
                    if let Ok(message) = serde_json::from_str(&text) {
                        return Some(message);
                    }
                }
                SocketCommand::Close { .. } => return None,
            }
        }
    }

    /// Returns a command if one is already queued.
    pub fn try_recv(&mut self) -> Option<SocketCommand> {
        self.commands.try_recv().ok()
    }

    /// Sends a raw text frame.
    pub fn send_text(&self, text: impl Into<String>) {
        let _ = self.events.send(SocketEvent::Text(text.into()));
    }

    /// Sends a JSON frame.
    pub fn send_json(&self, frame: &Value) {
        self.send_text(frame.to_string());
    }

    /// Sends `connection_ack`.
    pub fn ack(&self, connection_timeout_ms: u64) {
        self.send_json(&json!({
            "type": "connection_ack",
            "payload": { "connectionTimeoutMs": connection_timeout_ms }
        }));
    }

    /// Sends `start_ack`.
    pub fn start_ack(&self, id: &str) {
        self.send_json(&json!({ "type": "start_ack", "id": id }));
    }

    /// Sends a data frame.
    pub fn data(&self, id: &str, payload: Value) {
        self.send_json(&json!({ "type": "data", "id": id, "payload": payload }));
    }

    /// Sends a keep-alive.
    pub fn keep_alive(&self) {
        self.send_json(&json!({ "type": "ka" }));
    }

    /// Sends a subscription error.
    pub fn error(&self, id: &str, error_type: &str) {
        self.send_json(&json!({
            "type": "error",
            "id": id,
            "payload": { "errors": [{ "errorType": error_type, "message": error_type }] }
        }));
    }

    /// Sends `complete`.
    pub fn complete(&self, id: &str) {
        self.send_json(&json!({ "type": "complete", "id": id }));
    }

    /// Closes the connection from the server side.
    pub fn close(&self, code: u16, reason: &str) {
        let _ = self.events.send(SocketEvent::Closed {
            code,
            reason: reason.to_string(),
        });
    }

    /// Simulates unsent bytes in the client's send buffer.
    pub fn set_buffered(&self, bytes: usize) {
        self.buffered.store(bytes, Ordering::SeqCst);
    }
}
