//! A scripted realtime server.
//!
//! [`RealtimeServer`] owns the [`MockConnector`] handed to the client and
//! drives the server side of each connection through [`ServerSession`].

use gqlsync_protocol::{ClientMessage, StartPayload, Value};
use gqlsync_realtime::{MockConnector, MockServerSocket};
use serde_json::{json, Map};
use std::sync::Arc;
use std::time::Duration;

/// How long helpers wait for the client before failing the test.
pub const WAIT: Duration = Duration::from_secs(5);

/// Keep-alive advertised by [`RealtimeServer::accept`].
pub const DEFAULT_CONNECTION_TIMEOUT_MS: u64 = 300_000;

/// The server side of every connection a client opens.
#[derive(Debug, Clone, Default)]
pub struct RealtimeServer {
    connector: Arc<MockConnector>,
}

impl RealtimeServer {
    /// Creates a server with no connections.
    pub fn new() -> Self {
        Self::default()
    }

    /// The connector to give the client.
    pub fn connector(&self) -> Arc<MockConnector> {
        self.connector.clone()
    }

    /// Number of connect attempts the client made.
    pub fn connect_count(&self) -> usize {
        self.connector.connect_count()
    }

    /// Accepts the next connection and acknowledges it with the default
    /// keep-alive.
    pub async fn accept(&self) -> ServerSession {
        self.accept_with_timeout(DEFAULT_CONNECTION_TIMEOUT_MS).await
    }

    /// Accepts the next connection, expects `connection_init`, and replies
    /// with `connection_ack` advertising `connection_timeout_ms`.
    ///
    /// # Panics
    ///
    /// Panics if the client does not connect or initialize within [`WAIT`].
    pub async fn accept_with_timeout(&self, connection_timeout_ms: u64) -> ServerSession {
        let socket = tokio::time::timeout(WAIT, self.connector.accept())
            .await
            .expect("client did not connect")
            .expect("connector closed");
        let mut session = ServerSession { socket };
        match session.next_message().await {
            Some(ClientMessage::ConnectionInit) => {}
            other => panic!("expected connection_init, got {other:?}"),
        }
        session.socket.ack(connection_timeout_ms);
        session
    }
}

/// One accepted connection.
#[derive(Debug)]
pub struct ServerSession {
    socket: MockServerSocket,
}

impl ServerSession {
    /// URL the client connected to.
    pub fn url(&self) -> &str {
        &self.socket.url
    }

    /// Sub-protocol the client negotiated.
    pub fn protocol(&self) -> &str {
        &self.socket.protocol
    }

    /// The raw socket, for frames the helpers do not cover.
    pub fn socket(&mut self) -> &mut MockServerSocket {
        &mut self.socket
    }

    /// Waits for the next client frame.
    ///
    /// # Panics
    ///
    /// Panics if nothing arrives within [`WAIT`].
    pub async fn next_message(&mut self) -> Option<ClientMessage> {
        tokio::time::timeout(WAIT, self.socket.recv_message())
            .await
            .expect("client sent nothing")
    }

    /// Expects a `start` frame and returns its id and payload.
    pub async fn expect_start(&mut self) -> (String, StartPayload) {
        match self.next_message().await {
            Some(ClientMessage::Start { id, payload }) => (id, payload),
            other => panic!("expected start, got {other:?}"),
        }
    }

    /// Expects a `start` frame, acknowledges it, and returns its id.
    pub async fn accept_start(&mut self) -> String {
        let (id, _) = self.expect_start().await;
        self.socket.start_ack(&id);
        id
    }

    /// Expects a `stop` frame and returns its id.
    pub async fn expect_stop(&mut self) -> String {
        match self.next_message().await {
            Some(ClientMessage::Stop { id }) => id,
            other => panic!("expected stop, got {other:?}"),
        }
    }

    /// Publishes `value` under `root_field` to subscription `id`.
    pub fn publish(&self, id: &str, root_field: &str, value: Value) {
        let mut data = Map::new();
        data.insert(root_field.to_string(), value);
        self.socket.data(id, json!({ "data": Value::Object(data) }));
    }

    /// Sends a keep-alive.
    pub fn keep_alive(&self) {
        self.socket.keep_alive();
    }

    /// Fails subscription `id` with `error_type`.
    pub fn fail(&self, id: &str, error_type: &str) {
        self.socket.error(id, error_type);
    }
}
