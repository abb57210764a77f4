//! The shared-socket state machine.

use crate::auth::AuthTarget;
use crate::config::{RealtimeConfig, DEFAULT_KEEP_ALIVE_TIMEOUT, DRAIN_RETRY_INTERVAL};
use crate::error::{RealtimeError, RealtimeResult};
use crate::retry::RetryDecision;
use crate::socket::{SocketChannel, SocketCommand, SocketEvent, WebSocketConnector, NORMAL_CLOSURE};
use gqlsync_protocol::{
    realtime_url_with_auth, ClientMessage, GraphQLOperation, ServerMessage, Value,
    REALTIME_PROTOCOL,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// State of the shared socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketStatus {
    /// No socket.
    Closed,
    /// Opening the socket or waiting for `connection_ack`.
    Connecting,
    /// Handshake complete.
    Ready,
}

/// State of one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    /// Waiting for the socket or for `start_ack`.
    Pending,
    /// `start_ack` received.
    Connected,
    /// The subscription failed and was removed.
    Failed,
}

/// Delivered to a subscription's observer.
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionEvent {
    /// The server acknowledged the subscription.
    Connected,
    /// A data frame payload.
    Data(Value),
    /// The subscription failed; no further events follow.
    Error(RealtimeError),
}

struct Registration {
    operation: GraphQLOperation,
    state: watch::Sender<SubscriptionState>,
    events: mpsc::UnboundedSender<SubscriptionEvent>,
    start_ack_timer: Option<JoinHandle<()>>,
}

impl Registration {
    fn fail(mut self, error: RealtimeError) {
        if let Some(timer) = self.start_ack_timer.take() {
            timer.abort();
        }
        let _ = self.state.send(SubscriptionState::Failed);
        let _ = self.events.send(SubscriptionEvent::Error(error));
    }
}

struct SocketState {
    status: SocketStatus,
    session: u64,
    outgoing: Option<mpsc::UnboundedSender<SocketCommand>>,
    buffered: Option<Arc<AtomicUsize>>,
    keep_alive: Duration,
    waiters: Vec<oneshot::Sender<RealtimeResult<()>>>,
    subscriptions: HashMap<String, Registration>,
    keep_alive_timer: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
    close_timer: Option<JoinHandle<()>>,
}

impl SocketState {
    fn new() -> Self {
        Self {
            status: SocketStatus::Closed,
            session: 0,
            outgoing: None,
            buffered: None,
            keep_alive: DEFAULT_KEEP_ALIVE_TIMEOUT,
            waiters: Vec::new(),
            subscriptions: HashMap::new(),
            keep_alive_timer: None,
            reader: None,
            close_timer: None,
        }
    }

    fn send(&self, message: &ClientMessage) -> RealtimeResult<()> {
        let outgoing = self
            .outgoing
            .as_ref()
            .ok_or_else(|| RealtimeError::closed("socket not open"))?;
        outgoing
            .send(SocketCommand::Text(message.to_json()?))
            .map_err(|_| RealtimeError::closed("socket writer gone"))
    }

    /// Drops the socket, returning the registrations it carried.
    fn teardown(&mut self, reason: &str) -> Vec<Registration> {
        self.status = SocketStatus::Closed;
        if let Some(outgoing) = self.outgoing.take() {
            let _ = outgoing.send(SocketCommand::Close {
                code: NORMAL_CLOSURE,
                reason: reason.to_string(),
            });
        }
        self.buffered = None;
        for timer in [self.keep_alive_timer.take(), self.close_timer.take()]
            .into_iter()
            .flatten()
        {
            timer.abort();
        }
        self.reader.take();
        self.subscriptions.drain().map(|(_, reg)| reg).collect()
    }
}

struct Inner {
    config: RealtimeConfig,
    connector: Arc<dyn WebSocketConnector>,
    state: Mutex<SocketState>,
}

/// One WebSocket shared by any number of subscriptions.
///
/// Cloning is cheap; clones share the socket.
///
/// # Example
///
/// ```rust,no_run
/// use gqlsync_protocol::GraphQLOperation;
/// use gqlsync_realtime::{AuthMode, MockConnector, RealtimeConfig, RealtimeTransport};
/// use std::sync::Arc;
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let config = RealtimeConfig::new("https://api.example.com/graphql", AuthMode::api_key("k"));
/// let transport = RealtimeTransport::new(config, Arc::new(MockConnector::new()))?;
///
/// let mut subscription = transport.subscribe(GraphQLOperation::subscription(
///     "subscription { onCreateTodo { id } }",
///     "onCreateTodo",
/// ));
/// while let Some(event) = subscription.next().await {
///     println!("{event:?}");
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RealtimeTransport {
    inner: Arc<Inner>,
}

impl RealtimeTransport {
    /// Creates a transport. No connection is made until the first subscribe.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the configuration is invalid.
    pub fn new(
        config: RealtimeConfig,
        connector: Arc<dyn WebSocketConnector>,
    ) -> RealtimeResult<Self> {
        config.validate()?;
        let mut state = SocketState::new();
        if let Some(keep_alive) = config.keep_alive_timeout {
            state.keep_alive = keep_alive;
        }
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                connector,
                state: Mutex::new(state),
            }),
        })
    }

    fn from_weak(weak: &Weak<Inner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    fn weak(&self) -> Weak<Inner> {
        Arc::downgrade(&self.inner)
    }

    /// Returns the configuration.
    pub fn config(&self) -> &RealtimeConfig {
        &self.inner.config
    }

    /// Returns the socket status.
    pub fn status(&self) -> SocketStatus {
        self.inner.state.lock().status
    }

    /// Returns the keep-alive window in force.
    pub fn keep_alive_timeout(&self) -> Duration {
        self.inner.state.lock().keep_alive
    }

    /// Number of live subscription registrations.
    pub fn subscription_count(&self) -> usize {
        self.inner.state.lock().subscriptions.len()
    }

    /// Starts a subscription.
    ///
    /// Returns immediately; connection and `start` happen in a background
    /// task. Must be called within a Tokio runtime.
    pub fn subscribe(&self, operation: GraphQLOperation) -> SubscriptionHandle {
        let id = uuid::Uuid::new_v4().to_string();
        let (state_tx, state_rx) = watch::channel(SubscriptionState::Pending);
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        {
            let mut state = self.inner.state.lock();
            if let Some(timer) = state.close_timer.take() {
                timer.abort();
            }
            state.subscriptions.insert(
                id.clone(),
                Registration {
                    operation,
                    state: state_tx,
                    events: events_tx,
                    start_ack_timer: None,
                },
            );
        }
        debug!(subscription_id = %id, "subscription registered");

        tokio::spawn(self.clone().start_subscription(id.clone()));

        SubscriptionHandle {
            id,
            events: events_rx,
            state: state_rx,
            transport: self.clone(),
        }
    }

    async fn start_subscription(self, id: String) {
        if let Err(err) = self.ensure_connected().await {
            self.fail_subscription(&id, err);
            return;
        }

        let operation = self
            .inner
            .state
            .lock()
            .subscriptions
            .get(&id)
            .map(|reg| reg.operation.clone());
        let Some(operation) = operation else {
            self.schedule_idle_close();
            return;
        };

        let data = operation.request_body().to_string();
        let headers = match self
            .inner
            .config
            .auth
            .headers(
                &self.inner.config.graphql_endpoint,
                self.inner.config.region.as_deref(),
                AuthTarget::Start { data: &data },
            )
            .await
        {
            Ok(headers) => headers,
            Err(err) => {
                self.fail_subscription(&id, err);
                return;
            }
        };
        let frame = ClientMessage::start(id.clone(), &operation, headers);

        let mut state = self.inner.state.lock();
        if !state.subscriptions.contains_key(&id) {
            return;
        }
        if let Err(err) = state.send(&frame) {
            drop(state);
            self.fail_subscription(&id, err);
            return;
        }

        let weak = self.weak();
        let timeout = self.inner.config.start_ack_timeout;
        let timer_id = id.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(transport) = Self::from_weak(&weak) {
                transport.on_start_ack_timeout(&timer_id);
            }
        });
        if let Some(reg) = state.subscriptions.get_mut(&id) {
            reg.start_ack_timer = Some(timer);
        }
        debug!(subscription_id = %id, "start sent");
    }

    fn on_start_ack_timeout(&self, id: &str) {
        let pending = {
            let state = self.inner.state.lock();
            state
                .subscriptions
                .get(id)
                .is_some_and(|reg| *reg.state.borrow() == SubscriptionState::Pending)
        };
        if pending {
            warn!(subscription_id = %id, "start ack timed out");
            self.fail_subscription(id, RealtimeError::StartAckTimeout(id.to_string()));
        }
    }

    /// Removes a registration and reports `error` to its observer.
    fn fail_subscription(&self, id: &str, error: RealtimeError) {
        let removed = self.inner.state.lock().subscriptions.remove(id);
        if let Some(reg) = removed {
            warn!(subscription_id = %id, error = %error, "subscription failed");
            reg.fail(error);
        }
        self.schedule_idle_close();
    }

    /// Resolves once the socket is READY. Concurrent callers share one
    /// connection attempt and all see its outcome.
    async fn ensure_connected(&self) -> RealtimeResult<()> {
        let waiter = {
            let mut state = self.inner.state.lock();
            match state.status {
                SocketStatus::Ready => return Ok(()),
                SocketStatus::Connecting => {
                    let (tx, rx) = oneshot::channel();
                    state.waiters.push(tx);
                    Some(rx)
                }
                SocketStatus::Closed => {
                    state.status = SocketStatus::Connecting;
                    None
                }
            }
        };

        if let Some(rx) = waiter {
            return rx
                .await
                .unwrap_or_else(|_| Err(RealtimeError::closed("connection attempt abandoned")));
        }

        let result = self.connect_with_retry().await;
        let waiters = {
            let mut state = self.inner.state.lock();
            if result.is_err() {
                state.status = SocketStatus::Closed;
            }
            std::mem::take(&mut state.waiters)
        };
        for waiter in waiters {
            let _ = waiter.send(result.clone());
        }
        result
    }

    async fn connect_with_retry(&self) -> RealtimeResult<()> {
        let mut attempt = 0u32;
        loop {
            match self.connect_once().await {
                Ok(()) => return Ok(()),
                Err(err) => match self.inner.config.retry.decide_jittered(attempt, &err) {
                    RetryDecision::RetryAfter(delay) => {
                        warn!(
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %err,
                            "realtime connection failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    RetryDecision::Stop => {
                        error!(attempt, error = %err, "realtime connection failed");
                        return Err(err);
                    }
                },
            }
        }
    }

    async fn connect_once(&self) -> RealtimeResult<()> {
        let config = &self.inner.config;
        let headers = config
            .auth
            .headers(
                &config.graphql_endpoint,
                config.region.as_deref(),
                AuthTarget::Handshake,
            )
            .await?;
        let url = realtime_url_with_auth(&config.graphql_endpoint, &Value::Object(headers))?;

        info!(auth = config.auth.name(), "opening realtime socket");
        let SocketChannel {
            outgoing,
            mut incoming,
            buffered,
        } = self.inner.connector.connect(&url, REALTIME_PROTOCOL).await?;

        outgoing
            .send(SocketCommand::Text(ClientMessage::ConnectionInit.to_json()?))
            .map_err(|_| RealtimeError::closed("socket writer gone"))?;

        let ack_timeout = config.connection_ack_timeout;
        let advertised = match tokio::time::timeout(ack_timeout, await_ack(&mut incoming)).await {
            Ok(Ok(advertised)) => advertised,
            Ok(Err(err)) => {
                let _ = outgoing.send(SocketCommand::Close {
                    code: NORMAL_CLOSURE,
                    reason: "handshake failed".into(),
                });
                return Err(err);
            }
            Err(_) => {
                let _ = outgoing.send(SocketCommand::Close {
                    code: NORMAL_CLOSURE,
                    reason: "connection ack timeout".into(),
                });
                return Err(RealtimeError::ConnectionAckTimeout(
                    ack_timeout.as_millis() as u64,
                ));
            }
        };

        let keep_alive = config
            .keep_alive_timeout
            .or(advertised.map(Duration::from_millis))
            .unwrap_or(DEFAULT_KEEP_ALIVE_TIMEOUT);

        let mut state = self.inner.state.lock();
        state.session += 1;
        state.status = SocketStatus::Ready;
        state.outgoing = Some(outgoing);
        state.buffered = Some(buffered);
        state.keep_alive = keep_alive;
        let session = state.session;
        state.reader = Some(tokio::spawn(read_loop(self.weak(), session, incoming)));
        self.restart_keep_alive(&mut state);
        info!(
            session,
            keep_alive_ms = keep_alive.as_millis() as u64,
            "realtime socket ready"
        );
        Ok(())
    }

    fn restart_keep_alive(&self, state: &mut SocketState) {
        if let Some(timer) = state.keep_alive_timer.take() {
            timer.abort();
        }
        let weak = self.weak();
        let session = state.session;
        let window = state.keep_alive;
        state.keep_alive_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(window).await;
            if let Some(transport) = Self::from_weak(&weak) {
                transport.on_keep_alive_expired(session);
            }
        }));
    }

    fn on_keep_alive_expired(&self, session: u64) {
        let registrations = {
            let mut state = self.inner.state.lock();
            if state.session != session || state.status != SocketStatus::Ready {
                return;
            }
            // The expiring timer is the running task.
            state.keep_alive_timer.take();
            if let Some(reader) = state.reader.take() {
                reader.abort();
            }
            state.teardown("keep-alive timeout")
        };
        error!(
            session,
            subscriptions = registrations.len(),
            "keep-alive timed out, disconnecting"
        );
        for reg in registrations {
            reg.fail(RealtimeError::KeepAliveTimeout);
        }
    }

    fn on_disconnect(&self, session: u64, error: RealtimeError) {
        let registrations = {
            let mut state = self.inner.state.lock();
            if state.session != session || state.status != SocketStatus::Ready {
                return;
            }
            state.teardown("disconnected")
        };
        warn!(
            session,
            error = %error,
            subscriptions = registrations.len(),
            "realtime socket lost"
        );
        for reg in registrations {
            reg.fail(error.clone());
        }
    }

    fn on_frame(&self, session: u64, text: &str) {
        let message = match ServerMessage::from_json(text) {
            Ok(message) => message,
            Err(err) => {
                warn!(error = %err, "ignoring malformed realtime frame");
                return;
            }
        };

        match message {
            ServerMessage::Ka => {
                let mut state = self.inner.state.lock();
                if state.session == session && state.status == SocketStatus::Ready {
                    self.restart_keep_alive(&mut state);
                }
            }
            ServerMessage::StartAck { id } => {
                let state = self.inner.state.lock();
                if let Some(reg) = state.subscriptions.get(&id) {
                    if let Some(timer) = &reg.start_ack_timer {
                        timer.abort();
                    }
                    let _ = reg.state.send(SubscriptionState::Connected);
                    let _ = reg.events.send(SubscriptionEvent::Connected);
                    info!(subscription_id = %id, "subscription connected");
                }
            }
            ServerMessage::Data { id, payload } => {
                let delivered = {
                    let state = self.inner.state.lock();
                    state
                        .subscriptions
                        .get(&id)
                        .map(|reg| reg.events.send(SubscriptionEvent::Data(payload)).is_ok())
                };
                match delivered {
                    Some(true) => {}
                    Some(false) => {
                        debug!(subscription_id = %id, "observer dropped, unsubscribing");
                        self.unsubscribe(&id);
                    }
                    None => debug!(subscription_id = %id, "data for unknown subscription"),
                }
            }
            ServerMessage::Complete { id } => {
                let removed = self.inner.state.lock().subscriptions.remove(&id);
                if removed.is_some() {
                    debug!(subscription_id = %id, "subscription completed by server");
                }
                self.schedule_idle_close();
            }
            ref message @ ServerMessage::Error { id: Some(ref id), .. } => {
                let (error_type, status) = message.error_details().unwrap_or((None, None));
                self.fail_subscription(
                    id,
                    RealtimeError::Subscription {
                        subscription_id: id.clone(),
                        error_type,
                        status,
                    },
                );
            }
            ref message @ (ServerMessage::Error { id: None, .. }
            | ServerMessage::ConnectionError { .. }) => {
                let (error_type, status) = message.error_details().unwrap_or((None, None));
                self.on_disconnect(session, RealtimeError::ConnectionRejected { error_type, status });
            }
            ServerMessage::ConnectionAck { .. } => {
                debug!("ignoring repeated connection ack");
            }
        }
    }

    /// Removes a registration, sending `stop` if the socket is READY.
    fn unsubscribe(&self, id: &str) {
        {
            let mut state = self.inner.state.lock();
            let Some(mut reg) = state.subscriptions.remove(id) else {
                return;
            };
            if let Some(timer) = reg.start_ack_timer.take() {
                timer.abort();
            }
            if state.status == SocketStatus::Ready {
                if let Err(err) = state.send(&ClientMessage::Stop { id: id.to_string() }) {
                    warn!(subscription_id = %id, error = %err, "failed to send stop");
                }
            }
        }
        debug!(subscription_id = %id, "unsubscribed");
        self.schedule_idle_close();
    }

    /// Closes the socket after the grace window once no registration is
    /// left and the send buffer has drained.
    fn schedule_idle_close(&self) {
        let mut state = self.inner.state.lock();
        if state.status != SocketStatus::Ready
            || !state.subscriptions.is_empty()
            || state.close_timer.is_some()
        {
            return;
        }

        let weak = self.weak();
        let session = state.session;
        let grace = self.inner.config.close_grace;
        state.close_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            loop {
                let Some(transport) = Self::from_weak(&weak) else {
                    return;
                };
                if !transport.try_close_idle(session) {
                    return;
                }
                drop(transport);
                tokio::time::sleep(DRAIN_RETRY_INTERVAL).await;
            }
        }));
    }

    /// Returns true if the close must be retried because bytes are still
    /// buffered.
    fn try_close_idle(&self, session: u64) -> bool {
        let mut state = self.inner.state.lock();
        if state.session != session || state.status != SocketStatus::Ready {
            return false;
        }
        if !state.subscriptions.is_empty() {
            state.close_timer.take();
            return false;
        }
        let pending = state
            .buffered
            .as_ref()
            .map_or(0, |buffered| buffered.load(Ordering::SeqCst));
        if pending > 0 {
            debug!(pending, "send buffer not drained, delaying close");
            return true;
        }

        // The close timer is the running task.
        state.close_timer.take();
        if let Some(reader) = state.reader.take() {
            reader.abort();
        }
        state.teardown("Normal closure");
        info!(session, "realtime socket closed");
        false
    }
}

impl std::fmt::Debug for RealtimeTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("RealtimeTransport")
            .field("status", &state.status)
            .field("subscriptions", &state.subscriptions.len())
            .finish()
    }
}

/// Waits for `connection_ack`, returning the advertised keep-alive window.
async fn await_ack(
    incoming: &mut mpsc::UnboundedReceiver<SocketEvent>,
) -> RealtimeResult<Option<u64>> {
    loop {
        match incoming.recv().await {
            Some(SocketEvent::Text(text)) => match ServerMessage::from_json(&text)? {
                message @ ServerMessage::ConnectionAck { .. } => {
                    return Ok(message.connection_timeout_ms())
                }
                message @ ServerMessage::ConnectionError { .. } => {
                    let (error_type, status) = message.error_details().unwrap_or((None, None));
                    return Err(RealtimeError::ConnectionRejected { error_type, status });
                }
                other => debug!(frame = ?other, "ignoring frame before connection ack"),
            },
            Some(SocketEvent::Closed { code, reason }) => {
                return Err(RealtimeError::closed(format!("{code} {reason}")))
            }
            Some(SocketEvent::Error(message)) => return Err(RealtimeError::connect(message, None)),
            None => return Err(RealtimeError::closed("socket ended during handshake")),
        }
    }
}

async fn read_loop(
    weak: Weak<Inner>,
    session: u64,
    mut incoming: mpsc::UnboundedReceiver<SocketEvent>,
) {
    let error = loop {
        let Some(event) = incoming.recv().await else {
            break RealtimeError::closed("socket ended");
        };
        let Some(transport) = RealtimeTransport::from_weak(&weak) else {
            return;
        };
        match event {
            SocketEvent::Text(text) => transport.on_frame(session, &text),
            SocketEvent::Closed { code, reason } => {
                break RealtimeError::closed(format!("{code} {reason}"))
            }
            SocketEvent::Error(message) => break RealtimeError::connect(message, None),
        }
    };
    if let Some(transport) = RealtimeTransport::from_weak(&weak) {
        transport.on_disconnect(session, error);
    }
}

/// One logical subscription.
///
/// Events arrive through [`next`](Self::next). Dropping the handle
/// unsubscribes the same way [`cancel`](Self::cancel) does, without waiting.
#[derive(Debug)]
pub struct SubscriptionHandle {
    id: String,
    events: mpsc::UnboundedReceiver<SubscriptionEvent>,
    state: watch::Receiver<SubscriptionState>,
    transport: RealtimeTransport,
}

impl SubscriptionHandle {
    /// Subscription id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current subscription state.
    pub fn state(&self) -> SubscriptionState {
        *self.state.borrow()
    }

    /// Waits for the next event. Returns `None` once the subscription is
    /// finished.
    pub async fn next(&mut self) -> Option<SubscriptionEvent> {
        self.events.recv().await
    }

    /// Unsubscribes.
    ///
    /// A subscription still waiting for `start_ack` is cancelled once the
    /// ack or failure arrives, so the server never keeps a stray
    /// registration.
    pub async fn cancel(mut self) {
        let _ = self
            .state
            .wait_for(|state| *state != SubscriptionState::Pending)
            .await;
        self.transport.unsubscribe(&self.id);
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        if *self.state.borrow() != SubscriptionState::Pending {
            self.transport.unsubscribe(&self.id);
            return;
        }
        // Still waiting for start_ack: unsubscribe once it settles.
        let mut state = self.state.clone();
        let transport = self.transport.clone();
        let id = std::mem::take(&mut self.id);
        runtime.spawn(async move {
            let _ = state
                .wait_for(|state| *state != SubscriptionState::Pending)
                .await;
            transport.unsubscribe(&id);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthMode;
    use crate::config::SERVER_KEEP_ALIVE_TIMEOUT;
    use crate::socket::{MockConnector, MockServerSocket};

    const ENDPOINT: &str = "https://api.example.com/graphql";

    fn operation() -> GraphQLOperation {
        GraphQLOperation::subscription("subscription { onCreateTodo { id } }", "onCreateTodo")
    }

    fn transport(config: RealtimeConfig) -> (RealtimeTransport, Arc<MockConnector>) {
        let connector = Arc::new(MockConnector::new());
        let transport = RealtimeTransport::new(config, connector.clone()).unwrap();
        (transport, connector)
    }

    fn default_transport() -> (RealtimeTransport, Arc<MockConnector>) {
        transport(RealtimeConfig::new(ENDPOINT, AuthMode::api_key("k")))
    }

    /// Accepts the socket and completes the handshake.
    async fn handshake(connector: &MockConnector, timeout_ms: u64) -> MockServerSocket {
        let mut server = connector.accept().await.unwrap();
        assert_eq!(server.recv_message().await, Some(ClientMessage::ConnectionInit));
        server.ack(timeout_ms);
        server
    }

    async fn expect_start(server: &mut MockServerSocket) -> String {
        match server.recv_message().await {
            Some(ClientMessage::Start { id, payload }) => {
                assert!(payload.data.contains("onCreateTodo"));
                assert_eq!(payload.extensions["authorization"]["x-api-key"], "k");
                id
            }
            other => panic!("expected start, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn subscribe_routes_data_after_start_ack() {
        let (transport, connector) = default_transport();
        let mut sub = transport.subscribe(operation());

        let mut server = handshake(&connector, 300_000).await;
        let id = expect_start(&mut server).await;
        assert_eq!(id, sub.id());

        server.start_ack(&id);
        assert_eq!(sub.next().await, Some(SubscriptionEvent::Connected));
        assert_eq!(sub.state(), SubscriptionState::Connected);

        server.data(&id, serde_json::json!({"data": {"onCreateTodo": {"id": "1"}}}));
        match sub.next().await {
            Some(SubscriptionEvent::Data(payload)) => {
                assert_eq!(payload["data"]["onCreateTodo"]["id"], "1")
            }
            other => panic!("expected data, got {other:?}"),
        }
        assert_eq!(transport.status(), SocketStatus::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn socket_url_and_protocol() {
        let (transport, connector) = default_transport();
        let _sub = transport.subscribe(operation());
        let server = connector.accept().await.unwrap();

        assert!(server.url.starts_with("wss://api.example.com/graphql/realtime?header="));
        assert!(server.url.ends_with("&payload=e30="));
        assert_eq!(server.protocol, "graphql-ws");
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_subscribers_share_one_connect() {
        let (transport, connector) = default_transport();
        let mut first = transport.subscribe(operation());
        let mut second = transport.subscribe(operation());

        let mut server = handshake(&connector, 300_000).await;
        let a = expect_start(&mut server).await;
        let b = expect_start(&mut server).await;
        server.start_ack(&a);
        server.start_ack(&b);

        assert_eq!(first.next().await, Some(SubscriptionEvent::Connected));
        assert_eq!(second.next().await, Some(SubscriptionEvent::Connected));
        assert_eq!(connector.connect_count(), 1);
        assert_eq!(transport.subscription_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn server_keep_alive_is_adopted_without_override() {
        let (transport, connector) = default_transport();
        let mut sub = transport.subscribe(operation());
        let mut server = handshake(&connector, 99_999).await;
        let id = expect_start(&mut server).await;
        server.start_ack(&id);
        sub.next().await;

        assert_eq!(transport.keep_alive_timeout(), Duration::from_millis(99_999));
    }

    #[tokio::test(start_paused = true)]
    async fn keep_alive_override_wins() {
        let override_window = SERVER_KEEP_ALIVE_TIMEOUT * 2;
        let (transport, connector) = transport(
            RealtimeConfig::new(ENDPOINT, AuthMode::api_key("k"))
                .with_keep_alive_timeout(override_window),
        );
        let mut sub = transport.subscribe(operation());
        let mut server = handshake(&connector, 99_999).await;
        let id = expect_start(&mut server).await;
        server.start_ack(&id);
        sub.next().await;

        assert_eq!(transport.keep_alive_timeout(), override_window);
    }

    #[tokio::test(start_paused = true)]
    async fn keep_alive_expiry_disconnects_everything() {
        let (transport, connector) = default_transport();
        let mut sub = transport.subscribe(operation());
        let mut server = handshake(&connector, 70_000).await;
        let id = expect_start(&mut server).await;
        server.start_ack(&id);
        assert_eq!(sub.next().await, Some(SubscriptionEvent::Connected));

        tokio::time::sleep(Duration::from_secs(60)).await;
        server.keep_alive();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(transport.status(), SocketStatus::Ready);

        assert_eq!(
            sub.next().await,
            Some(SubscriptionEvent::Error(RealtimeError::KeepAliveTimeout))
        );
        assert_eq!(sub.next().await, None);
        assert_eq!(transport.status(), SocketStatus::Closed);
        assert_eq!(transport.subscription_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_start_ack_fails_subscription() {
        let (transport, connector) = default_transport();
        let mut sub = transport.subscribe(operation());
        let mut server = handshake(&connector, 300_000).await;
        let id = expect_start(&mut server).await;

        assert_eq!(
            sub.next().await,
            Some(SubscriptionEvent::Error(RealtimeError::StartAckTimeout(id)))
        );
        assert_eq!(sub.state(), SubscriptionState::Failed);
        assert_eq!(transport.subscription_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn subscription_error_removes_registration() {
        let (transport, connector) = default_transport();
        let mut sub = transport.subscribe(operation());
        let mut server = handshake(&connector, 300_000).await;
        let id = expect_start(&mut server).await;
        server.error(&id, "UnauthorizedException");

        match sub.next().await {
            Some(SubscriptionEvent::Error(RealtimeError::Subscription { error_type, .. })) => {
                assert_eq!(error_type.as_deref(), Some("UnauthorizedException"))
            }
            other => panic!("expected subscription error, got {other:?}"),
        }
        assert_eq!(sub.next().await, None);
        assert_eq!(transport.subscription_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_sends_stop_and_closes_after_grace() {
        let (transport, connector) = default_transport();
        let mut sub = transport.subscribe(operation());
        let mut server = handshake(&connector, 300_000).await;
        let id = expect_start(&mut server).await;
        server.start_ack(&id);
        sub.next().await;

        sub.cancel().await;
        assert_eq!(server.recv_message().await, Some(ClientMessage::Stop { id }));
        assert_eq!(transport.status(), SocketStatus::Ready);

        tokio::time::sleep(Duration::from_millis(1_100)).await;
        assert_eq!(transport.status(), SocketStatus::Closed);
        assert_eq!(
            server.recv().await,
            Some(SocketCommand::Close {
                code: NORMAL_CLOSURE,
                reason: "Normal closure".into()
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_before_ack_waits_for_ack() {
        let (transport, connector) = default_transport();
        let sub = transport.subscribe(operation());
        let mut server = handshake(&connector, 300_000).await;
        let id = expect_start(&mut server).await;

        let cancel = tokio::spawn(sub.cancel());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!cancel.is_finished());
        assert_eq!(transport.subscription_count(), 1);

        server.start_ack(&id);
        cancel.await.unwrap();
        assert_eq!(server.recv_message().await, Some(ClientMessage::Stop { id }));
        assert_eq!(transport.subscription_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_handle_unsubscribes_and_closes_idle_socket() {
        let (transport, connector) = default_transport();
        let mut sub = transport.subscribe(operation());
        let mut server = handshake(&connector, 300_000).await;
        let id = expect_start(&mut server).await;
        server.start_ack(&id);
        assert_eq!(sub.next().await, Some(SubscriptionEvent::Connected));

        drop(sub);
        assert_eq!(server.recv_message().await, Some(ClientMessage::Stop { id }));
        assert_eq!(transport.subscription_count(), 0);

        for _ in 0..4 {
            server.keep_alive();
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
        assert_eq!(transport.status(), SocketStatus::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_pending_handle_unsubscribes_after_ack() {
        let (transport, connector) = default_transport();
        let sub = transport.subscribe(operation());
        let mut server = handshake(&connector, 300_000).await;
        let id = expect_start(&mut server).await;

        drop(sub);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(transport.subscription_count(), 1);

        server.start_ack(&id);
        assert_eq!(server.recv_message().await, Some(ClientMessage::Stop { id }));
        assert_eq!(transport.subscription_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn resubscribe_within_grace_keeps_socket() {
        let (transport, connector) = default_transport();
        let mut sub = transport.subscribe(operation());
        let mut server = handshake(&connector, 300_000).await;
        let id = expect_start(&mut server).await;
        server.start_ack(&id);
        sub.next().await;
        sub.cancel().await;

        tokio::time::sleep(Duration::from_millis(500)).await;
        let _again = transport.subscribe(operation());
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert_eq!(transport.status(), SocketStatus::Ready);
        assert_eq!(connector.connect_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn close_waits_for_send_buffer_to_drain() {
        let (transport, connector) = default_transport();
        let mut sub = transport.subscribe(operation());
        let mut server = handshake(&connector, 300_000).await;
        let id = expect_start(&mut server).await;
        server.start_ack(&id);
        sub.next().await;

        server.set_buffered(64);
        sub.cancel().await;
        tokio::time::sleep(Duration::from_millis(2_500)).await;
        assert_eq!(transport.status(), SocketStatus::Ready);

        server.set_buffered(0);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(transport.status(), SocketStatus::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn unauthorized_connect_is_not_retried() {
        let (transport, connector) = default_transport();
        connector.fail_next(RealtimeError::connect("unauthorized", Some(401)));
        let mut sub = transport.subscribe(operation());

        match sub.next().await {
            Some(SubscriptionEvent::Error(err)) => assert_eq!(err.status_code(), Some(401)),
            other => panic!("expected error, got {other:?}"),
        }
        assert_eq!(connector.connect_count(), 1);
        assert_eq!(transport.status(), SocketStatus::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_connect_failure_is_retried() {
        let (transport, connector) = default_transport();
        connector.fail_next(RealtimeError::connect("reset", Some(503)));
        let mut sub = transport.subscribe(operation());

        let mut server = handshake(&connector, 300_000).await;
        let id = expect_start(&mut server).await;
        server.start_ack(&id);
        assert_eq!(sub.next().await, Some(SubscriptionEvent::Connected));
        assert_eq!(connector.connect_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn server_close_fails_subscriptions() {
        let (transport, connector) = default_transport();
        let mut sub = transport.subscribe(operation());
        let mut server = handshake(&connector, 300_000).await;
        let id = expect_start(&mut server).await;
        server.start_ack(&id);
        sub.next().await;

        server.close(1006, "abnormal");
        assert!(matches!(
            sub.next().await,
            Some(SubscriptionEvent::Error(RealtimeError::Closed(_)))
        ));
        assert_eq!(transport.status(), SocketStatus::Closed);
    }

    #[tokio::test]
    async fn invalid_config_is_rejected_at_construction() {
        let config = RealtimeConfig::new(ENDPOINT, AuthMode::api_key("k"))
            .with_keep_alive_timeout(Duration::from_secs(1));
        let result = RealtimeTransport::new(config, Arc::new(MockConnector::new()));
        assert!(matches!(result, Err(RealtimeError::Config(_))));
    }
}
