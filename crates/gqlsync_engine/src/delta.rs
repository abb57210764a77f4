//! Delta sync: a base query, a live subscription and an incremental delta
//! query kept consistent as one dataset in the cache.
//!
//! Each session opens the subscription first and buffers its messages
//! until the base (or delta) result is in the cache. The base query runs
//! when it never ran, was reset, or is older than the refresh interval;
//! otherwise the cached base is reused and the delta query fetches what
//! changed since the last sync. Going offline ends the session; the sync
//! is recorded in the offline metadata and resumes when the network
//! returns, or when the next client over the same storage hydrates.

use crate::error::{SyncError, SyncResult};
use crate::executor::GraphQLExecutor;
use crate::network::NetworkStatus;
use crate::outbox::Outbox;
use crate::persistence::Persistence;
use chrono::Utc;
use gqlsync_cache::{BaseSyncMark, CacheWrite, DeltaSyncMetadata, NormalizedCache, SuspendedSync};
use gqlsync_protocol::{
    infer_operation_kind, merge_item, FetchResult, GraphQLOperation, OperationKind, Value,
};
use gqlsync_realtime::{
    RealtimeError, RealtimeTransport, RetryConfig, RetryDecision, SubscriptionEvent,
    SubscriptionHandle,
};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Variable carrying the last sync time, in seconds, to the delta query.
pub const LAST_SYNC_VARIABLE: &str = "lastSync";

/// Default id field used to merge items.
pub const DEFAULT_ID_FIELD: &str = "id";

/// Describes one delta sync.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncOptions {
    /// Full query; its root field holds the synced list.
    pub base_query: GraphQLOperation,
    /// Live changes.
    pub subscription: Option<GraphQLOperation>,
    /// Changes since `lastSync`.
    pub delta_query: Option<GraphQLOperation>,
    /// Field identifying list items.
    pub id_field: String,
    /// How often the base query reruns. Falls back to the client default.
    pub base_refresh_interval: Option<Duration>,
}

impl SyncOptions {
    /// Creates options for a base query.
    pub fn new(base_query: GraphQLOperation) -> Self {
        Self {
            base_query,
            subscription: None,
            delta_query: None,
            id_field: DEFAULT_ID_FIELD.to_string(),
            base_refresh_interval: None,
        }
    }

    /// Sets the subscription.
    #[must_use]
    pub fn with_subscription(mut self, subscription: GraphQLOperation) -> Self {
        self.subscription = Some(subscription);
        self
    }

    /// Sets the delta query.
    #[must_use]
    pub fn with_delta_query(mut self, delta_query: GraphQLOperation) -> Self {
        self.delta_query = Some(delta_query);
        self
    }

    /// Sets the id field.
    #[must_use]
    pub fn with_id_field(mut self, id_field: impl Into<String>) -> Self {
        self.id_field = id_field.into();
        self
    }

    /// Sets the base refresh interval.
    #[must_use]
    pub fn with_base_refresh_interval(mut self, interval: Duration) -> Self {
        self.base_refresh_interval = Some(interval);
        self
    }

    /// Stable key of this configuration, used for persisted metadata.
    pub fn key(&self) -> String {
        let mut hasher = Sha256::new();
        for operation in [
            Some(&self.base_query),
            self.subscription.as_ref(),
            self.delta_query.as_ref(),
        ] {
            if let Some(operation) = operation {
                hasher.update(operation.fingerprint().as_bytes());
            }
            hasher.update([0u8]);
        }
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect()
    }
}

impl From<&SyncOptions> for SuspendedSync {
    fn from(options: &SyncOptions) -> Self {
        Self {
            base_query: options.base_query.clone(),
            subscription: options.subscription.clone(),
            delta_query: options.delta_query.clone(),
            id_field: options.id_field.clone(),
            base_refresh_interval_ms: options
                .base_refresh_interval
                .map(|interval| u64::try_from(interval.as_millis()).unwrap_or(u64::MAX)),
        }
    }
}

impl From<SuspendedSync> for SyncOptions {
    fn from(sync: SuspendedSync) -> Self {
        Self {
            base_query: sync.base_query,
            subscription: sync.subscription,
            delta_query: sync.delta_query,
            id_field: sync.id_field,
            base_refresh_interval: sync.base_refresh_interval_ms.map(Duration::from_millis),
        }
    }
}

/// Progress reported by a running sync.
#[derive(Debug)]
pub enum SyncEvent {
    /// The base dataset is in the cache, fetched or reused.
    BaseApplied {
        /// True if the cached base was reused.
        from_cache: bool,
    },
    /// The delta query result was merged.
    DeltaApplied {
        /// Items returned by the delta query.
        items: usize,
    },
    /// A subscription message was merged.
    SubscriptionApplied {
        /// False if the message did not change the list.
        changed: bool,
    },
    /// The sync failed and stopped.
    Error(SyncError),
}

/// A running sync.
///
/// Dropping the handle stops the sync but keeps its offline record, so a
/// sync suspended while offline resumes when a client next hydrates from
/// the same storage. [`cancel`](Self::cancel) stops it for good.
#[derive(Debug)]
pub struct SyncHandle {
    key: String,
    events: mpsc::UnboundedReceiver<SyncEvent>,
    cancel: oneshot::Sender<()>,
    task: JoinHandle<()>,
    persistence: Arc<Persistence>,
}

impl SyncHandle {
    /// Key of the sync configuration.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Waits for the next event. Returns `None` once the sync stopped.
    pub async fn next_event(&mut self) -> Option<SyncEvent> {
        self.events.recv().await
    }

    /// Stops the sync and its subscription and forgets its offline record.
    pub async fn cancel(self) {
        let _ = self.cancel.send(());
        let _ = self.task.await;
        self.persistence.forget_sync(&self.key);
    }
}

/// Collaborators shared by every sync of a client.
#[derive(Clone)]
pub(crate) struct SyncContext {
    pub(crate) cache: Arc<dyn NormalizedCache>,
    pub(crate) executor: Arc<dyn GraphQLExecutor>,
    pub(crate) transport: RealtimeTransport,
    pub(crate) outbox: Arc<Outbox>,
    pub(crate) persistence: Arc<Persistence>,
    pub(crate) network: NetworkStatus,
    pub(crate) retry: RetryConfig,
    pub(crate) base_refresh_interval: Duration,
}

/// Starts a sync task.
pub(crate) fn spawn(context: SyncContext, options: SyncOptions) -> SyncHandle {
    let key = options.key();
    let (events_tx, events) = mpsc::unbounded_channel();
    let (cancel, cancel_rx) = oneshot::channel();
    let persistence = Arc::clone(&context.persistence);
    let refresh = options
        .base_refresh_interval
        .unwrap_or(context.base_refresh_interval);

    let sync = DeltaSync {
        context,
        options,
        key: key.clone(),
        refresh,
        events: events_tx,
    };
    let task = tokio::spawn(sync.run(cancel_rx));

    SyncHandle {
        key,
        events,
        cancel,
        task,
        persistence,
    }
}

enum SessionEnd {
    Cancelled,
    Offline,
    Restart(RealtimeError),
    Failed(SyncError),
}

struct DeltaSync {
    context: SyncContext,
    options: SyncOptions,
    key: String,
    refresh: Duration,
    events: mpsc::UnboundedSender<SyncEvent>,
}

impl DeltaSync {
    async fn run(self, mut cancel: oneshot::Receiver<()>) {
        let mut attempt = 0u32;
        info!(sync = %self.key, "delta sync started");

        loop {
            if !self.context.network.is_online() {
                info!(sync = %self.key, "waiting for network");
                self.context
                    .persistence
                    .suspend_sync(&self.key, SuspendedSync::from(&self.options));
                tokio::select! {
                    _ = &mut cancel => return,
                    _ = self.context.network.online() => {}
                }
            }

            match self.run_session(&mut cancel, &mut attempt).await {
                SessionEnd::Cancelled => {
                    debug!(sync = %self.key, "delta sync cancelled");
                    return;
                }
                SessionEnd::Offline => info!(sync = %self.key, "network offline; sync suspended"),
                SessionEnd::Restart(err) => match self.context.retry.decide_jittered(attempt, &err) {
                    RetryDecision::RetryAfter(delay) => {
                        attempt += 1;
                        warn!(
                            sync = %self.key,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %err,
                            "subscription lost; restarting sync"
                        );
                        tokio::select! {
                            _ = &mut cancel => return,
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                    RetryDecision::Stop => {
                        self.fail(err.into());
                        return;
                    }
                },
                SessionEnd::Failed(err) => {
                    self.fail(err);
                    return;
                }
            }
        }
    }

    async fn run_session(&self, cancel: &mut oneshot::Receiver<()>, attempt: &mut u32) -> SessionEnd {
        let mut network = self.context.network.subscribe();
        let mut subscription = self
            .options
            .subscription
            .clone()
            .map(|operation| self.context.transport.subscribe(operation));
        let mut buffered = Vec::new();

        if let Some(handle) = subscription.as_mut() {
            let end = loop {
                tokio::select! {
                    _ = &mut *cancel => break Some(SessionEnd::Cancelled),
                    _ = went_offline(&mut network) => break Some(SessionEnd::Offline),
                    event = handle.next() => match event {
                        Some(SubscriptionEvent::Connected) => break None,
                        Some(SubscriptionEvent::Data(payload)) => buffered.push(payload),
                        Some(SubscriptionEvent::Error(err)) => break Some(classify(err)),
                        None => break Some(SessionEnd::Restart(RealtimeError::closed("subscription ended"))),
                    },
                }
            };
            if let Some(end) = end {
                teardown(subscription);
                return end;
            }
            debug!(sync = %self.key, buffered = buffered.len(), "subscription ready");
        }

        let caught_up = tokio::select! {
            _ = &mut *cancel => Err(SessionEnd::Cancelled),
            _ = went_offline(&mut network) => Err(SessionEnd::Offline),
            result = self.catch_up() => result.map_err(SessionEnd::Failed),
        };
        let mut next_base = match caught_up {
            Ok(wait) => Instant::now() + wait,
            Err(end) => {
                teardown(subscription);
                return end;
            }
        };
        *attempt = 0;
        self.context.persistence.forget_sync(&self.key);

        for payload in buffered.drain(..) {
            if let Err(err) = self.apply_subscription(&payload) {
                teardown(subscription);
                return SessionEnd::Failed(err);
            }
        }

        let end = loop {
            tokio::select! {
                _ = &mut *cancel => break SessionEnd::Cancelled,
                _ = went_offline(&mut network) => break SessionEnd::Offline,
                _ = tokio::time::sleep_until(next_base) => {
                    debug!(sync = %self.key, "base refresh due");
                    match self.catch_up().await {
                        Ok(wait) => next_base = Instant::now() + wait,
                        Err(err) => break SessionEnd::Failed(err),
                    }
                }
                event = next_event(&mut subscription) => match event {
                    Some(SubscriptionEvent::Data(payload)) => {
                        if let Err(err) = self.apply_subscription(&payload) {
                            break SessionEnd::Failed(err);
                        }
                    }
                    Some(SubscriptionEvent::Connected) => {}
                    Some(SubscriptionEvent::Error(err)) => break classify(err),
                    None => break SessionEnd::Restart(RealtimeError::closed("subscription ended")),
                },
            }
        };
        teardown(subscription);
        end
    }

    /// Brings the base list up to date. Returns the time until the next
    /// base refresh.
    async fn catch_up(&self) -> SyncResult<Duration> {
        let metadata = self.context.persistence.delta_metadata(&self.key);
        let now = Utc::now().timestamp_millis();
        let refresh_ms = i64::try_from(self.refresh.as_millis()).unwrap_or(i64::MAX);

        let base_due = match metadata.base_last_sync_timestamp {
            BaseSyncMark::At(ts) => now.saturating_sub(ts) >= refresh_ms,
            BaseSyncMark::Never | BaseSyncMark::Reset => true,
        };
        let cached = if base_due {
            None
        } else {
            self.context.cache.read(&self.options.base_query)
        };

        let base_at = match (cached, metadata.base_last_sync_timestamp.timestamp()) {
            (Some(_), Some(base_at)) => {
                self.emit(SyncEvent::BaseApplied { from_cache: true });
                if let Some(delta) = &self.options.delta_query {
                    let since = metadata.last_sync_timestamp.unwrap_or(base_at);
                    let operation = delta
                        .clone()
                        .with_variable(LAST_SYNC_VARIABLE, json!(since / 1000));
                    debug!(sync = %self.key, since, "running delta query");

                    let result = self.fetch(&operation).await?;
                    let items = result
                        .field(&delta.root_field)
                        .map(list_items)
                        .unwrap_or_default();
                    self.merge(&items, OperationKind::Auto)?;
                    self.emit(SyncEvent::DeltaApplied { items: items.len() });
                }
                base_at
            }
            _ => {
                debug!(
                    sync = %self.key,
                    mark = ?metadata.base_last_sync_timestamp,
                    "running base query"
                );
                let result = self.fetch(&self.options.base_query).await?;
                let data = result
                    .field(&self.options.base_query.root_field)
                    .cloned()
                    .unwrap_or(Value::Null);
                self.context.outbox.rebase(vec![CacheWrite::Query {
                    query: self.options.base_query.clone(),
                    data,
                }])?;
                self.emit(SyncEvent::BaseApplied { from_cache: false });
                now
            }
        };

        self.context.persistence.update_metadata(|m| {
            m.delta_sync.metadata.insert(
                self.key.clone(),
                DeltaSyncMetadata {
                    base_last_sync_timestamp: BaseSyncMark::At(base_at),
                    last_sync_timestamp: Some(now),
                },
            );
        });

        let remaining = refresh_ms.saturating_sub(now.saturating_sub(base_at));
        Ok(Duration::from_millis(u64::try_from(remaining).unwrap_or(0)))
    }

    fn apply_subscription(&self, payload: &Value) -> SyncResult<()> {
        let Some(subscription) = &self.options.subscription else {
            return Ok(());
        };
        let Some(item) = payload
            .get("data")
            .and_then(|data| data.get(&subscription.root_field))
            .filter(|item| !item.is_null())
        else {
            debug!(sync = %self.key, "subscription message without item");
            return Ok(());
        };

        let kind = infer_operation_kind(&subscription.root_field);
        let changed = self.merge(std::slice::from_ref(item), kind)? > 0;
        self.emit(SyncEvent::SubscriptionApplied { changed });
        Ok(())
    }

    /// Merges items into the cached base list. Returns how many changed it.
    ///
    /// The list is read and written beneath pending optimistic results, so
    /// a later rollback cannot leave optimistic items in it.
    fn merge(&self, items: &[Value], kind: OperationKind) -> SyncResult<usize> {
        let base_query = &self.options.base_query;
        let changed = self.context.outbox.rebase_with(|cache| {
            let mut base = cache
                .read(base_query)
                .unwrap_or_else(|| Value::Array(Vec::new()));
            let Some(list) = list_mut(&mut base) else {
                warn!(sync = %self.key, "cached base result is not a list");
                return Ok(0);
            };

            let changed = items
                .iter()
                .filter(|item| merge_item(list, item, &self.options.id_field, kind))
                .count();
            if changed > 0 {
                cache.write(CacheWrite::Query {
                    query: base_query.clone(),
                    data: base,
                })?;
            }
            Ok(changed)
        })?;
        Ok(changed)
    }

    async fn fetch(&self, operation: &GraphQLOperation) -> SyncResult<FetchResult> {
        let result = self.context.executor.execute(operation).await?;
        if result.has_errors() {
            return Err(SyncError::GraphQL(result.errors));
        }
        Ok(result)
    }

    fn emit(&self, event: SyncEvent) {
        let _ = self.events.send(event);
    }

    fn fail(&self, err: SyncError) {
        error!(sync = %self.key, error = %err, "delta sync failed");
        self.context.persistence.forget_sync(&self.key);
        self.emit(SyncEvent::Error(err));
    }
}

fn classify(err: RealtimeError) -> SessionEnd {
    if err.is_retryable() {
        SessionEnd::Restart(err)
    } else {
        SessionEnd::Failed(err.into())
    }
}

fn teardown(subscription: Option<SubscriptionHandle>) {
    if let Some(handle) = subscription {
        tokio::spawn(handle.cancel());
    }
}

async fn went_offline(network: &mut watch::Receiver<bool>) {
    let _ = network.wait_for(|online| !*online).await;
}

async fn next_event(subscription: &mut Option<SubscriptionHandle>) -> Option<SubscriptionEvent> {
    match subscription {
        Some(handle) => handle.next().await,
        None => std::future::pending().await,
    }
}

/// Items of a list result: a bare array or a connection with `items`.
fn list_items(value: &Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items.clone(),
        Value::Object(map) => match map.get("items") {
            Some(Value::Array(items)) => items.clone(),
            _ => vec![value.clone()],
        },
        _ => Vec::new(),
    }
}

fn list_mut(value: &mut Value) -> Option<&mut Vec<Value>> {
    match value {
        Value::Array(items) => Some(items),
        Value::Object(map) => map.get_mut("items").and_then(Value::as_array_mut),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflict::{ConflictEngine, DEFAULT_MAX_CONFLICT_RETRIES};
    use crate::executor::MockExecutor;
    use crate::outbox::{MutationOptions, ProcessOutcome};
    use gqlsync_cache::{InMemoryBackend, InMemoryCache, OfflineStore};
    use gqlsync_protocol::{ClientMessage, GraphQLError};
    use gqlsync_realtime::{AuthMode, MockConnector, MockServerSocket, RealtimeConfig};

    const ENDPOINT: &str = "https://api.example.com/graphql";

    struct Fixture {
        context: SyncContext,
        cache: Arc<InMemoryCache>,
        executor: Arc<MockExecutor>,
        connector: Arc<MockConnector>,
    }

    fn fixture() -> Fixture {
        let cache = Arc::new(InMemoryCache::new());
        let executor = Arc::new(MockExecutor::new());
        let connector = Arc::new(MockConnector::new());
        let transport = RealtimeTransport::new(
            RealtimeConfig::new(ENDPOINT, AuthMode::api_key("k")),
            connector.clone(),
        )
        .unwrap();
        let persistence = Arc::new(Persistence::new(OfflineStore::new(
            Arc::new(InMemoryBackend::new()),
            "delta:",
        )));
        let outbox = Arc::new(Outbox::new(
            cache.clone(),
            executor.clone(),
            ConflictEngine::new(None, DEFAULT_MAX_CONFLICT_RETRIES),
            RetryConfig::new(),
            persistence.clone(),
        ));
        let context = SyncContext {
            cache: cache.clone(),
            executor: executor.clone(),
            transport,
            outbox,
            persistence,
            network: NetworkStatus::new(true),
            retry: RetryConfig::new(),
            base_refresh_interval: Duration::from_secs(24 * 60 * 60),
        };
        Fixture {
            context,
            cache,
            executor,
            connector,
        }
    }

    fn options() -> SyncOptions {
        SyncOptions::new(GraphQLOperation::query("query { listTodos { items { id } } }", "listTodos"))
            .with_subscription(GraphQLOperation::subscription(
                "subscription { onCreateTodo { id } }",
                "onCreateTodo",
            ))
            .with_delta_query(GraphQLOperation::query(
                "query ($lastSync: AWSTimestamp) { listTodosDelta(lastSync: $lastSync) { items { id } } }",
                "listTodosDelta",
            ))
    }

    fn todo(id: &str) -> Value {
        json!({"__typename": "Todo", "id": id, "name": id})
    }

    async fn accept_start(connector: &MockConnector) -> (MockServerSocket, String) {
        let mut server = connector.accept().await.unwrap();
        assert_eq!(server.recv_message().await, Some(ClientMessage::ConnectionInit));
        server.ack(300_000);
        let id = next_start(&mut server).await;
        (server, id)
    }

    async fn next_start(server: &mut MockServerSocket) -> String {
        loop {
            match server.recv_message().await {
                Some(ClientMessage::Start { id, .. }) => return id,
                Some(_) => continue,
                None => panic!("socket closed before start"),
            }
        }
    }

    fn listed_ids(cache: &InMemoryCache, options: &SyncOptions) -> Vec<String> {
        let base = cache.read(&options.base_query).unwrap();
        base["items"]
            .as_array()
            .unwrap()
            .iter()
            .map(|item| item["id"].as_str().unwrap().to_string())
            .collect()
    }

    #[test]
    fn key_depends_on_all_queries() {
        let a = options();
        let b = options().with_delta_query(GraphQLOperation::query("query { other }", "other"));
        assert_eq!(a.key(), options().key());
        assert_ne!(a.key(), b.key());
        assert_eq!(a.key().len(), 64);
    }

    #[test]
    fn list_helpers_accept_both_shapes() {
        assert_eq!(list_items(&json!([1, 2])).len(), 2);
        assert_eq!(list_items(&json!({"items": [1]})).len(), 1);
        let mut connection = json!({"items": [], "nextToken": null});
        list_mut(&mut connection).unwrap().push(json!(1));
        assert_eq!(connection["items"], json!([1]));
    }

    #[tokio::test]
    async fn buffered_messages_apply_after_base() {
        let f = fixture();
        f.executor.push_response(Ok(FetchResult::data(
            json!({"listTodos": {"items": [todo("1")]}}),
        )));
        let opts = options();
        let mut handle = spawn(f.context.clone(), opts.clone());

        let (server, id) = accept_start(&f.connector).await;
        server.data(&id, json!({"data": {"onCreateTodo": todo("2")}}));
        server.start_ack(&id);

        assert!(matches!(
            handle.next_event().await,
            Some(SyncEvent::BaseApplied { from_cache: false })
        ));
        assert!(matches!(
            handle.next_event().await,
            Some(SyncEvent::SubscriptionApplied { changed: true })
        ));
        assert_eq!(listed_ids(&f.cache, &opts), vec!["1", "2"]);

        let metadata = f.context.persistence.delta_metadata(&opts.key());
        assert!(matches!(metadata.base_last_sync_timestamp, BaseSyncMark::At(_)));
        assert!(metadata.last_sync_timestamp.is_some());
        handle.cancel().await;
    }

    #[tokio::test]
    async fn recent_base_is_reused_and_delta_runs() {
        let f = fixture();
        let opts = options();
        let base_at = Utc::now().timestamp_millis() - 60_000;
        f.cache
            .write(CacheWrite::Query {
                query: opts.base_query.clone(),
                data: json!({"items": [todo("1"), todo("2")]}),
            })
            .unwrap();
        f.context.persistence.update_metadata(|m| {
            m.delta_sync.metadata.insert(
                opts.key(),
                DeltaSyncMetadata {
                    base_last_sync_timestamp: BaseSyncMark::At(base_at),
                    last_sync_timestamp: Some(base_at),
                },
            );
        });
        f.executor.push_response(Ok(FetchResult::data(json!({
            "listTodosDelta": {"items": [todo("3"), {"__typename": "Todo", "id": "1", "_deleted": true}]}
        }))));

        let mut handle = spawn(f.context.clone(), opts.clone());
        let (server, id) = accept_start(&f.connector).await;
        server.start_ack(&id);

        assert!(matches!(
            handle.next_event().await,
            Some(SyncEvent::BaseApplied { from_cache: true })
        ));
        assert!(matches!(
            handle.next_event().await,
            Some(SyncEvent::DeltaApplied { items: 2 })
        ));

        let executed = f.executor.executed();
        assert_eq!(executed.len(), 1);
        assert_eq!(executed[0].variables[LAST_SYNC_VARIABLE], json!(base_at / 1000));
        assert_eq!(listed_ids(&f.cache, &opts), vec!["2", "3"]);
        handle.cancel().await;
    }

    #[tokio::test]
    async fn base_query_error_stops_the_sync() {
        let f = fixture();
        f.executor
            .push_response(Ok(FetchResult::errors(vec![GraphQLError::new("unauthorized")])));
        let mut handle = spawn(f.context.clone(), options());

        let (server, id) = accept_start(&f.connector).await;
        server.start_ack(&id);

        assert!(matches!(
            handle.next_event().await,
            Some(SyncEvent::Error(SyncError::GraphQL(_)))
        ));
        assert!(handle.next_event().await.is_none());
    }

    #[tokio::test]
    async fn subscription_error_stops_the_sync() {
        let f = fixture();
        let mut handle = spawn(f.context.clone(), options());

        let (server, id) = accept_start(&f.connector).await;
        server.error(&id, "UnauthorizedException");

        assert!(matches!(
            handle.next_event().await,
            Some(SyncEvent::Error(SyncError::Realtime(_)))
        ));
    }

    #[tokio::test]
    async fn offline_suspends_and_online_resumes_with_delta() {
        let f = fixture();
        f.executor.push_response(Ok(FetchResult::data(
            json!({"listTodos": {"items": [todo("1")]}}),
        )));
        f.executor.push_response(Ok(FetchResult::data(
            json!({"listTodosDelta": {"items": [todo("4")]}}),
        )));
        let opts = options();
        let mut handle = spawn(f.context.clone(), opts.clone());

        let (mut server, id) = accept_start(&f.connector).await;
        server.start_ack(&id);
        assert!(matches!(
            handle.next_event().await,
            Some(SyncEvent::BaseApplied { from_cache: false })
        ));

        f.context.network.set_online(false);
        assert_eq!(
            server.recv_message().await,
            Some(ClientMessage::Stop { id: id.clone() })
        );
        let stored = f.context.persistence.store().load_or_default().metadata;
        assert_eq!(
            stored.delta_sync.suspended.get(&opts.key()),
            Some(&SuspendedSync::from(&opts))
        );
        f.context.network.set_online(true);

        let resumed = next_start(&mut server).await;
        assert_ne!(resumed, id);
        server.start_ack(&resumed);

        assert!(matches!(
            handle.next_event().await,
            Some(SyncEvent::BaseApplied { from_cache: true })
        ));
        assert!(matches!(
            handle.next_event().await,
            Some(SyncEvent::DeltaApplied { items: 1 })
        ));
        assert_eq!(listed_ids(&f.cache, &opts), vec!["1", "4"]);
        assert!(f.context.persistence.suspended_syncs().is_empty());
        handle.cancel().await;
    }

    #[tokio::test]
    async fn offline_record_survives_drop_but_not_cancel() {
        let f = fixture();
        f.context.network.set_online(false);
        let opts = options().with_base_refresh_interval(Duration::from_secs(90));

        let dropped = spawn(f.context.clone(), opts.clone());
        tokio::task::yield_now().await;
        drop(dropped);
        tokio::task::yield_now().await;
        let suspended = f.context.persistence.suspended_syncs();
        assert_eq!(suspended.len(), 1);
        assert_eq!(SyncOptions::from(suspended[0].clone()), opts);

        let cancelled = spawn(f.context.clone(), opts);
        tokio::task::yield_now().await;
        cancelled.cancel().await;
        assert!(f.context.persistence.suspended_syncs().is_empty());
    }

    #[tokio::test]
    async fn subscription_merge_stays_beneath_optimistic_items() {
        let f = fixture();
        f.executor.push_response(Ok(FetchResult::data(
            json!({"listTodos": {"items": [todo("1")]}}),
        )));
        let opts = options();
        let mut handle = spawn(f.context.clone(), opts.clone());
        let (server, id) = accept_start(&f.connector).await;
        server.start_ack(&id);
        assert!(matches!(
            handle.next_event().await,
            Some(SyncEvent::BaseApplied { from_cache: false })
        ));

        let list = opts.base_query.clone();
        f.context.outbox.enqueue(
            MutationOptions::new(GraphQLOperation::mutation("mutation { addTodo }", "addTodo"))
                .with_optimistic_response(json!({"addTodo": todo("local-1")}))
                .with_update(move |cache, result| {
                    let mut base = cache.read(&list).unwrap_or_else(|| json!({"items": []}));
                    if let (Some(items), Some(added)) =
                        (base["items"].as_array_mut(), result.field("addTodo"))
                    {
                        items.push(added.clone());
                    }
                    cache.write(CacheWrite::Query {
                        query: list.clone(),
                        data: base,
                    })
                }),
        );
        assert_eq!(listed_ids(&f.cache, &opts), vec!["1", "local-1"]);

        server.data(&id, json!({"data": {"onCreateTodo": todo("2")}}));
        assert!(matches!(
            handle.next_event().await,
            Some(SyncEvent::SubscriptionApplied { changed: true })
        ));
        assert_eq!(listed_ids(&f.cache, &opts), vec!["1", "2", "local-1"]);

        f.executor
            .push_response(Ok(FetchResult::errors(vec![GraphQLError::new("invalid name")])));
        assert!(matches!(
            f.context.outbox.process_next().await,
            ProcessOutcome::RolledBack(_)
        ));
        assert_eq!(listed_ids(&f.cache, &opts), vec!["1", "2"]);
        handle.cancel().await;
    }
}
