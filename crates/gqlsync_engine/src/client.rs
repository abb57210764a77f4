//! The client facade.

use crate::config::{ClientConfig, FetchPolicy};
use crate::conflict::ConflictEngine;
use crate::delta::{self, SyncContext, SyncHandle, SyncOptions};
use crate::error::{SyncError, SyncResult};
use crate::executor::GraphQLExecutor;
use crate::network::NetworkStatus;
use crate::outbox::{MutationHandle, MutationOptions, Outbox, PendingMutationInfo};
use crate::persistence::Persistence;
use gqlsync_cache::{
    register_prefix, CacheError, CacheWrite, InMemoryCache, NormalizedCache, OfflineStore,
};
use gqlsync_protocol::{FetchResult, GraphQLOperation, OperationType, Value};
use gqlsync_realtime::{RealtimeError, RealtimeTransport, SubscriptionHandle, WebSocketConnector};
use parking_lot::Mutex;
use serde_json::Map;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Offline-capable GraphQL client.
///
/// Cloning is cheap; clones share all state.
///
/// # Example
///
/// ```rust,no_run
/// use gqlsync_engine::{ClientConfig, MockExecutor, MutationOptions, SyncClient};
/// use gqlsync_protocol::GraphQLOperation;
/// use gqlsync_realtime::{AuthMode, MockConnector};
/// use serde_json::json;
/// use std::sync::Arc;
///
/// # async fn demo() -> gqlsync_engine::SyncResult<()> {
/// let config = ClientConfig::new("https://example.appsync-api.us-east-1.amazonaws.com/graphql")
///     .with_region("us-east-1")
///     .with_auth(AuthMode::api_key("da2-key"));
/// let client = SyncClient::new(config, Arc::new(MockExecutor::new()), Arc::new(MockConnector::new()))?;
///
/// let handle = client
///     .mutate(
///         MutationOptions::new(GraphQLOperation::mutation("mutation { addTodo }", "addTodo"))
///             .with_optimistic_response(json!({"addTodo": {"__typename": "Todo", "id": "local-1"}})),
///     )
///     .await?;
/// let confirmed = handle.result().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct SyncClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: ClientConfig,
    cache: Arc<dyn NormalizedCache>,
    executor: Arc<dyn GraphQLExecutor>,
    transport: RealtimeTransport,
    outbox: Arc<Outbox>,
    persistence: Arc<Persistence>,
    network: NetworkStatus,
    hydrated: OnceCell<()>,
    worker: Mutex<Option<JoinHandle<()>>>,
    resumed: Mutex<Vec<SyncHandle>>,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.lock().take() {
            worker.abort();
        }
    }
}

impl SyncClient {
    /// Creates a client over an in-memory normalized cache.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] if the configuration is invalid or its
    /// key prefix is already used by another client in this process.
    pub fn new(
        config: ClientConfig,
        executor: Arc<dyn GraphQLExecutor>,
        connector: Arc<dyn WebSocketConnector>,
    ) -> SyncResult<Self> {
        Self::with_cache(config, Arc::new(InMemoryCache::new()), executor, connector)
    }

    /// Creates a client over a caller-supplied cache.
    ///
    /// # Errors
    ///
    /// See [`new`](Self::new).
    pub fn with_cache(
        config: ClientConfig,
        cache: Arc<dyn NormalizedCache>,
        executor: Arc<dyn GraphQLExecutor>,
        connector: Arc<dyn WebSocketConnector>,
    ) -> SyncResult<Self> {
        config.validate()?;
        let transport =
            RealtimeTransport::new(config.realtime_config()?, connector).map_err(|err| match err {
                RealtimeError::Config(message) => SyncError::Config(message),
                other => SyncError::Realtime(other),
            })?;
        register_prefix(&config.key_prefix).map_err(|err| match err {
            CacheError::DuplicatePrefix(prefix) => SyncError::Config(format!(
                "key prefix {prefix:?} is already in use by another client"
            )),
            other => SyncError::Cache(other),
        })?;

        let persistence = Arc::new(Persistence::new(OfflineStore::new(
            Arc::clone(&config.storage),
            config.key_prefix.clone(),
        )));
        let outbox = Arc::new(Outbox::new(
            Arc::clone(&cache),
            Arc::clone(&executor),
            ConflictEngine::new(config.conflict_resolver.clone(), config.max_conflict_retries),
            config.retry.clone(),
            Arc::clone(&persistence),
        ));

        info!(
            url = %config.url,
            auth = config.auth.as_ref().map_or("none", |auth| auth.name()),
            prefix = %config.key_prefix,
            "sync client created"
        );
        Ok(Self {
            inner: Arc::new(ClientInner {
                config,
                cache,
                executor,
                transport,
                outbox,
                persistence,
                network: NetworkStatus::new(true),
                hydrated: OnceCell::new(),
                worker: Mutex::new(None),
                resumed: Mutex::new(Vec::new()),
            }),
        })
    }

    /// Resolves once persisted state is loaded and the outbox is running.
    ///
    /// Every operation waits for this first; calling it is only needed to
    /// know when the restored cache is readable. Syncs that were suspended
    /// offline are restarted here; see
    /// [`take_resumed_syncs`](Self::take_resumed_syncs).
    pub async fn hydrated(&self) {
        self.inner
            .hydrated
            .get_or_init(|| async {
                let inner = &self.inner;
                let state = inner.persistence.load();
                if !state.cache.is_empty() {
                    inner.cache.restore(state.cache);
                }
                inner.outbox.restore(&state.metadata);
                let worker = inner.outbox.spawn_worker(inner.network.clone());
                *inner.worker.lock() = Some(worker);

                let resumed: Vec<SyncHandle> = inner
                    .persistence
                    .suspended_syncs()
                    .into_iter()
                    .map(|sync| delta::spawn(self.sync_context(), SyncOptions::from(sync)))
                    .collect();
                info!(
                    pending = inner.outbox.len(),
                    resumed_syncs = resumed.len(),
                    "client hydrated"
                );
                *inner.resumed.lock() = resumed;
            })
            .await;
    }

    /// Queues a mutation.
    ///
    /// The optimistic response is in the cache when this returns; the
    /// server result arrives through the handle. Mutations reach the server
    /// in call order.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] if `options` does not hold a mutation.
    pub async fn mutate(&self, options: MutationOptions) -> SyncResult<MutationHandle> {
        expect_type(&options.operation, OperationType::Mutation)?;
        self.hydrated().await;
        Ok(self.inner.outbox.enqueue(options))
    }

    /// Runs a query under `policy`.
    ///
    /// While offline, every policy answers from the cache.
    ///
    /// # Errors
    ///
    /// [`SyncError::CacheMiss`] when the cache must answer and cannot,
    /// [`SyncError::GraphQL`] for server errors, or the executor's error.
    pub async fn query(
        &self,
        operation: &GraphQLOperation,
        policy: FetchPolicy,
    ) -> SyncResult<FetchResult> {
        expect_type(operation, OperationType::Query)?;
        self.hydrated().await;
        let inner = &self.inner;

        let cached = || {
            inner
                .cache
                .read(operation)
                .map(|value| root_result(&operation.root_field, value))
                .ok_or_else(|| SyncError::CacheMiss(operation.display_name().to_string()))
        };

        let use_cache = match policy {
            FetchPolicy::CacheOnly => true,
            FetchPolicy::CacheFirst => {
                !inner.network.is_online() || inner.cache.read(operation).is_some()
            }
            FetchPolicy::NetworkOnly => !inner.network.is_online(),
        };
        if use_cache {
            debug!(query = %operation.display_name(), ?policy, "answering from cache");
            return cached();
        }

        let result = inner.executor.execute(operation).await?;
        if result.has_errors() {
            return Err(SyncError::GraphQL(result.errors));
        }
        let data = result
            .field(&operation.root_field)
            .cloned()
            .unwrap_or(Value::Null);
        let write = CacheWrite::Query {
            query: operation.clone(),
            data,
        };
        inner.outbox.rebase(vec![write])?;
        Ok(result)
    }

    /// Starts a subscription over the shared realtime socket.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] if `operation` is not a subscription.
    pub fn subscribe(&self, operation: GraphQLOperation) -> SyncResult<SubscriptionHandle> {
        expect_type(&operation, OperationType::Subscription)?;
        Ok(self.inner.transport.subscribe(operation))
    }

    /// Starts a delta sync.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] if the options hold operations of the
    /// wrong type.
    pub async fn sync(&self, options: SyncOptions) -> SyncResult<SyncHandle> {
        expect_type(&options.base_query, OperationType::Query)?;
        if let Some(subscription) = &options.subscription {
            expect_type(subscription, OperationType::Subscription)?;
        }
        if let Some(delta_query) = &options.delta_query {
            expect_type(delta_query, OperationType::Query)?;
        }
        self.hydrated().await;
        Ok(delta::spawn(self.sync_context(), options))
    }

    /// Takes the handles of syncs restarted by hydration because they were
    /// suspended offline when the previous client stopped.
    ///
    /// Until taken, the handles live as long as the client.
    pub async fn take_resumed_syncs(&self) -> Vec<SyncHandle> {
        self.hydrated().await;
        std::mem::take(&mut *self.inner.resumed.lock())
    }

    fn sync_context(&self) -> SyncContext {
        let inner = &self.inner;
        SyncContext {
            cache: Arc::clone(&inner.cache),
            executor: Arc::clone(&inner.executor),
            transport: inner.transport.clone(),
            outbox: Arc::clone(&inner.outbox),
            persistence: Arc::clone(&inner.persistence),
            network: inner.network.clone(),
            retry: inner.config.retry.clone(),
            base_refresh_interval: inner.config.base_refresh_interval,
        }
    }

    /// Reports a network transition. Going online drains the outbox;
    /// going offline suspends delta syncs.
    pub fn set_online(&self, online: bool) {
        if self.inner.network.set_online(online) {
            info!(online, "network status changed");
        }
    }

    /// Returns true if the client considers itself online.
    pub fn is_online(&self) -> bool {
        self.inner.network.is_online()
    }

    /// Mutations not yet confirmed by the server, in send order.
    pub fn pending_mutations(&self) -> Vec<PendingMutationInfo> {
        self.inner.outbox.pending()
    }

    /// Sends queued mutations now. Returns how many settled.
    pub async fn flush(&self) -> usize {
        self.hydrated().await;
        self.inner.outbox.drain(&self.inner.network).await
    }

    /// The normalized cache.
    pub fn cache(&self) -> &Arc<dyn NormalizedCache> {
        &self.inner.cache
    }

    /// The realtime transport.
    pub fn transport(&self) -> &RealtimeTransport {
        &self.inner.transport
    }

    /// The persisted offline state.
    pub fn offline_store(&self) -> &OfflineStore {
        self.inner.persistence.store()
    }

    /// The configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }
}

impl std::fmt::Debug for SyncClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncClient")
            .field("config", &self.inner.config)
            .field("online", &self.is_online())
            .field("outbox", &self.inner.outbox)
            .finish_non_exhaustive()
    }
}

fn expect_type(operation: &GraphQLOperation, expected: OperationType) -> SyncResult<()> {
    if operation.operation_type == expected {
        Ok(())
    } else {
        Err(SyncError::Config(format!(
            "{} is a {:?}, expected a {:?}",
            operation.display_name(),
            operation.operation_type,
            expected
        )))
    }
}

fn root_result(root_field: &str, value: Value) -> FetchResult {
    let mut data = Map::new();
    data.insert(root_field.to_string(), value);
    FetchResult::data(Value::Object(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::MockExecutor;
    use gqlsync_cache::InMemoryBackend;
    use gqlsync_realtime::{AuthMode, MockConnector};
    use serde_json::json;

    fn config() -> ClientConfig {
        ClientConfig::new("https://api.example.com/graphql")
            .with_region("us-east-1")
            .with_auth(AuthMode::api_key("key"))
            .with_key_prefix(format!("test-{}:", uuid::Uuid::new_v4()))
    }

    fn client(config: ClientConfig, executor: MockExecutor) -> (SyncClient, Arc<MockExecutor>) {
        let executor = Arc::new(executor);
        let client =
            SyncClient::new(config, executor.clone(), Arc::new(MockConnector::new())).unwrap();
        (client, executor)
    }

    fn list_query() -> GraphQLOperation {
        GraphQLOperation::query("query { listTodos { id } }", "listTodos")
    }

    #[test]
    fn duplicate_prefix_is_rejected() {
        let config = config();
        let executor: Arc<dyn GraphQLExecutor> = Arc::new(MockExecutor::new());
        let connector: Arc<dyn WebSocketConnector> = Arc::new(MockConnector::new());

        assert!(SyncClient::new(config.clone(), executor.clone(), connector.clone()).is_ok());
        let err = SyncClient::new(config, executor, connector).unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let executor: Arc<dyn GraphQLExecutor> = Arc::new(MockExecutor::new());
        let err = SyncClient::new(
            ClientConfig::new("https://api.example.com/graphql"),
            executor,
            Arc::new(MockConnector::new()),
        )
        .unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
    }

    #[tokio::test]
    async fn query_policies() {
        let executor = MockExecutor::new();
        executor.push_response(Ok(FetchResult::data(
            json!({"listTodos": [{"__typename": "Todo", "id": "1"}]}),
        )));
        let (client, executor) = client(config(), executor);

        assert!(matches!(
            client.query(&list_query(), FetchPolicy::CacheOnly).await,
            Err(SyncError::CacheMiss(_))
        ));

        let fetched = client.query(&list_query(), FetchPolicy::CacheFirst).await.unwrap();
        assert_eq!(fetched.field("listTodos").unwrap()[0]["id"], json!("1"));

        let cached = client.query(&list_query(), FetchPolicy::CacheFirst).await.unwrap();
        assert_eq!(cached, fetched);
        assert_eq!(executor.executed().len(), 1);
    }

    #[tokio::test]
    async fn offline_query_falls_back_to_cache() {
        let (client, executor) = client(config(), MockExecutor::new());
        client
            .cache()
            .write(CacheWrite::Query {
                query: list_query(),
                data: json!([]),
            })
            .unwrap();
        client.set_online(false);

        let result = client.query(&list_query(), FetchPolicy::NetworkOnly).await.unwrap();
        assert_eq!(result.field("listTodos"), Some(&json!([])));
        assert!(executor.executed().is_empty());
    }

    #[tokio::test]
    async fn wrong_operation_type_is_rejected() {
        let (client, _) = client(config(), MockExecutor::new());
        let err = client
            .mutate(MutationOptions::new(list_query()))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
        assert!(client.subscribe(list_query()).is_err());
    }

    #[tokio::test]
    async fn offline_mutations_are_sent_when_back_online() {
        let executor = MockExecutor::with_handler(|op| {
            Ok(FetchResult::data(json!({
                "addTodo": {"__typename": "Todo", "id": format!("server-{}", op.variables["n"])}
            })))
        });
        let (client, executor) = client(config(), executor);
        client.set_online(false);

        let mut handles = Vec::new();
        for n in 0..3 {
            let handle = client
                .mutate(
                    MutationOptions::new(
                        GraphQLOperation::mutation("mutation { addTodo }", "addTodo")
                            .with_variable("n", json!(n)),
                    )
                    .with_optimistic_response(json!({
                        "addTodo": {"__typename": "Todo", "id": format!("local-{n}")}
                    })),
                )
                .await
                .unwrap();
            handles.push(handle);
        }
        assert_eq!(client.pending_mutations().len(), 3);
        assert!(executor.executed().is_empty());

        client.set_online(true);
        for handle in handles {
            handle.result().await.unwrap();
        }

        let order: Vec<_> = executor
            .executed()
            .iter()
            .map(|op| op.variables["n"].clone())
            .collect();
        assert_eq!(order, vec![json!(0), json!(1), json!(2)]);
        assert!(client.pending_mutations().is_empty());
        assert!(client.cache().read_record("Todo:server-2").is_some());
        assert!(client.cache().read_record("Todo:local-0").is_none());
    }

    #[tokio::test]
    async fn hydration_restores_queue_and_cache() {
        let storage = Arc::new(InMemoryBackend::new());
        let config = config().with_storage(storage.clone());
        let mutation = GraphQLOperation::mutation("mutation { addTodo }", "addTodo");

        let previous = InMemoryCache::new();
        previous
            .write(CacheWrite::Entities {
                data: json!({"__typename": "Todo", "id": "local-1"}),
            })
            .unwrap();
        let store = OfflineStore::new(storage, config.key_prefix.clone());
        store.save_cache(&previous.extract()).unwrap();
        let mut metadata = gqlsync_cache::OfflineMetadata::default();
        metadata
            .snapshot
            .enqueued_mutations
            .push(gqlsync_cache::PersistedMutation {
                id: "m1".into(),
                operation: mutation.clone(),
                optimistic_response: Some(json!({"addTodo": {"__typename": "Todo", "id": "local-1"}})),
            });
        store.save_metadata(&metadata).unwrap();

        let executor = MockExecutor::new();
        executor.push_response(Ok(FetchResult::data(
            json!({"addTodo": {"__typename": "Todo", "id": "server-1"}}),
        )));
        let (client, executor) = client(config, executor);
        client.set_online(false);
        client.hydrated().await;

        assert!(client.cache().read_record("Todo:local-1").is_some());
        let pending = client.pending_mutations();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "m1");

        client.set_online(true);
        client.flush().await;
        assert_eq!(executor.executed().len(), 1);
        assert!(client.pending_mutations().is_empty());
        assert!(client.cache().read_record("Todo:server-1").is_some());
        assert!(client.cache().read_record("Todo:local-1").is_none());
    }

    #[tokio::test]
    async fn hydration_resumes_syncs_suspended_offline() {
        let storage = Arc::new(InMemoryBackend::new());
        let config = config().with_storage(storage.clone());
        let options = SyncOptions::new(GraphQLOperation::query(
            "query { listTodos { items { id } } }",
            "listTodos",
        ));
        let mut metadata = gqlsync_cache::OfflineMetadata::default();
        metadata
            .delta_sync
            .suspended
            .insert(options.key(), gqlsync_cache::SuspendedSync::from(&options));
        OfflineStore::new(storage, config.key_prefix.clone())
            .save_metadata(&metadata)
            .unwrap();

        let executor = MockExecutor::new();
        executor.push_response(Ok(FetchResult::data(
            json!({"listTodos": {"items": [{"__typename": "Todo", "id": "1"}]}}),
        )));
        let (client, executor) = client(config, executor);

        let mut resumed = client.take_resumed_syncs().await;
        assert_eq!(resumed.len(), 1);
        assert_eq!(resumed[0].key(), options.key());
        assert!(matches!(
            resumed[0].next_event().await,
            Some(crate::SyncEvent::BaseApplied { from_cache: false })
        ));
        assert_eq!(executor.executed()[0].root_field, "listTodos");
        assert!(client
            .offline_store()
            .load_or_default()
            .metadata
            .delta_sync
            .suspended
            .is_empty());
        assert!(client.take_resumed_syncs().await.is_empty());
    }
}
