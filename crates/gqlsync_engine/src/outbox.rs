//! The mutation outbox.
//!
//! Mutations are applied optimistically on enqueue and sent to the server
//! strictly in enqueue order, one at a time. The cache state before the
//! first pending mutation is kept as a snapshot. Whenever the head
//! mutation settles, the snapshot is restored, the server result (if any)
//! applied, and every still-pending optimistic result replayed on top.

use crate::conflict::ConflictEngine;
use crate::error::{SyncError, SyncResult};
use crate::executor::GraphQLExecutor;
use crate::identity::IdentityMap;
use crate::network::NetworkStatus;
use crate::persistence::Persistence;
use crate::update::{apply_result, UpdateFn};
use gqlsync_cache::{
    CacheResult, CacheSnapshot, CacheWrite, InMemoryCache, NormalizedCache, OfflineMetadata,
    PersistedMutation, RecordingCache,
};
use gqlsync_protocol::{FetchResult, GraphQLOperation, Value};
use gqlsync_realtime::{RetryConfig, RetryDecision};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex as AsyncMutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How long the worker waits before retrying a head mutation whose
/// retries were exhausted.
pub(crate) const STALLED_RETRY_INTERVAL: Duration = Duration::from_secs(30);

/// A mutation request.
#[derive(Clone)]
pub struct MutationOptions {
    /// The mutation.
    pub operation: GraphQLOperation,
    /// Result to show until the server answers.
    pub optimistic_response: Option<Value>,
    /// Cache patcher run after the optimistic and the server result.
    pub update: Option<UpdateFn>,
}

impl MutationOptions {
    /// Creates options for `operation`.
    pub fn new(operation: GraphQLOperation) -> Self {
        Self {
            operation,
            optimistic_response: None,
            update: None,
        }
    }

    /// Sets the optimistic response.
    #[must_use]
    pub fn with_optimistic_response(mut self, response: Value) -> Self {
        self.optimistic_response = Some(response);
        self
    }

    /// Sets the update function.
    #[must_use]
    pub fn with_update<F>(mut self, update: F) -> Self
    where
        F: Fn(&dyn NormalizedCache, &FetchResult) -> CacheResult<()> + Send + Sync + 'static,
    {
        self.update = Some(Arc::new(update));
        self
    }
}

impl std::fmt::Debug for MutationOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutationOptions")
            .field("operation", &self.operation)
            .field("optimistic_response", &self.optimistic_response)
            .field("has_update", &self.update.is_some())
            .finish()
    }
}

/// Lifecycle of an outbox entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationStatus {
    /// Waiting to be sent, or in flight.
    Enqueued,
    /// The server accepted it.
    Committed,
    /// Discarded; its optimistic effect was rolled back.
    RolledBack,
}

/// A queued mutation as reported by [`pending_mutations`](crate::SyncClient::pending_mutations).
#[derive(Debug, Clone, PartialEq)]
pub struct PendingMutationInfo {
    /// Outbox entry id.
    pub id: String,
    /// The mutation, with known server ids already substituted.
    pub operation: GraphQLOperation,
    /// Optimistic response, if any.
    pub optimistic_response: Option<Value>,
    /// Failed transient attempts so far.
    pub attempts: u32,
}

/// Returned by `mutate`: the optimistic value now, the server result later.
#[derive(Debug)]
pub struct MutationHandle {
    id: String,
    optimistic: Option<Value>,
    result: oneshot::Receiver<SyncResult<FetchResult>>,
}

impl MutationHandle {
    /// Outbox entry id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The optimistic response as applied to the cache.
    pub fn optimistic(&self) -> Option<&Value> {
        self.optimistic.as_ref()
    }

    /// Waits for the server's answer.
    ///
    /// Resolves to [`SyncError::Cancelled`] if the client is dropped first.
    pub async fn result(self) -> SyncResult<FetchResult> {
        self.result.await.map_err(|_| SyncError::Cancelled)?
    }
}

/// What one processing step did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ProcessOutcome {
    /// Nothing queued.
    Idle,
    /// The head mutation was accepted.
    Committed(String),
    /// The head mutation failed for good and was rolled back.
    RolledBack(String),
    /// The head mutation failed transiently; try again after the delay.
    RetryAfter(Duration),
    /// Retries are exhausted; the head stays queued and the worker tries
    /// again after [`STALLED_RETRY_INTERVAL`].
    Stalled,
}

struct PendingMutation {
    id: String,
    operation: GraphQLOperation,
    optimistic_response: Option<Value>,
    update: Option<UpdateFn>,
    status: MutationStatus,
    attempts: u32,
    completion: Option<oneshot::Sender<SyncResult<FetchResult>>>,
}

impl PendingMutation {
    fn persisted(&self) -> PersistedMutation {
        PersistedMutation {
            id: self.id.clone(),
            operation: self.operation.clone(),
            optimistic_response: self.optimistic_response.clone(),
        }
    }
}

#[derive(Default)]
struct OutboxState {
    queue: VecDeque<PendingMutation>,
    snapshot: Option<CacheSnapshot>,
    ids: IdentityMap,
}

pub(crate) struct Outbox {
    cache: Arc<dyn NormalizedCache>,
    executor: Arc<dyn GraphQLExecutor>,
    conflicts: ConflictEngine,
    retry: RetryConfig,
    persistence: Arc<Persistence>,
    state: Mutex<OutboxState>,
    in_flight: AsyncMutex<()>,
    wake: Notify,
}

impl Outbox {
    pub(crate) fn new(
        cache: Arc<dyn NormalizedCache>,
        executor: Arc<dyn GraphQLExecutor>,
        conflicts: ConflictEngine,
        retry: RetryConfig,
        persistence: Arc<Persistence>,
    ) -> Self {
        Self {
            cache,
            executor,
            conflicts,
            retry,
            persistence,
            state: Mutex::new(OutboxState::default()),
            in_flight: AsyncMutex::new(()),
            wake: Notify::new(),
        }
    }

    /// Rebuilds the queue from persisted metadata. Restored mutations have
    /// no update function and nobody awaiting their result.
    pub(crate) fn restore(&self, metadata: &OfflineMetadata) {
        let mut state = self.state.lock();
        state.ids = IdentityMap::from_persisted(metadata.ids_map.clone());
        state.queue = metadata
            .snapshot
            .enqueued_mutations
            .iter()
            .map(|persisted| PendingMutation {
                id: persisted.id.clone(),
                operation: persisted.operation.clone(),
                optimistic_response: persisted.optimistic_response.clone(),
                update: None,
                status: MutationStatus::Enqueued,
                attempts: 0,
                completion: None,
            })
            .collect();
        state.snapshot = if state.queue.is_empty() {
            None
        } else {
            Some(metadata.snapshot.cache.clone())
        };
        if !state.queue.is_empty() {
            info!(pending = state.queue.len(), "restored pending mutations");
            self.wake.notify_one();
        }
    }

    /// Applies the optimistic result and queues the mutation.
    pub(crate) fn enqueue(&self, options: MutationOptions) -> MutationHandle {
        let MutationOptions {
            mut operation,
            mut optimistic_response,
            update,
        } = options;
        let id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();

        {
            let mut state = self.state.lock();
            if state.queue.is_empty() && state.snapshot.is_none() {
                state.snapshot = Some(self.cache.extract());
            }

            state.ids.remap_variables(&mut operation.variables);
            if let Some(optimistic) = optimistic_response.as_mut() {
                state.ids.remap(optimistic);
                if let Err(e) =
                    apply_result(self.cache.as_ref(), optimistic, update.as_ref(), operation.display_name())
                {
                    warn!(mutation_id = %id, error = %e, "failed to apply optimistic response");
                }
            }

            state.queue.push_back(PendingMutation {
                id: id.clone(),
                operation: operation.clone(),
                optimistic_response: optimistic_response.clone(),
                update,
                status: MutationStatus::Enqueued,
                attempts: 0,
                completion: Some(tx),
            });
            info!(
                mutation_id = %id,
                mutation = %operation.display_name(),
                pending = state.queue.len(),
                "mutation enqueued"
            );
            self.persist(&state);
        }
        self.wake.notify_one();

        MutationHandle {
            id,
            optimistic: optimistic_response,
            result: rx,
        }
    }

    /// Snapshot of the queue in FIFO order.
    pub(crate) fn pending(&self) -> Vec<PendingMutationInfo> {
        self.state
            .lock()
            .queue
            .iter()
            .map(|entry| PendingMutationInfo {
                id: entry.id.clone(),
                operation: entry.operation.clone(),
                optimistic_response: entry.optimistic_response.clone(),
                attempts: entry.attempts,
            })
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Sends the head mutation and settles it.
    pub(crate) async fn process_next(&self) -> ProcessOutcome {
        let _slot = self.in_flight.lock().await;

        let head = {
            let state = self.state.lock();
            state.queue.front().map(|entry| {
                let mut operation = entry.operation.clone();
                state.ids.remap_variables(&mut operation.variables);
                (entry.id.clone(), operation)
            })
        };
        let Some((id, operation)) = head else {
            return ProcessOutcome::Idle;
        };

        debug!(mutation_id = %id, mutation = %operation.display_name(), "sending mutation");
        match self.conflicts.execute(self.executor.as_ref(), &operation).await {
            Ok(result) => {
                self.settle(&id, Ok(result));
                ProcessOutcome::Committed(id)
            }
            Err(err) if err.is_retryable() => self.schedule_retry(&id, err),
            Err(err) => {
                warn!(mutation_id = %id, error = %err, "mutation failed; rolling back");
                self.settle(&id, Err(err));
                ProcessOutcome::RolledBack(id)
            }
        }
    }

    /// Processes mutations until the queue is empty, the network goes
    /// offline, or retries stall. Returns how many mutations settled.
    pub(crate) async fn drain(&self, network: &NetworkStatus) -> usize {
        let mut settled = 0;
        while network.is_online() {
            match self.process_next().await {
                ProcessOutcome::Idle | ProcessOutcome::Stalled => break,
                ProcessOutcome::Committed(_) | ProcessOutcome::RolledBack(_) => settled += 1,
                ProcessOutcome::RetryAfter(delay) => tokio::time::sleep(delay).await,
            }
        }
        settled
    }

    /// Spawns the task draining the outbox whenever work arrives, the
    /// network comes back, or a stalled head is due for another try.
    pub(crate) fn spawn_worker(self: &Arc<Self>, network: NetworkStatus) -> JoinHandle<()> {
        let outbox = Arc::clone(self);
        tokio::spawn(async move {
            let mut status = network.subscribe();
            loop {
                let mut stalled = false;
                if *status.borrow_and_update() {
                    outbox.drain(&network).await;
                    stalled = network.is_online() && outbox.len() > 0;
                }
                tokio::select! {
                    _ = outbox.wake.notified() => {}
                    _ = tokio::time::sleep(STALLED_RETRY_INTERVAL), if stalled => {
                        debug!(pending = outbox.len(), "retrying stalled outbox");
                    }
                    changed = status.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        })
    }

    /// Applies `writes` beneath the pending optimistic results, so they
    /// survive the next snapshot restore.
    pub(crate) fn rebase(&self, writes: Vec<CacheWrite>) -> CacheResult<()> {
        self.rebase_with(|cache| writes.into_iter().try_for_each(|write| cache.write(write)))
    }

    /// Runs `apply` against the confirmed cache state, the one without
    /// pending optimistic results, and keeps its writes beneath them.
    ///
    /// With nothing pending `apply` writes to the live cache directly.
    /// Otherwise it sees a scratch copy of the snapshot; its recorded
    /// writes are then applied to the restored snapshot, the snapshot is
    /// retaken and the optimistic results replayed on top.
    pub(crate) fn rebase_with<R>(
        &self,
        apply: impl FnOnce(&dyn NormalizedCache) -> CacheResult<R>,
    ) -> CacheResult<R> {
        let mut state = self.state.lock();
        let Some(snapshot) = state.snapshot.take() else {
            let result = apply(self.cache.as_ref());
            self.persist(&state);
            return result;
        };

        let scratch = Arc::new(InMemoryCache::from_snapshot(snapshot.clone()));
        let recorder = RecordingCache::new(scratch);
        recorder.start_recording();
        let result = apply(&recorder);
        recorder.stop_recording();
        let writes = recorder.take_recorded();
        if writes.is_empty() {
            state.snapshot = Some(snapshot);
            return result;
        }

        self.cache.set_broadcast_suppressed(true);
        self.cache.restore(snapshot);
        for write in writes {
            if let Err(e) = self.cache.write(write) {
                warn!(error = %e, "failed to rebase cache write");
            }
        }
        state.snapshot = Some(self.cache.extract());
        self.replay(&mut state);
        self.cache.set_broadcast_suppressed(false);
        self.cache.broadcast();
        self.persist(&state);
        result
    }

    fn schedule_retry(&self, id: &str, err: SyncError) -> ProcessOutcome {
        let mut state = self.state.lock();
        let Some(entry) = state.queue.iter_mut().find(|entry| entry.id == id) else {
            return ProcessOutcome::Idle;
        };

        match self.retry.decide_jittered(entry.attempts, &err) {
            RetryDecision::RetryAfter(delay) => {
                entry.attempts += 1;
                info!(
                    mutation_id = %id,
                    attempt = entry.attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "mutation failed; retrying"
                );
                ProcessOutcome::RetryAfter(delay)
            }
            RetryDecision::Stop => {
                entry.attempts = 0;
                warn!(mutation_id = %id, error = %err, "mutation retries exhausted; keeping it queued");
                ProcessOutcome::Stalled
            }
        }
    }

    /// Removes entry `id`, rolls the cache back to the snapshot, applies the
    /// server result on success, replays what is left and notifies the
    /// caller.
    fn settle(&self, id: &str, outcome: SyncResult<FetchResult>) {
        let mut state = self.state.lock();
        let Some(position) = state.queue.iter().position(|entry| entry.id == id) else {
            return;
        };
        let Some(mut entry) = state.queue.remove(position) else {
            return;
        };

        self.cache.set_broadcast_suppressed(true);
        if let Some(snapshot) = state.snapshot.take() {
            self.cache.restore(snapshot);
        }

        match &outcome {
            Ok(result) => {
                if let (Some(optimistic), Some(data)) = (&entry.optimistic_response, &result.data) {
                    state.ids.record(optimistic, data);
                }
                if let Some(data) = &result.data {
                    if let Err(e) = apply_result(
                        self.cache.as_ref(),
                        data,
                        entry.update.as_ref(),
                        entry.operation.display_name(),
                    ) {
                        warn!(mutation_id = %id, error = %e, "failed to apply server result");
                    }
                }
                entry.status = MutationStatus::Committed;
            }
            Err(_) => entry.status = MutationStatus::RolledBack,
        }

        if state.queue.is_empty() {
            state.ids.clear();
        } else {
            state.snapshot = Some(self.cache.extract());
            self.replay(&mut state);
        }
        self.cache.set_broadcast_suppressed(false);
        self.cache.broadcast();
        self.persist(&state);
        drop(state);

        info!(mutation_id = %id, status = ?entry.status, "mutation settled");
        if let Some(completion) = entry.completion.take() {
            let _ = completion.send(outcome);
        }
    }

    /// Re-applies every pending optimistic result, substituting known
    /// server ids first.
    fn replay(&self, state: &mut OutboxState) {
        let OutboxState { queue, ids, .. } = state;
        for pending in queue.iter_mut() {
            ids.remap_variables(&mut pending.operation.variables);
            if let Some(optimistic) = pending.optimistic_response.as_mut() {
                ids.remap(optimistic);
                if let Err(e) = apply_result(
                    self.cache.as_ref(),
                    optimistic,
                    pending.update.as_ref(),
                    pending.operation.display_name(),
                ) {
                    warn!(mutation_id = %pending.id, error = %e, "failed to replay optimistic response");
                }
            }
        }
    }

    fn persist(&self, state: &OutboxState) {
        self.persistence.save_cache_from(self.cache.as_ref());
        self.persistence.update_metadata(|metadata| {
            metadata.ids_map = state.ids.to_persisted();
            metadata.snapshot.cache = state.snapshot.clone().unwrap_or_default();
            metadata.snapshot.enqueued_mutations =
                state.queue.iter().map(PendingMutation::persisted).collect();
        });
    }
}

impl std::fmt::Debug for Outbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Outbox")
            .field("pending", &self.len())
            .field("conflicts", &self.conflicts)
            .finish_non_exhaustive()
    }
}
