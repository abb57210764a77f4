//! Conflict resolution around mutation execution.
//!
//! A mutation rejected by a server-side version check is handed to a
//! [`ConflictResolver`], which either supplies corrected variables (the
//! mutation is re-issued) or gives up. Non-conflict errors bypass the
//! resolver.

use crate::error::{SyncError, SyncResult};
use crate::executor::GraphQLExecutor;
use async_trait::async_trait;
use futures::FutureExt;
use gqlsync_protocol::{
    find_conflict, ConflictContext, ConflictResolution, FetchResult, GraphQLOperation, Value,
};
use serde_json::Map;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Default cap on resolver calls per mutation.
pub const DEFAULT_MAX_CONFLICT_RETRIES: u32 = 10;

/// A user policy for version conflicts.
#[async_trait]
pub trait ConflictResolver: Send + Sync {
    /// Decides how to continue after a conflict.
    ///
    /// Returning an error is treated as [`ConflictResolution::Discard`].
    async fn resolve(&self, context: ConflictContext) -> SyncResult<ConflictResolution>;
}

/// Plain closures resolve synchronously: `Some(variables)` retries, even
/// with an empty map, and `None` discards.
#[async_trait]
impl<F> ConflictResolver for F
where
    F: Fn(&ConflictContext) -> Option<Map<String, Value>> + Send + Sync,
{
    async fn resolve(&self, context: ConflictContext) -> SyncResult<ConflictResolution> {
        Ok(ConflictResolution::from_variables((self)(&context)))
    }
}

/// Executes mutations, looping through the resolver on conflicts.
#[derive(Clone)]
pub struct ConflictEngine {
    resolver: Option<Arc<dyn ConflictResolver>>,
    max_retries: u32,
}

impl ConflictEngine {
    /// Creates an engine. Without a resolver every conflict is surfaced.
    pub fn new(resolver: Option<Arc<dyn ConflictResolver>>, max_retries: u32) -> Self {
        Self {
            resolver,
            max_retries,
        }
    }

    /// Maximum resolver calls per mutation.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Executes `operation`.
    ///
    /// Returns the successful result, [`SyncError::Conflict`] when the
    /// conflict is not resolved, or [`SyncError::GraphQL`] for any other
    /// GraphQL error. Transport errors propagate unchanged.
    pub async fn execute(
        &self,
        executor: &dyn GraphQLExecutor,
        operation: &GraphQLOperation,
    ) -> SyncResult<FetchResult> {
        let mut current = operation.clone();
        let mut retries = 0u32;

        loop {
            let result = executor.execute(&current).await?;

            let Some(conflict) = find_conflict(&result) else {
                if result.has_errors() {
                    return Err(SyncError::GraphQL(result.errors));
                }
                return Ok(result);
            };

            let data = conflict.data.clone().unwrap_or(Value::Null);
            let mutation_name = current.display_name().to_string();
            let unresolved = |retries| SyncError::Conflict {
                mutation_name: mutation_name.clone(),
                data: data.clone(),
                retries,
            };

            let Some(resolver) = self.resolver.as_ref().filter(|_| retries < self.max_retries)
            else {
                info!(mutation = %mutation_name, retries, "conflict not resolved");
                return Err(unresolved(retries));
            };

            let context = ConflictContext {
                mutation_name: mutation_name.clone(),
                operation_type: current.operation_type,
                variables: current.variables.clone(),
                data: data.clone(),
                retries,
            };
            debug!(mutation = %mutation_name, retries, "invoking conflict resolver");

            let resolution = match AssertUnwindSafe(resolver.resolve(context))
                .catch_unwind()
                .await
            {
                Ok(Ok(resolution)) => resolution,
                Ok(Err(err)) => {
                    warn!(mutation = %mutation_name, error = %err, "conflict resolver failed");
                    ConflictResolution::Discard
                }
                Err(_) => {
                    warn!(mutation = %mutation_name, "conflict resolver panicked");
                    ConflictResolution::Discard
                }
            };
            retries += 1;

            match resolution {
                ConflictResolution::Retry(variables) => {
                    info!(mutation = %mutation_name, retries, "retrying after conflict");
                    current.variables = variables;
                }
                ConflictResolution::Discard => {
                    info!(mutation = %mutation_name, retries, "conflict discarded");
                    return Err(unresolved(retries));
                }
            }
        }
    }
}

impl std::fmt::Debug for ConflictEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConflictEngine")
            .field("has_resolver", &self.resolver.is_some())
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::MockExecutor;
    use gqlsync_protocol::{GraphQLError, CONFLICT_ERROR_TYPE};
    use proptest::prelude::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn conflict(version: u64) -> SyncResult<FetchResult> {
        Ok(FetchResult::errors(vec![GraphQLError::new("conditional check failed")
            .with_type(CONFLICT_ERROR_TYPE)
            .with_data(json!({"id": "1", "version": version}))]))
    }

    fn mutation() -> GraphQLOperation {
        GraphQLOperation::mutation("mutation ($v: Int) { updateTodo }", "updateTodo")
            .with_variable("expectedVersion", json!(1))
    }

    fn bump_version() -> Arc<dyn ConflictResolver> {
        Arc::new(|ctx: &ConflictContext| {
            let mut vars = ctx.variables.clone();
            let version = ctx.data["version"].as_u64()?;
            vars.insert("expectedVersion".into(), json!(version + 1));
            Some(vars)
        })
    }

    #[tokio::test]
    async fn resolved_conflict_is_resubmitted() {
        let executor = MockExecutor::new();
        executor.push_response(conflict(2));
        executor.push_response(Ok(FetchResult::data(json!({"updateTodo": {"id": "1", "version": 3}}))));

        let engine = ConflictEngine::new(Some(bump_version()), DEFAULT_MAX_CONFLICT_RETRIES);
        let result = engine.execute(&executor, &mutation()).await.unwrap();

        assert_eq!(result.field("updateTodo").unwrap()["version"], json!(3));
        let sent = executor.executed();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].variables["expectedVersion"], json!(3));
    }

    #[tokio::test]
    async fn discard_surfaces_conflict() {
        let executor = MockExecutor::new();
        executor.push_response(conflict(2));
        let resolver: Arc<dyn ConflictResolver> = Arc::new(|_: &ConflictContext| None);

        let engine = ConflictEngine::new(Some(resolver), DEFAULT_MAX_CONFLICT_RETRIES);
        let err = engine.execute(&executor, &mutation()).await.unwrap_err();
        assert!(matches!(err, SyncError::Conflict { retries: 1, .. }));
    }

    #[tokio::test]
    async fn empty_variables_retry_without_variables() {
        let executor = MockExecutor::new();
        executor.push_response(conflict(2));
        executor.push_response(Ok(FetchResult::data(json!({"updateTodo": {"id": "1", "version": 3}}))));
        let resolver: Arc<dyn ConflictResolver> = Arc::new(|_: &ConflictContext| Some(Map::new()));

        let engine = ConflictEngine::new(Some(resolver), DEFAULT_MAX_CONFLICT_RETRIES);
        let result = engine.execute(&executor, &mutation()).await.unwrap();

        assert_eq!(result.field("updateTodo").unwrap()["version"], json!(3));
        let sent = executor.executed();
        assert_eq!(sent.len(), 2);
        assert!(sent[1].variables.is_empty());
    }

    #[tokio::test]
    async fn no_resolver_surfaces_conflict_without_retry() {
        let executor = MockExecutor::new();
        executor.push_response(conflict(2));
        let engine = ConflictEngine::new(None, DEFAULT_MAX_CONFLICT_RETRIES);

        let err = engine.execute(&executor, &mutation()).await.unwrap_err();
        assert!(matches!(err, SyncError::Conflict { retries: 0, .. }));
        assert_eq!(executor.executed().len(), 1);
    }

    #[tokio::test]
    async fn other_errors_bypass_resolver() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let resolver: Arc<dyn ConflictResolver> = Arc::new(move |ctx: &ConflictContext| {
            counter.fetch_add(1, Ordering::SeqCst);
            Some(ctx.variables.clone())
        });
        let executor = MockExecutor::new();
        executor.push_response(Ok(FetchResult::errors(vec![GraphQLError::new("invalid name")])));

        let engine = ConflictEngine::new(Some(resolver), DEFAULT_MAX_CONFLICT_RETRIES);
        let err = engine.execute(&executor, &mutation()).await.unwrap_err();
        assert!(matches!(err, SyncError::GraphQL(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    struct FailingResolver;

    #[async_trait]
    impl ConflictResolver for FailingResolver {
        async fn resolve(&self, _context: ConflictContext) -> SyncResult<ConflictResolution> {
            panic!("resolver bug");
        }
    }

    #[tokio::test]
    async fn panicking_resolver_counts_as_discard() {
        let executor = MockExecutor::new();
        executor.push_response(conflict(2));
        let engine = ConflictEngine::new(Some(Arc::new(FailingResolver)), 3);

        let err = engine.execute(&executor, &mutation()).await.unwrap_err();
        assert!(matches!(err, SyncError::Conflict { .. }));
    }

    proptest! {
        #[test]
        fn resolver_calls_are_bounded(max in 0u32..15) {
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let calls = Arc::new(AtomicU32::new(0));
            let counter = calls.clone();
            let resolver: Arc<dyn ConflictResolver> = Arc::new(move |ctx: &ConflictContext| {
                counter.fetch_add(1, Ordering::SeqCst);
                Some(ctx.variables.clone())
            });
            let executor = MockExecutor::with_handler(|_| conflict(7));
            let engine = ConflictEngine::new(Some(resolver), max);

            let err = runtime.block_on(engine.execute(&executor, &mutation())).unwrap_err();
            prop_assert_eq!(calls.load(Ordering::SeqCst), max);
            let is_conflict = matches!(err, SyncError::Conflict { .. });
            prop_assert!(is_conflict);
        }
    }
}
