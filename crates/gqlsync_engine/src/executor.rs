//! The GraphQL execution seam.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use gqlsync_protocol::{FetchResult, GraphQLOperation};
use parking_lot::Mutex;
use std::collections::VecDeque;

/// Executes queries and mutations over HTTP (or anything else).
///
/// Transport failures are returned as `Err`; GraphQL errors, conflicts
/// included, are returned inside the [`FetchResult`].
#[async_trait]
pub trait GraphQLExecutor: Send + Sync {
    /// Executes one operation.
    async fn execute(&self, operation: &GraphQLOperation) -> SyncResult<FetchResult>;
}

type Handler = Box<dyn Fn(&GraphQLOperation) -> SyncResult<FetchResult> + Send + Sync>;

/// An executor for testing.
///
/// Scripted responses are returned first, in order; after that the
/// handler (if any) answers.
#[derive(Default)]
pub struct MockExecutor {
    responses: Mutex<VecDeque<SyncResult<FetchResult>>>,
    handler: Option<Handler>,
    executed: Mutex<Vec<GraphQLOperation>>,
}

impl MockExecutor {
    /// Creates an executor with no responses.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an executor answering every operation with `handler`.
    pub fn with_handler<F>(handler: F) -> Self
    where
        F: Fn(&GraphQLOperation) -> SyncResult<FetchResult> + Send + Sync + 'static,
    {
        Self {
            handler: Some(Box::new(handler)),
            ..Self::default()
        }
    }

    /// Queues a response.
    pub fn push_response(&self, response: SyncResult<FetchResult>) {
        self.responses.lock().push_back(response);
    }

    /// Operations executed so far, in order.
    pub fn executed(&self) -> Vec<GraphQLOperation> {
        self.executed.lock().clone()
    }
}

#[async_trait]
impl GraphQLExecutor for MockExecutor {
    async fn execute(&self, operation: &GraphQLOperation) -> SyncResult<FetchResult> {
        self.executed.lock().push(operation.clone());
        let scripted = self.responses.lock().pop_front();
        match (scripted, &self.handler) {
            (Some(response), _) => response,
            (None, Some(handler)) => handler(operation),
            (None, None) => Err(SyncError::network("no mock response", None)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn scripted_then_handler() {
        let executor = MockExecutor::with_handler(|_| Ok(FetchResult::data(json!({"a": "handled"}))));
        executor.push_response(Ok(FetchResult::data(json!({"a": "scripted"}))));

        let op = GraphQLOperation::query("query { a }", "a");
        let first = executor.execute(&op).await.unwrap();
        let second = executor.execute(&op).await.unwrap();

        assert_eq!(first.field("a"), Some(&json!("scripted")));
        assert_eq!(second.field("a"), Some(&json!("handled")));
        assert_eq!(executor.executed().len(), 2);
    }

    #[tokio::test]
    async fn empty_mock_is_a_network_error() {
        let executor = MockExecutor::new();
        let err = executor
            .execute(&GraphQLOperation::query("query { a }", "a"))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }
}
