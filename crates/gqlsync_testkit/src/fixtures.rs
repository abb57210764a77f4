//! Client fixtures and Todo operation builders.
//!
//! Every fixture uses a fresh key prefix, since a prefix can only be
//! registered once per process.

use crate::backend::{FakeBackend, TODO_TYPENAME};
use crate::realtime::RealtimeServer;
use gqlsync_cache::{FileBackend, StorageBackend};
use gqlsync_engine::{ClientConfig, MutationOptions, SyncClient, SyncOptions};
use gqlsync_protocol::{GraphQLOperation, Value};
use gqlsync_realtime::AuthMode;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

/// A standard endpoint.
pub const ENDPOINT: &str = "https://abcdefghijklmnopqrstuvwxyz.appsync-api.us-east-1.amazonaws.com/graphql";

/// A custom-domain endpoint.
pub const CUSTOM_ENDPOINT: &str = "https://api.example.com/graphql";

/// Region used by the fixtures.
pub const REGION: &str = "us-east-1";

/// API key used by the fixtures.
pub const API_KEY: &str = "da2-testkey";

/// Returns a key prefix no other fixture uses.
pub fn unique_prefix() -> String {
    format!("test-{}:", uuid::Uuid::new_v4())
}

/// A client configuration against [`ENDPOINT`] with API key auth.
pub fn test_config() -> ClientConfig {
    ClientConfig::new(ENDPOINT)
        .with_region(REGION)
        .with_auth(AuthMode::api_key(API_KEY))
        .with_key_prefix(unique_prefix())
}

/// A client wired to a [`FakeBackend`] and a [`RealtimeServer`].
pub struct TestClient {
    /// The client under test.
    pub client: SyncClient,
    /// The GraphQL backend.
    pub backend: Arc<FakeBackend>,
    /// The realtime server.
    pub server: RealtimeServer,
    _temp_dir: Option<TempDir>,
}

impl TestClient {
    /// Creates a client with in-memory storage.
    pub fn memory() -> Self {
        Self::with_config(test_config())
    }

    /// Creates a client persisting to a temporary directory.
    pub fn file() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let storage = open_storage(temp_dir.path());
        let mut kit = Self::with_config(test_config().with_storage(storage));
        kit._temp_dir = Some(temp_dir);
        kit
    }

    /// Creates a client from `config` with a fresh backend and server.
    pub fn with_config(config: ClientConfig) -> Self {
        Self::with_backend(config, Arc::new(FakeBackend::new()))
    }

    /// Creates a client from `config` talking to `backend`.
    pub fn with_backend(config: ClientConfig, backend: Arc<FakeBackend>) -> Self {
        let server = RealtimeServer::new();
        let client = SyncClient::new(config, backend.clone(), server.connector())
            .expect("Failed to create client");
        Self {
            client,
            backend,
            server,
            _temp_dir: None,
        }
    }

    /// Returns the storage directory if file-based.
    pub fn path(&self) -> Option<&Path> {
        self._temp_dir.as_ref().map(TempDir::path)
    }
}

impl std::ops::Deref for TestClient {
    type Target = SyncClient;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

/// Opens file storage in `dir`.
pub fn open_storage(dir: &Path) -> Arc<dyn StorageBackend> {
    Arc::new(FileBackend::open(dir).expect("Failed to open file storage"))
}

/// A Todo record as the client would render it optimistically.
pub fn todo(id: &str, fields: Value) -> Value {
    let mut record = fields.as_object().cloned().unwrap_or_default();
    record.insert("__typename".into(), json!(TODO_TYPENAME));
    record.insert("id".into(), json!(id));
    Value::Object(record)
}

/// `addTodo(input: {name})` with an optimistic record under `local_id`.
pub fn add_todo(local_id: &str, name: &str) -> MutationOptions {
    let operation = GraphQLOperation::mutation(
        "mutation AddTodo($input: CreateTodoInput!) { addTodo(input: $input) { id name version } }",
        "addTodo",
    )
    .with_name("AddTodo")
    .with_variable("input", json!({ "name": name }));
    MutationOptions::new(operation)
        .with_optimistic_response(json!({ "addTodo": todo(local_id, json!({ "name": name })) }))
}

/// `updateTodo(input: {id, expectedVersion, ..fields})` with an optimistic
/// record.
pub fn update_todo(id: &str, expected_version: u64, fields: Value) -> MutationOptions {
    let mut input = fields.as_object().cloned().unwrap_or_default();
    input.insert("id".into(), json!(id));
    input.insert("expectedVersion".into(), json!(expected_version));
    let operation = GraphQLOperation::mutation(
        "mutation UpdateTodo($input: UpdateTodoInput!) { updateTodo(input: $input) { id name done version } }",
        "updateTodo",
    )
    .with_name("UpdateTodo")
    .with_variable("input", Value::Object(input));
    MutationOptions::new(operation)
        .with_optimistic_response(json!({ "updateTodo": todo(id, fields) }))
}

/// `deleteTodo(id)` with an optimistic tombstone.
pub fn delete_todo(id: &str) -> MutationOptions {
    let operation = GraphQLOperation::mutation(
        "mutation DeleteTodo($id: ID!) { deleteTodo(id: $id) { id _deleted } }",
        "deleteTodo",
    )
    .with_name("DeleteTodo")
    .with_variable("id", json!(id));
    MutationOptions::new(operation).with_optimistic_response(json!({
        "deleteTodo": todo(id, json!({ "_deleted": true }))
    }))
}

/// The base query of the Todo list.
pub fn list_todos() -> GraphQLOperation {
    GraphQLOperation::query(
        "query ListTodos { listTodos { items { id name version } } }",
        "listTodos",
    )
    .with_name("ListTodos")
}

/// The delta query of the Todo list.
pub fn sync_todos() -> GraphQLOperation {
    GraphQLOperation::query(
        "query SyncTodos($lastSync: AWSTimestamp) { syncTodos(lastSync: $lastSync) { items { id name version _deleted } } }",
        "syncTodos",
    )
    .with_name("SyncTodos")
}

/// The creation subscription.
pub fn on_create_todo() -> GraphQLOperation {
    GraphQLOperation::subscription(
        "subscription OnCreateTodo { onCreateTodo { id name version } }",
        "onCreateTodo",
    )
    .with_name("OnCreateTodo")
}

/// A delta sync of the Todo list: base, subscription, and delta query.
pub fn todo_sync_options() -> SyncOptions {
    SyncOptions::new(list_todos())
        .with_subscription(on_create_todo())
        .with_delta_query(sync_todos())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixes_are_unique() {
        assert_ne!(unique_prefix(), unique_prefix());
    }

    #[test]
    fn add_todo_carries_optimistic_record() {
        let options = add_todo("local-1", "X");
        assert_eq!(options.operation.root_field, "addTodo");
        assert_eq!(
            options.optimistic_response.unwrap()["addTodo"]["id"],
            json!("local-1")
        );
    }

    #[test]
    fn file_client_owns_its_directory() {
        let kit = TestClient::file();
        assert!(kit.path().unwrap().is_dir());
    }
}
