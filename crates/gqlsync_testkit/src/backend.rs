//! An in-memory GraphQL backend for the Todo model.
//!
//! [`FakeBackend`] implements [`GraphQLExecutor`] with server-side
//! versioning: every record carries a `version`, updates must name the next
//! version in `expectedVersion`, and a stale update is rejected with a
//! conflict error whose data is the current record. Deletes keep a
//! tombstone so delta queries can report them.

use async_trait::async_trait;
use chrono::Utc;
use gqlsync_engine::{GraphQLExecutor, SyncError, SyncResult, LAST_SYNC_VARIABLE};
use gqlsync_protocol::{
    FetchResult, GraphQLError, GraphQLOperation, Value, CONFLICT_ERROR_TYPE, DELETED_MARKER,
};
use parking_lot::Mutex;
use serde_json::{json, Map};
use std::collections::{BTreeMap, VecDeque};

/// Typename of every record the backend serves.
pub const TODO_TYPENAME: &str = "Todo";

/// Field holding the server-side change time, in seconds.
pub const LAST_CHANGED_FIELD: &str = "_lastChangedAt";

#[derive(Debug, Default)]
struct BackendState {
    todos: BTreeMap<String, Map<String, Value>>,
    next_id: u64,
}

impl BackendState {
    fn allocate_id(&mut self) -> String {
        self.next_id += 1;
        format!("server-{}", self.next_id)
    }
}

/// A versioned Todo store answering GraphQL operations by root field.
///
/// | Root field              | Behavior                                      |
/// |-------------------------|-----------------------------------------------|
/// | `createTodo`, `addTodo` | assigns `server-N`, version 1                 |
/// | `updateTodo`            | requires `expectedVersion == version + 1`     |
/// | `deleteTodo`            | tombstones the record                         |
/// | `getTodo`               | returns one live record or null               |
/// | `listTodos`             | returns `{items}` of live records             |
/// | `syncTodos`             | returns `{items}` changed since `lastSync`    |
///
/// Inputs are read from an `input` variable when present, otherwise from
/// the variables themselves.
#[derive(Debug, Default)]
pub struct FakeBackend {
    state: Mutex<BackendState>,
    faults: Mutex<VecDeque<SyncError>>,
    requests: Mutex<Vec<GraphQLOperation>>,
}

impl FakeBackend {
    /// Creates an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a record as if another client had written it.
    ///
    /// Returns the stored record.
    pub fn seed(&self, id: &str, fields: Value, version: u64) -> Value {
        let mut record = fields.as_object().cloned().unwrap_or_default();
        record.insert("__typename".into(), json!(TODO_TYPENAME));
        record.insert("id".into(), json!(id));
        record.insert("version".into(), json!(version));
        record.insert(LAST_CHANGED_FIELD.into(), json!(now_secs()));
        self.state.lock().todos.insert(id.to_string(), record.clone());
        Value::Object(record)
    }

    /// Returns the stored record, tombstones included.
    pub fn record(&self, id: &str) -> Option<Value> {
        self.state.lock().todos.get(id).cloned().map(Value::Object)
    }

    /// Number of live records.
    pub fn live_count(&self) -> usize {
        self.state
            .lock()
            .todos
            .values()
            .filter(|record| !is_deleted(record))
            .count()
    }

    /// Makes the next request fail with `error` before reaching the store.
    pub fn fail_next(&self, error: SyncError) {
        self.faults.lock().push_back(error);
    }

    /// Every request received so far, failed ones included.
    pub fn requests(&self) -> Vec<GraphQLOperation> {
        self.requests.lock().clone()
    }

    /// Requests for one root field.
    pub fn requests_for(&self, root_field: &str) -> Vec<GraphQLOperation> {
        self.requests
            .lock()
            .iter()
            .filter(|op| op.root_field == root_field)
            .cloned()
            .collect()
    }

    fn handle(&self, operation: &GraphQLOperation) -> FetchResult {
        let input = input_of(operation);
        let field = operation.root_field.as_str();
        let outcome = match field {
            "createTodo" | "addTodo" => Ok(self.create(input)),
            "updateTodo" => self.update(input),
            "deleteTodo" => self.delete(&input),
            "getTodo" => Ok(self.get(&input)),
            "listTodos" => Ok(self.list()),
            "syncTodos" => Ok(self.changes_since(&operation.variables)),
            other => Err(GraphQLError::new(format!("unknown field {other}"))),
        };

        match outcome {
            Ok(value) => {
                let mut data = Map::new();
                data.insert(field.to_string(), value);
                FetchResult::data(Value::Object(data))
            }
            Err(error) => {
                let mut error = error;
                error.path = vec![json!(field)];
                FetchResult::errors(vec![error])
            }
        }
    }

    fn create(&self, input: Map<String, Value>) -> Value {
        let mut state = self.state.lock();
        let id = state.allocate_id();
        let mut record = input;
        record.insert("__typename".into(), json!(TODO_TYPENAME));
        record.insert("id".into(), json!(id));
        record.insert("version".into(), json!(1));
        record.insert(LAST_CHANGED_FIELD.into(), json!(now_secs()));
        state.todos.insert(id, record.clone());
        Value::Object(record)
    }

    fn update(&self, input: Map<String, Value>) -> Result<Value, GraphQLError> {
        let id = id_of(&input)?;
        let mut state = self.state.lock();
        let record = state
            .todos
            .get_mut(&id)
            .filter(|record| !is_deleted(record))
            .ok_or_else(|| GraphQLError::new(format!("Todo {id} not found")))?;

        let current = version_of(record);
        let expected = input.get("expectedVersion").and_then(Value::as_u64);
        if expected != Some(current + 1) {
            return Err(GraphQLError::new("The conditional request failed")
                .with_type(CONFLICT_ERROR_TYPE)
                .with_data(Value::Object(record.clone())));
        }

        for (key, value) in input {
            if key != "expectedVersion" && key != "id" {
                record.insert(key, value);
            }
        }
        record.insert("version".into(), json!(current + 1));
        record.insert(LAST_CHANGED_FIELD.into(), json!(now_secs()));
        Ok(Value::Object(record.clone()))
    }

    fn delete(&self, input: &Map<String, Value>) -> Result<Value, GraphQLError> {
        let id = id_of(input)?;
        let mut state = self.state.lock();
        let record = state
            .todos
            .get_mut(&id)
            .filter(|record| !is_deleted(record))
            .ok_or_else(|| GraphQLError::new(format!("Todo {id} not found")))?;
        let version = version_of(record);
        record.insert(DELETED_MARKER.into(), json!(true));
        record.insert("version".into(), json!(version + 1));
        record.insert(LAST_CHANGED_FIELD.into(), json!(now_secs()));
        Ok(Value::Object(record.clone()))
    }

    fn get(&self, input: &Map<String, Value>) -> Value {
        let Ok(id) = id_of(input) else {
            return Value::Null;
        };
        self.state
            .lock()
            .todos
            .get(&id)
            .filter(|record| !is_deleted(record))
            .cloned()
            .map(Value::Object)
            .unwrap_or(Value::Null)
    }

    fn list(&self) -> Value {
        let items: Vec<Value> = self
            .state
            .lock()
            .todos
            .values()
            .filter(|record| !is_deleted(record))
            .cloned()
            .map(Value::Object)
            .collect();
        json!({ "items": items })
    }

    fn changes_since(&self, variables: &Map<String, Value>) -> Value {
        let since = variables
            .get(LAST_SYNC_VARIABLE)
            .and_then(Value::as_i64)
            .unwrap_or(0);
        let items: Vec<Value> = self
            .state
            .lock()
            .todos
            .values()
            .filter(|record| {
                record
                    .get(LAST_CHANGED_FIELD)
                    .and_then(Value::as_i64)
                    .is_some_and(|changed| changed >= since)
            })
            .cloned()
            .map(Value::Object)
            .collect();
        json!({ "items": items })
    }
}

#[async_trait]
impl GraphQLExecutor for FakeBackend {
    async fn execute(&self, operation: &GraphQLOperation) -> SyncResult<FetchResult> {
        self.requests.lock().push(operation.clone());
        if let Some(error) = self.faults.lock().pop_front() {
            tracing::debug!(field = %operation.root_field, %error, "injected backend fault");
            return Err(error);
        }
        Ok(self.handle(operation))
    }
}

fn input_of(operation: &GraphQLOperation) -> Map<String, Value> {
    match operation.variables.get("input") {
        Some(Value::Object(input)) => input.clone(),
        _ => operation.variables.clone(),
    }
}

fn id_of(input: &Map<String, Value>) -> Result<String, GraphQLError> {
    input
        .get("id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| GraphQLError::new("missing id"))
}

fn version_of(record: &Map<String, Value>) -> u64 {
    record.get("version").and_then(Value::as_u64).unwrap_or(0)
}

fn is_deleted(record: &Map<String, Value>) -> bool {
    record
        .get(DELETED_MARKER)
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

fn now_secs() -> i64 {
    Utc::now().timestamp()
}
