//! The normalized-store surface and an in-memory implementation.
//!
//! Any object carrying both `__typename` and `id` becomes a record keyed `Typename:id` and is
//! replaced by `{"__ref": key}` wherever it appears. Root fields of
//! queries live in the [`ROOT_QUERY`] record, keyed by field name plus
//! serialized variables.

use crate::error::{CacheError, CacheResult};
use gqlsync_protocol::GraphQLOperation;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use tracing::trace;

/// Record holding query root fields.
pub const ROOT_QUERY: &str = "ROOT_QUERY";
/// Field naming an object's type.
pub const TYPENAME_FIELD: &str = "__typename";

const REF_FIELD: &str = "__ref";

/// A full serialized copy of the normalized store.
pub type CacheSnapshot = Map<String, Value>;

/// A write against the store.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheWrite {
    /// Stores `data` as the result of `query`'s root field.
    Query {
        /// Query whose root field is written.
        query: GraphQLOperation,
        /// Value of the root field.
        data: Value,
    },
    /// Normalizes `data` into records without touching any root field.
    Entities {
        /// Any JSON tree.
        data: Value,
    },
    /// Removes one record.
    Evict {
        /// Record key.
        key: String,
    },
}

/// Emitted to watchers whenever the store's visible content changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheEvent {
    /// Monotonic store version.
    pub version: u64,
}

/// The keyed-store surface the sync layer relies on.
///
/// Implementations use interior mutability; all methods take `&self`.
pub trait NormalizedCache: Send + Sync {
    /// Reads the root field of `query`. Returns `None` on a miss or when any
    /// referenced record is missing.
    fn read(&self, query: &GraphQLOperation) -> Option<Value>;

    /// Applies a write.
    fn write(&self, write: CacheWrite) -> CacheResult<()>;

    /// Reads one record, unresolved.
    fn read_record(&self, key: &str) -> Option<Value>;

    /// Serializes the whole store.
    fn extract(&self) -> CacheSnapshot;

    /// Replaces the whole store.
    fn restore(&self, snapshot: CacheSnapshot);

    /// While suppressed, changes are not broadcast to watchers.
    fn set_broadcast_suppressed(&self, suppressed: bool);

    /// Notifies watchers of the current version.
    fn broadcast(&self);

    /// Subscribes to change broadcasts.
    fn watch(&self) -> Receiver<CacheEvent>;
}

/// Returns the record key for an object, if it is an entity.
pub fn entity_key(object: &Map<String, Value>) -> Option<String> {
    let typename = object.get(TYPENAME_FIELD)?.as_str()?;
    let id = match object.get("id")? {
        Value::String(id) => id.clone(),
        Value::Number(id) => id.to_string(),
        _ => return None,
    };
    Some(format!("{typename}:{id}"))
}

fn root_field_key(query: &GraphQLOperation) -> String {
    if query.variables.is_empty() {
        query.root_field.clone()
    } else {
        format!(
            "{}({})",
            query.root_field,
            Value::Object(query.variables.clone())
        )
    }
}

/// An in-memory normalized store.
///
/// # Example
///
/// ```rust
/// use gqlsync_cache::{CacheWrite, InMemoryCache, NormalizedCache};
/// use gqlsync_protocol::GraphQLOperation;
/// use serde_json::json;
///
/// let cache = InMemoryCache::new();
/// let query = GraphQLOperation::query("query { listTodos { id } }", "listTodos");
/// cache.write(CacheWrite::Query {
///     query: query.clone(),
///     data: json!([{"__typename": "Todo", "id": "1", "name": "X"}]),
/// }).unwrap();
///
/// assert!(cache.read_record("Todo:1").is_some());
/// assert_eq!(cache.read(&query).unwrap()[0]["name"], json!("X"));
/// ```
#[derive(Debug, Default)]
pub struct InMemoryCache {
    records: RwLock<CacheSnapshot>,
    suppressed: AtomicBool,
    version: AtomicU64,
    watchers: RwLock<Vec<Sender<CacheEvent>>>,
}

impl InMemoryCache {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store from a snapshot.
    #[must_use]
    pub fn from_snapshot(snapshot: CacheSnapshot) -> Self {
        let cache = Self::new();
        *cache.records.write() = snapshot;
        cache
    }

    /// Returns true if a record with this key exists.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.records.read().contains_key(key)
    }

    /// Returns the current version.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    fn changed(&self) {
        self.version.fetch_add(1, Ordering::SeqCst);
        if !self.suppressed.load(Ordering::SeqCst) {
            self.notify();
        }
    }

    fn notify(&self) {
        let event = CacheEvent {
            version: self.version(),
        };
        trace!(version = event.version, "broadcasting cache change");
        self.watchers
            .write()
            .retain(|watcher| watcher.send(event).is_ok());
    }

    fn normalize(value: &Value, records: &mut CacheSnapshot) -> Value {
        match value {
            Value::Object(object) => {
                let fields: Map<String, Value> = object
                    .iter()
                    .map(|(name, field)| (name.clone(), Self::normalize(field, records)))
                    .collect();

                match entity_key(object) {
                    Some(key) => {
                        let record = records
                            .entry(key.clone())
                            .or_insert_with(|| Value::Object(Map::new()));
                        if let Value::Object(existing) = record {
                            existing.extend(fields);
                        } else {
                            *record = Value::Object(fields);
                        }
                        let mut reference = Map::new();
                        reference.insert(REF_FIELD.to_string(), Value::String(key));
                        Value::Object(reference)
                    }
                    None => Value::Object(fields),
                }
            }
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| Self::normalize(item, records))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    fn resolve(value: &Value, records: &CacheSnapshot, visiting: &mut Vec<String>) -> Option<Value> {
        match value {
            Value::Object(object) => {
                if let Some(key) = object.get(REF_FIELD).and_then(Value::as_str) {
                    if visiting.iter().any(|k| k == key) {
                        return Some(value.clone());
                    }
                    let record = records.get(key)?;
                    visiting.push(key.to_string());
                    let resolved = Self::resolve(record, records, visiting);
                    visiting.pop();
                    return resolved;
                }
                let mut out = Map::new();
                for (name, field) in object {
                    out.insert(name.clone(), Self::resolve(field, records, visiting)?);
                }
                Some(Value::Object(out))
            }
            Value::Array(items) => items
                .iter()
                .map(|item| Self::resolve(item, records, visiting))
                .collect::<Option<Vec<_>>>()
                .map(Value::Array),
            other => Some(other.clone()),
        }
    }
}

impl NormalizedCache for InMemoryCache {
    fn read(&self, query: &GraphQLOperation) -> Option<Value> {
        let records = self.records.read();
        let root = records.get(ROOT_QUERY)?.get(root_field_key(query))?;
        Self::resolve(root, &records, &mut Vec::new())
    }

    fn write(&self, write: CacheWrite) -> CacheResult<()> {
        {
            let mut records = self.records.write();
            match write {
                CacheWrite::Query { query, data } => {
                    let normalized = Self::normalize(&data, &mut records);
                    let root = records
                        .entry(ROOT_QUERY.to_string())
                        .or_insert_with(|| Value::Object(Map::new()));
                    let Value::Object(root) = root else {
                        return Err(CacheError::InvalidWrite(format!(
                            "{ROOT_QUERY} record is not an object"
                        )));
                    };
                    root.insert(root_field_key(&query), normalized);
                }
                CacheWrite::Entities { data } => {
                    Self::normalize(&data, &mut records);
                }
                CacheWrite::Evict { key } => {
                    records.remove(&key);
                }
            }
        }
        self.changed();
        Ok(())
    }

    fn read_record(&self, key: &str) -> Option<Value> {
        self.records.read().get(key).cloned()
    }

    fn extract(&self) -> CacheSnapshot {
        self.records.read().clone()
    }

    fn restore(&self, snapshot: CacheSnapshot) {
        *self.records.write() = snapshot;
        self.changed();
    }

    fn set_broadcast_suppressed(&self, suppressed: bool) {
        self.suppressed.store(suppressed, Ordering::SeqCst);
    }

    fn broadcast(&self) {
        self.notify();
    }

    fn watch(&self) -> Receiver<CacheEvent> {
        let (tx, rx) = mpsc::channel();
        self.watchers.write().push(tx);
        rx
    }
}
