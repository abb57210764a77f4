//! Local-to-server id mapping.

use gqlsync_protocol::{collect, rewrite, PathSegment, Value};
use serde_json::Map;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

const ID_FIELD: &str = "id";

fn value_at<'a>(value: &'a Value, path: &[PathSegment]) -> Option<&'a Value> {
    path.iter().try_fold(value, |node, segment| match segment {
        PathSegment::Key(key) => node.get(key.as_str()),
        PathSegment::Index(idx) => node.get(*idx),
    })
}

/// Maps client-generated ids to the ids the server assigned.
///
/// Entries are learned by comparing an optimistic response with the server
/// response at the same `id` positions. The map lives until the outbox
/// drains.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityMap {
    forward: BTreeMap<String, String>,
    reverse: HashMap<String, String>,
}

impl IdentityMap {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a map from its persisted form.
    pub fn from_persisted(ids: BTreeMap<String, String>) -> Self {
        let reverse = ids
            .iter()
            .map(|(local, server)| (server.clone(), local.clone()))
            .collect();
        Self {
            forward: ids,
            reverse,
        }
    }

    /// The persisted form.
    pub fn to_persisted(&self) -> BTreeMap<String, String> {
        self.forward.clone()
    }

    /// Number of known mappings.
    pub fn len(&self) -> usize {
        self.forward.len()
    }

    /// Returns true if no mapping is known.
    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    /// Server id for a local id.
    pub fn server_id(&self, local: &str) -> Option<&str> {
        self.forward.get(local).map(String::as_str)
    }

    /// Local id a server id replaced.
    pub fn local_id(&self, server: &str) -> Option<&str> {
        self.reverse.get(server).map(String::as_str)
    }

    /// Records a single mapping.
    pub fn insert(&mut self, local: impl Into<String>, server: impl Into<String>) {
        let (local, server) = (local.into(), server.into());
        if local == server {
            return;
        }
        debug!(local = %local, server = %server, "id remapped");
        self.reverse.insert(server.clone(), local.clone());
        self.forward.insert(local, server);
    }

    /// Learns mappings from every `id` in `optimistic` whose counterpart in
    /// `server` differs. Returns how many were recorded.
    pub fn record(&mut self, optimistic: &Value, server: &Value) -> usize {
        let ids = collect(optimistic, |path, node| {
            node.is_string() && matches!(path.last(), Some(PathSegment::Key(key)) if key == ID_FIELD)
        });

        let mut recorded = 0;
        for (path, local) in ids {
            let (Some(local), Some(server)) = (
                local.as_str(),
                value_at(server, &path).and_then(Value::as_str),
            ) else {
                continue;
            };
            if local != server && self.server_id(local) != Some(server) {
                self.insert(local, server);
                recorded += 1;
            }
        }
        recorded
    }

    /// Replaces every known local id in `value`. Returns the number of
    /// replaced strings.
    pub fn remap(&self, value: &mut Value) -> usize {
        if self.forward.is_empty() {
            return 0;
        }
        rewrite(
            value,
            |_, node| node.as_str().is_some_and(|s| self.forward.contains_key(s)),
            |_, node| {
                if let Some(server) = node.as_str().and_then(|s| self.forward.get(s)) {
                    *node = Value::String(server.clone());
                }
            },
        )
    }

    /// [`remap`](Self::remap) for a variable map.
    pub fn remap_variables(&self, variables: &mut Map<String, Value>) -> usize {
        let mut value = Value::Object(std::mem::take(variables));
        let count = self.remap(&mut value);
        if let Value::Object(map) = value {
            *variables = map;
        }
        count
    }

    /// Forgets every mapping.
    pub fn clear(&mut self) {
        self.forward.clear();
        self.reverse.clear();
    }
}
