//! Offline metadata persisted next to the cache.

use crate::store::CacheSnapshot;
use gqlsync_protocol::{GraphQLOperation, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Everything the client persists besides the cache itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OfflineMetadata {
    /// Client-generated id to server id, for ids seen during the current
    /// outbox drain.
    pub ids_map: BTreeMap<String, String>,
    /// Last confirmed server state plus pending mutations.
    pub snapshot: SnapshotState,
    /// Delta-sync bookkeeping.
    pub delta_sync: DeltaSyncState,
}

/// The last server-confirmed cache and the mutations queued on top of it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SnapshotState {
    /// Cache contents before any pending optimistic write.
    pub cache: CacheSnapshot,
    /// Pending mutations in enqueue order.
    pub enqueued_mutations: Vec<PersistedMutation>,
}

/// A queued mutation in its persisted form.
///
/// Update functions are code and do not survive a restart; a restored
/// mutation replays its optimistic response only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedMutation {
    /// Outbox entry id.
    pub id: String,
    /// The mutation.
    pub operation: GraphQLOperation,
    /// Optimistic response, if one was supplied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optimistic_response: Option<Value>,
}

/// Delta-sync metadata for every sync configuration, keyed by hash.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeltaSyncState {
    /// Per-configuration timestamps.
    pub metadata: BTreeMap<String, DeltaSyncMetadata>,
    /// Syncs suspended by going offline, resumed on the next start.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub suspended: BTreeMap<String, SuspendedSync>,
}

/// A delta sync configuration in its persisted form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuspendedSync {
    /// Full query.
    pub base_query: GraphQLOperation,
    /// Live changes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription: Option<GraphQLOperation>,
    /// Changes since the last sync.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta_query: Option<GraphQLOperation>,
    /// Field identifying list items.
    pub id_field: String,
    /// Base refresh interval in milliseconds, if overridden.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_refresh_interval_ms: Option<u64>,
}

/// When a sync configuration last ran.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeltaSyncMetadata {
    /// When the base query last ran.
    #[serde(
        default,
        skip_serializing_if = "BaseSyncMark::is_never",
        with = "base_mark"
    )]
    pub base_last_sync_timestamp: BaseSyncMark,
    /// Last successful sync of any kind, in milliseconds since the epoch.
    #[serde(default)]
    pub last_sync_timestamp: Option<i64>,
}

/// Base-query bookkeeping.
///
/// `Never` (field absent) and `Reset` (field null) both force a base query,
/// but are kept apart so a restored state reports which one it saw.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BaseSyncMark {
    /// The base query has never run.
    #[default]
    Never,
    /// The mark was explicitly cleared.
    Reset,
    /// The base query ran at this time, in milliseconds since the epoch.
    At(i64),
}

impl BaseSyncMark {
    /// Returns true for `Never`.
    pub fn is_never(&self) -> bool {
        matches!(self, Self::Never)
    }

    /// Returns the timestamp, if any.
    pub fn timestamp(&self) -> Option<i64> {
        match self {
            Self::At(ts) => Some(*ts),
            Self::Never | Self::Reset => None,
        }
    }
}

mod base_mark {
    use super::BaseSyncMark;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(mark: &BaseSyncMark, serializer: S) -> Result<S::Ok, S::Error> {
        match mark.timestamp() {
            Some(ts) => serializer.serialize_i64(ts),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BaseSyncMark, D::Error> {
        Ok(match Option::<i64>::deserialize(deserializer)? {
            Some(ts) => BaseSyncMark::At(ts),
            None => BaseSyncMark::Reset,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn base_mark_distinguishes_missing_and_null() {
        let never: DeltaSyncMetadata = serde_json::from_value(json!({})).unwrap();
        let reset: DeltaSyncMetadata =
            serde_json::from_value(json!({"baseLastSyncTimestamp": null})).unwrap();
        let at: DeltaSyncMetadata =
            serde_json::from_value(json!({"baseLastSyncTimestamp": 5, "lastSyncTimestamp": 6}))
                .unwrap();

        assert_eq!(never.base_last_sync_timestamp, BaseSyncMark::Never);
        assert_eq!(reset.base_last_sync_timestamp, BaseSyncMark::Reset);
        assert_eq!(at.base_last_sync_timestamp, BaseSyncMark::At(5));
        assert_eq!(at.last_sync_timestamp, Some(6));
    }

    #[test]
    fn base_mark_serializes_back_to_its_sentinel() {
        let never = serde_json::to_value(DeltaSyncMetadata::default()).unwrap();
        assert!(never.get("baseLastSyncTimestamp").is_none());

        let reset = serde_json::to_value(DeltaSyncMetadata {
            base_last_sync_timestamp: BaseSyncMark::Reset,
            last_sync_timestamp: None,
        })
        .unwrap();
        assert_eq!(reset["baseLastSyncTimestamp"], Value::Null);
    }

    #[test]
    fn metadata_uses_camel_case_layout() {
        let mut metadata = OfflineMetadata::default();
        metadata.ids_map.insert("local-1".into(), "server-1".into());
        metadata.snapshot.enqueued_mutations.push(PersistedMutation {
            id: "m1".into(),
            operation: GraphQLOperation::mutation("mutation { a }", "a"),
            optimistic_response: None,
        });

        let value = serde_json::to_value(&metadata).unwrap();
        assert_eq!(value["idsMap"]["local-1"], json!("server-1"));
        assert_eq!(value["snapshot"]["enqueuedMutations"][0]["id"], json!("m1"));
        assert!(value["deltaSync"]["metadata"].is_object());

        let back: OfflineMetadata = serde_json::from_value(value).unwrap();
        assert_eq!(back, metadata);
    }

    #[test]
    fn suspended_syncs_are_omitted_when_empty() {
        let mut metadata = OfflineMetadata::default();
        let value = serde_json::to_value(&metadata).unwrap();
        assert!(value["deltaSync"].get("suspended").is_none());

        metadata.delta_sync.suspended.insert(
            "k".into(),
            SuspendedSync {
                base_query: GraphQLOperation::query("query { listTodos }", "listTodos"),
                subscription: None,
                delta_query: None,
                id_field: "id".into(),
                base_refresh_interval_ms: Some(1_000),
            },
        );
        let value = serde_json::to_value(&metadata).unwrap();
        assert_eq!(value["deltaSync"]["suspended"]["k"]["idField"], json!("id"));
        assert_eq!(value["deltaSync"]["suspended"]["k"]["baseRefreshIntervalMs"], json!(1_000));

        let back: OfflineMetadata = serde_json::from_value(value).unwrap();
        assert_eq!(back, metadata);
    }

    #[test]
    fn empty_object_is_default_metadata() {
        let metadata: OfflineMetadata = serde_json::from_str("{}").unwrap();
        assert_eq!(metadata, OfflineMetadata::default());
    }
}
