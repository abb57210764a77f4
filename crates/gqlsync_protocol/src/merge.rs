//! Delta-sync list merging.
//!
//! Items arriving from delta queries and subscriptions are merged into a
//! base list by an id field. What to do with an item is inferred from the
//! name of the mutation (or subscription field) that produced it.

use serde_json::Value;

/// Field that marks an item as deleted when the kind is [`OperationKind::Auto`].
pub const DELETED_MARKER: &str = "_deleted";

/// How an incoming item changes the list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    /// Insert, or replace if already present.
    Add,
    /// Remove if present.
    Remove,
    /// Replace if present, insert otherwise.
    Update,
    /// Remove if the item carries a delete marker, upsert otherwise.
    Auto,
}

const ADD_PREFIXES: &[&str] = &["create", "add", "put", "new", "insert"];
const REMOVE_PREFIXES: &[&str] = &["delete", "remove", "discard", "erase"];
const UPDATE_PREFIXES: &[&str] = &["update", "upsert", "edit", "modify"];

/// Infers the operation kind from a mutation or subscription field name.
///
/// A leading `on` followed by an upper-case letter (subscription naming,
/// e.g. `onCreateTodo`) is ignored. Matching is by case-insensitive prefix.
pub fn infer_operation_kind(field_name: &str) -> OperationKind {
    let name = match field_name.strip_prefix("on") {
        Some(rest) if rest.starts_with(|c: char| c.is_ascii_uppercase()) => rest,
        _ => field_name,
    };
    let name = name.to_ascii_lowercase();
    let starts = |prefixes: &[&str]| prefixes.iter().any(|p| name.starts_with(p));

    if starts(ADD_PREFIXES) {
        OperationKind::Add
    } else if starts(REMOVE_PREFIXES) {
        OperationKind::Remove
    } else if starts(UPDATE_PREFIXES) {
        OperationKind::Update
    } else {
        OperationKind::Auto
    }
}

/// Merges `item` into `list` by `id_field`.
///
/// Returns true if the list changed. Items without an id are ignored.
pub fn merge_item(list: &mut Vec<Value>, item: &Value, id_field: &str, kind: OperationKind) -> bool {
    let Some(id) = item.get(id_field).filter(|id| !id.is_null()) else {
        return false;
    };
    let position = list.iter().position(|existing| existing.get(id_field) == Some(id));

    let kind = match kind {
        OperationKind::Auto => {
            if item.get(DELETED_MARKER).and_then(Value::as_bool) == Some(true) {
                OperationKind::Remove
            } else {
                OperationKind::Update
            }
        }
        other => other,
    };

    match (kind, position) {
        (OperationKind::Remove, Some(idx)) => {
            list.remove(idx);
            true
        }
        (OperationKind::Remove, None) => false,
        (_, Some(idx)) => {
            if list[idx] == *item {
                return false;
            }
            list[idx] = item.clone();
            true
        }
        (_, None) => {
            list.push(item.clone());
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;
    use std::collections::BTreeSet;

    #[test]
    fn infers_kinds_from_prefixes() {
        assert_eq!(infer_operation_kind("createTodo"), OperationKind::Add);
        assert_eq!(infer_operation_kind("addItem"), OperationKind::Add);
        assert_eq!(infer_operation_kind("insertRow"), OperationKind::Add);
        assert_eq!(infer_operation_kind("deleteTodo"), OperationKind::Remove);
        assert_eq!(infer_operation_kind("eraseAll"), OperationKind::Remove);
        assert_eq!(infer_operation_kind("upsertTodo"), OperationKind::Update);
        assert_eq!(infer_operation_kind("modifyTodo"), OperationKind::Update);
        assert_eq!(infer_operation_kind("syncTodos"), OperationKind::Auto);
    }

    #[test]
    fn subscription_prefix_is_stripped() {
        assert_eq!(infer_operation_kind("onCreateTodo"), OperationKind::Add);
        assert_eq!(infer_operation_kind("onDeleteTodo"), OperationKind::Remove);
        // "one..." is not a subscription prefix
        assert_eq!(infer_operation_kind("oneOff"), OperationKind::Auto);
    }

    #[test]
    fn add_update_remove() {
        let mut list = vec![json!({"id": "1", "name": "a"})];

        assert!(merge_item(&mut list, &json!({"id": "2", "name": "b"}), "id", OperationKind::Add));
        assert_eq!(list.len(), 2);

        assert!(merge_item(&mut list, &json!({"id": "1", "name": "A"}), "id", OperationKind::Update));
        assert_eq!(list[0]["name"], json!("A"));

        assert!(merge_item(&mut list, &json!({"id": "1"}), "id", OperationKind::Remove));
        assert_eq!(list, vec![json!({"id": "2", "name": "b"})]);

        assert!(!merge_item(&mut list, &json!({"id": "9"}), "id", OperationKind::Remove));
    }

    #[test]
    fn auto_honours_delete_marker() {
        let mut list = vec![json!({"id": "1"})];
        assert!(merge_item(&mut list, &json!({"id": "1", "_deleted": true}), "id", OperationKind::Auto));
        assert!(list.is_empty());

        assert!(merge_item(&mut list, &json!({"id": "3"}), "id", OperationKind::Auto));
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn custom_id_field_and_missing_ids() {
        let mut list = vec![json!({"key": 1, "v": 0})];
        assert!(merge_item(&mut list, &json!({"key": 1, "v": 1}), "key", OperationKind::Add));
        assert_eq!(list.len(), 1);
        assert!(!merge_item(&mut list, &json!({"v": 2}), "key", OperationKind::Add));
    }

    #[test]
    fn identical_item_is_no_change() {
        let mut list = vec![json!({"id": "1"})];
        assert!(!merge_item(&mut list, &json!({"id": "1"}), "id", OperationKind::Update));
    }

    proptest! {
        #[test]
        fn merged_list_matches_set_model(ops in proptest::collection::vec((any::<bool>(), 0u8..8), 0..40)) {
            let mut list = Vec::new();
            let mut model = BTreeSet::new();
            for (remove, id) in ops {
                let item = json!({"id": id, "_deleted": remove});
                let changed = merge_item(&mut list, &item, "id", OperationKind::Auto);
                let model_changed = if remove { model.remove(&id) } else { model.insert(id) };
                prop_assert_eq!(changed, model_changed);
            }

            let mut ids: Vec<u8> = list.iter().filter_map(|item| item["id"].as_u64()).map(|id| id as u8).collect();
            ids.sort_unstable();
            prop_assert_eq!(ids, model.into_iter().collect::<Vec<_>>());
        }
    }
}
