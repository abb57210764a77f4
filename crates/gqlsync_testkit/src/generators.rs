//! Property-based test generators using proptest.

use proptest::prelude::*;
use serde_json::{json, Value};

/// Generates Todo names.
pub fn todo_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Za-z][A-Za-z0-9 ]{0,23}").expect("valid regex")
}

/// Generates optimistic ids of the `local-N` form.
pub fn local_id_strategy() -> impl Strategy<Value = String> {
    (1u32..1_000_000).prop_map(|n| format!("local-{n}"))
}

/// Generates the user-editable fields of a Todo.
pub fn todo_fields_strategy() -> impl Strategy<Value = Value> {
    (todo_name_strategy(), any::<bool>()).prop_map(|(name, done)| json!({ "name": name, "done": done }))
}

/// Generates a batch of Todo names to create offline, paired with distinct
/// optimistic ids.
pub fn offline_batch_strategy(max_len: usize) -> impl Strategy<Value = Vec<(String, String)>> {
    prop::collection::vec(todo_name_strategy(), 1..=max_len).prop_map(|names| {
        names
            .into_iter()
            .enumerate()
            .map(|(i, name)| (format!("local-{}", i + 1), name))
            .collect()
    })
}

/// Generates server-side versions a conflicting record may carry.
pub fn version_strategy() -> impl Strategy<Value = u64> {
    1u64..1_000
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    proptest! {
        #[test]
        fn names_are_non_empty(name in todo_name_strategy()) {
            prop_assert!(!name.is_empty());
        }

        #[test]
        fn batch_ids_are_distinct(batch in offline_batch_strategy(8)) {
            let ids: HashSet<_> = batch.iter().map(|(id, _)| id.clone()).collect();
            prop_assert_eq!(ids.len(), batch.len());
        }

        #[test]
        fn local_ids_have_prefix(id in local_id_strategy()) {
            prop_assert!(id.starts_with("local-"));
        }
    }
}
