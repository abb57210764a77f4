//! Conflict detection and resolution types.
//!
//! A conflict is a mutation rejected by a server-side version check. The
//! server reports it as a GraphQL error of a known type whose `data` holds
//! the authoritative current record.

use crate::operation::{FetchResult, GraphQLError, OperationType};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Error type reported for failed conditional writes.
pub const CONFLICT_ERROR_TYPE: &str = "DynamoDB:ConditionalCheckFailedException";

/// Returns the first conflict error carrying a current record, if any.
pub fn find_conflict(result: &FetchResult) -> Option<&GraphQLError> {
    result.errors.iter().find(|error| {
        error.error_type.as_deref() == Some(CONFLICT_ERROR_TYPE)
            && error.data.as_ref().is_some_and(|data| !data.is_null())
    })
}

/// Everything a conflict resolver gets to see.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictContext {
    /// Name of the conflicting mutation.
    pub mutation_name: String,
    /// Always [`OperationType::Mutation`] today; kept for resolver routing.
    pub operation_type: OperationType,
    /// Variables of the attempt that conflicted.
    pub variables: Map<String, Value>,
    /// The server's current record.
    pub data: Value,
    /// How many times the resolver already ran for this mutation.
    pub retries: u32,
}

/// A resolver's decision.
#[derive(Debug, Clone, PartialEq)]
pub enum ConflictResolution {
    /// Re-issue the mutation with these variables.
    Retry(Map<String, Value>),
    /// Give up and surface the original error.
    Discard,
}

impl ConflictResolution {
    /// Builds a decision from an optional variable map. Only `None` means
    /// discard; an empty map retries with no variables.
    pub fn from_variables(variables: Option<Map<String, Value>>) -> Self {
        match variables {
            Some(vars) => Self::Retry(vars),
            None => Self::Discard,
        }
    }

    /// Returns true for [`ConflictResolution::Discard`].
    pub fn is_discard(&self) -> bool {
        matches!(self, Self::Discard)
    }
}
