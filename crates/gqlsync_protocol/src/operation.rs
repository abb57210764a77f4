//! GraphQL operations and results.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Kind of GraphQL operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    /// A read.
    Query,
    /// A write.
    Mutation,
    /// A live stream over the realtime transport.
    Subscription,
}

/// A GraphQL operation: document plus variables.
///
/// Documents are opaque to gqlsync; the root field name is supplied by the
/// caller so results can be located without parsing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphQLOperation {
    /// Operation kind.
    pub operation_type: OperationType,
    /// Source document.
    pub document: String,
    /// Operation name, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_name: Option<String>,
    /// Root field selected by the operation (e.g. `createTodo`).
    pub root_field: String,
    /// Operation variables.
    #[serde(default)]
    pub variables: Map<String, Value>,
}

impl GraphQLOperation {
    /// Creates an operation with no variables.
    pub fn new(
        operation_type: OperationType,
        document: impl Into<String>,
        root_field: impl Into<String>,
    ) -> Self {
        Self {
            operation_type,
            document: document.into(),
            operation_name: None,
            root_field: root_field.into(),
            variables: Map::new(),
        }
    }

    /// Creates a query operation.
    pub fn query(document: impl Into<String>, root_field: impl Into<String>) -> Self {
        Self::new(OperationType::Query, document, root_field)
    }

    /// Creates a mutation operation.
    pub fn mutation(document: impl Into<String>, root_field: impl Into<String>) -> Self {
        Self::new(OperationType::Mutation, document, root_field)
    }

    /// Creates a subscription operation.
    pub fn subscription(document: impl Into<String>, root_field: impl Into<String>) -> Self {
        Self::new(OperationType::Subscription, document, root_field)
    }

    /// Sets the operation name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.operation_name = Some(name.into());
        self
    }

    /// Sets one variable.
    #[must_use]
    pub fn with_variable(mut self, name: impl Into<String>, value: Value) -> Self {
        self.variables.insert(name.into(), value);
        self
    }

    /// Replaces all variables.
    #[must_use]
    pub fn with_variables(mut self, variables: Map<String, Value>) -> Self {
        self.variables = variables;
        self
    }

    /// The name reported to conflict resolvers: the operation name, falling
    /// back to the root field.
    pub fn display_name(&self) -> &str {
        self.operation_name.as_deref().unwrap_or(&self.root_field)
    }

    /// The `{query, variables}` body sent to the server.
    pub fn request_body(&self) -> Value {
        serde_json::json!({
            "query": self.document,
            "variables": Value::Object(self.variables.clone()),
        })
    }

    /// Stable hex digest of the document and variables.
    ///
    /// Variable maps serialize with sorted keys, so equal operations always
    /// produce equal fingerprints.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.document.as_bytes());
        hasher.update([0u8]);
        hasher.update(Value::Object(self.variables.clone()).to_string().as_bytes());
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect()
    }
}

/// One entry of a GraphQL `errors` array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphQLError {
    /// Human-readable message.
    pub message: String,
    /// Server-specific error classification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    /// Extra data attached to the error (the current record for conflicts).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Path of the failing field.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub path: Vec<Value>,
}

impl GraphQLError {
    /// Creates an error with only a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_type: None,
            data: None,
            path: Vec::new(),
        }
    }

    /// Sets the error type.
    #[must_use]
    pub fn with_type(mut self, error_type: impl Into<String>) -> Self {
        self.error_type = Some(error_type.into());
        self
    }

    /// Sets the attached data.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// The result of executing an operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FetchResult {
    /// Response data, keyed by root field.
    #[serde(default)]
    pub data: Option<Value>,
    /// GraphQL errors.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<GraphQLError>,
}

impl FetchResult {
    /// A successful result.
    pub fn data(data: Value) -> Self {
        Self {
            data: Some(data),
            errors: Vec::new(),
        }
    }

    /// A failed result.
    pub fn errors(errors: Vec<GraphQLError>) -> Self {
        Self { data: None, errors }
    }

    /// Returns true if the server reported any errors.
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Returns the value under `field` in `data`, if present and non-null.
    pub fn field(&self, field: &str) -> Option<&Value> {
        self.data
            .as_ref()
            .and_then(|data| data.get(field))
            .filter(|value| !value.is_null())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builder_and_display_name() {
        let op = GraphQLOperation::mutation("mutation { createTodo }", "createTodo")
            .with_variable("name", json!("X"));
        assert_eq!(op.display_name(), "createTodo");
        assert_eq!(op.variables["name"], json!("X"));

        let named = op.clone().with_name("AddTodo");
        assert_eq!(named.display_name(), "AddTodo");
    }

    #[test]
    fn fingerprint_ignores_variable_insertion_order() {
        let a = GraphQLOperation::query("q", "f")
            .with_variable("a", json!(1))
            .with_variable("b", json!(2));
        let b = GraphQLOperation::query("q", "f")
            .with_variable("b", json!(2))
            .with_variable("a", json!(1));
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(
            a.fingerprint(),
            GraphQLOperation::query("q2", "f").fingerprint()
        );
    }

    #[test]
    fn fetch_result_wire_shape() {
        let raw = json!({
            "data": null,
            "errors": [{
                "message": "conflict",
                "errorType": "DynamoDB:ConditionalCheckFailedException",
                "data": {"id": "1", "version": 2}
            }]
        });
        let result: FetchResult = serde_json::from_value(raw).unwrap();
        assert!(result.has_errors());
        assert_eq!(
            result.errors[0].error_type.as_deref(),
            Some("DynamoDB:ConditionalCheckFailedException")
        );
        assert_eq!(result.errors[0].data.as_ref().unwrap()["version"], json!(2));
    }

    #[test]
    fn field_skips_null() {
        let result = FetchResult::data(json!({"a": null, "b": {"id": 1}}));
        assert!(result.field("a").is_none());
        assert_eq!(result.field("b").unwrap()["id"], json!(1));
    }
}
