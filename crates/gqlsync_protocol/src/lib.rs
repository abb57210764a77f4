//! # gqlsync Protocol
//!
//! GraphQL operation model and realtime wire protocol for gqlsync.
//!
//! This crate provides:
//! - [`GraphQLOperation`] and [`FetchResult`] - the operation/result surface
//!   shared with the external GraphQL execution collaborator
//! - Realtime frames ([`ClientMessage`], [`ServerMessage`]) for the legacy
//!   `graphql-ws` sub-protocol
//! - Realtime URL derivation from a GraphQL endpoint
//! - Conflict error detection and the resolver context/decision types
//! - A generic JSON tree visitor used for id rewriting
//! - Delta-sync operation kind inference and list merging
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod conflict;
mod endpoint;
mod error;
mod merge;
mod messages;
mod operation;
mod tree;

pub use conflict::{
    find_conflict, ConflictContext, ConflictResolution, CONFLICT_ERROR_TYPE,
};
pub use endpoint::{
    is_standard_endpoint, realtime_url, realtime_url_with_auth, EMPTY_PAYLOAD,
    REALTIME_PATH, REALTIME_PROTOCOL,
};
pub use error::{ProtocolError, ProtocolResult};
pub use merge::{infer_operation_kind, merge_item, OperationKind, DELETED_MARKER};
pub use messages::{ClientMessage, ServerMessage, StartPayload};
pub use operation::{FetchResult, GraphQLError, GraphQLOperation, OperationType};
pub use tree::{collect, rewrite, PathSegment, ValuePath};

/// The JSON value type used throughout gqlsync.
pub use serde_json::Value;
