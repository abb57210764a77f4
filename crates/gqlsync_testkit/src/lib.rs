//! # gqlsync Testkit
//!
//! Test utilities for gqlsync.
//!
//! This crate provides:
//! - [`FakeBackend`] - an in-memory GraphQL backend with version checks
//! - [`RealtimeServer`] - a scripted realtime server over the mock connector
//! - Client fixtures and operation builders for the Todo model
//! - Property-based test generators using proptest
//! - [`init_tracing`] for opt-in log output in tests
//!
//! ## Usage
//!
//! ```rust,ignore
//! use gqlsync_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn offline_add() {
//!     let kit = TestClient::new();
//!     kit.client.set_online(false);
//!     let handle = kit.client.mutate(add_todo("local-1", "X")).await.unwrap();
//!     kit.client.set_online(true);
//!     handle.result().await.unwrap();
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod backend;
pub mod fixtures;
pub mod generators;
pub mod logging;
pub mod realtime;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::backend::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::logging::*;
    pub use crate::realtime::*;
}

pub use backend::*;
pub use fixtures::*;
pub use generators::*;
pub use logging::*;
pub use realtime::*;
