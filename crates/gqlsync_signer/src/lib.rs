//! # gqlsync Signer
//!
//! Canonical request signing for credentialed GraphQL transport.
//!
//! This crate provides:
//! - [`SignableRequest`] - an HTTP-shaped request with a mutable header bag
//! - [`Signer`] - the HMAC-chain signing algorithm (`AWS4-HMAC-SHA256`)
//! - [`Credentials`] and the [`CredentialsProvider`] collaborator trait
//! - Service/region inference from endpoint hosts
//!
//! This is a pure crate: signing performs no I/O. Credential resolution is
//! the only suspension point and lives behind [`CredentialsProvider`].
//!
//! ## Example
//!
//! ```rust
//! use gqlsync_signer::{Credentials, SignableRequest, Signer, SigningScope};
//! use chrono::{TimeZone, Utc};
//!
//! let credentials = Credentials::new("AKIDEXAMPLE", "secret");
//! let mut request = SignableRequest::new("POST", "https://example.appsync-api.us-east-1.amazonaws.com/graphql")
//!     .with_body("{}");
//! let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
//! Signer::new(SigningScope::new("us-east-1", "appsync"))
//!     .sign_at(&mut request, &credentials, at)
//!     .unwrap();
//! assert!(request.header("authorization").unwrap().starts_with("AWS4-HMAC-SHA256"));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod credentials;
mod error;
mod request;
mod service;
mod signer;

pub use credentials::{CachedCredentials, Credentials, CredentialsProvider, StaticCredentials};
pub use error::{SignerError, SignerResult};
pub use request::{ParsedUrl, SignableRequest};
pub use service::{parse_service_info, ServiceInfo};
pub use signer::{
    derive_signing_key, hex_encode, sha256_hex, Signer, SigningScope, ALGORITHM,
    AMZ_DATE_HEADER, SECURITY_TOKEN_HEADER,
};
