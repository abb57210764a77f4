//! The HMAC-chain signing algorithm.
//!
//! ## Algorithm
//!
//! 1. Canonicalize headers (lower-case names, trimmed values, sorted)
//! 2. Hash the body with SHA-256
//! 3. Build the canonical request and hash it
//! 4. Build the string-to-sign from the algorithm id, timestamp and scope
//! 5. Derive a signing key via a four-level HMAC chain seeded from the secret
//! 6. HMAC the string-to-sign and hex-encode the result
//!
//! The output is deterministic for a fixed timestamp.

use crate::credentials::Credentials;
use crate::error::{SignerError, SignerResult};
use crate::request::{ParsedUrl, SignableRequest};
use crate::service::parse_service_info;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::borrow::Cow;
use tracing::trace;

type HmacSha256 = Hmac<Sha256>;

/// Algorithm identifier placed in the string-to-sign and `Authorization`.
pub const ALGORITHM: &str = "AWS4-HMAC-SHA256";
/// Header carrying the signing timestamp.
pub const AMZ_DATE_HEADER: &str = "x-amz-date";
/// Header carrying the session token of temporary credentials.
pub const SECURITY_TOKEN_HEADER: &str = "X-Amz-Security-Token";

const SCOPE_TERMINATOR: &str = "aws4_request";

/// Region and service for the credential scope.
///
/// Missing values are inferred from the request host at signing time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SigningScope {
    /// Explicit region, if known.
    pub region: Option<String>,
    /// Explicit service, if known.
    pub service: Option<String>,
}

impl SigningScope {
    /// Creates a scope with an explicit region and service.
    pub fn new(region: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            region: Some(region.into()),
            service: Some(service.into()),
        }
    }

    /// Creates a scope that is fully inferred from the host.
    pub fn inferred() -> Self {
        Self::default()
    }

    fn resolve(&self, url: &ParsedUrl) -> SignerResult<(String, String)> {
        let parsed = parse_service_info(&url.host);
        let region = self
            .region
            .clone()
            .or(parsed.region)
            .ok_or_else(|| SignerError::MissingRegion(url.host.clone()))?;
        let service = self
            .service
            .clone()
            .or(parsed.service)
            .ok_or_else(|| SignerError::MissingService(url.host.clone()))?;
        Ok((region, service))
    }
}

/// Signs [`SignableRequest`]s for one credential scope.
#[derive(Debug, Clone)]
pub struct Signer {
    scope: SigningScope,
}

impl Signer {
    /// Creates a signer for the given scope.
    pub fn new(scope: SigningScope) -> Self {
        Self { scope }
    }

    /// Signs the request using the current time.
    pub fn sign(&self, request: &mut SignableRequest, credentials: &Credentials) -> SignerResult<()> {
        self.sign_at(request, credentials, Utc::now())
    }

    /// Signs the request as of `at`.
    ///
    /// Adds `host`, `x-amz-date`, the session token header (when the
    /// credentials carry one) and `Authorization` to the header bag.
    ///
    /// # Errors
    ///
    /// Fails if the URL is malformed or the scope cannot be determined.
    pub fn sign_at(
        &self,
        request: &mut SignableRequest,
        credentials: &Credentials,
        at: DateTime<Utc>,
    ) -> SignerResult<()> {
        let url = request.parsed_url()?;
        let (region, service) = self.scope.resolve(&url)?;

        let amz_date = at.format("%Y%m%dT%H%M%SZ").to_string();
        let date_stamp = at.format("%Y%m%d").to_string();

        request.headers.retain(|(name, _)| !name.eq_ignore_ascii_case("authorization"));
        if request.header("host").is_none() {
            request.set_header("host", url.host.clone());
        }
        request.set_header(AMZ_DATE_HEADER, amz_date.clone());
        if let Some(token) = &credentials.session_token {
            request.set_header(SECURITY_TOKEN_HEADER, token.clone());
        }

        let (canonical_headers, signed_headers) = canonical_headers(&request.headers);
        let canonical_request = [
            request.method.to_ascii_uppercase(),
            url.path.clone(),
            canonical_query(url.query.as_deref()),
            canonical_headers,
            signed_headers.clone(),
            sha256_hex(request.body.as_bytes()),
        ]
        .join("\n");

        let scope = format!("{date_stamp}/{region}/{service}/{SCOPE_TERMINATOR}");
        let string_to_sign = format!(
            "{ALGORITHM}\n{amz_date}\n{scope}\n{}",
            sha256_hex(canonical_request.as_bytes())
        );
        trace!(%scope, "signing request");

        let key = derive_signing_key(&credentials.secret_access_key, &date_stamp, &region, &service);
        let signature = hex_encode(&hmac(&key, string_to_sign.as_bytes()));

        request.set_header(
            "Authorization",
            format!(
                "{ALGORITHM} Credential={}/{scope}, SignedHeaders={signed_headers}, Signature={signature}",
                credentials.access_key_id
            ),
        );
        Ok(())
    }
}

/// Derives the signing key: `HMAC(HMAC(HMAC(HMAC("AWS4"+secret, date), region), service), "aws4_request")`.
pub fn derive_signing_key(secret: &str, date_stamp: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac(format!("AWS4{secret}").as_bytes(), date_stamp.as_bytes());
    let k_region = hmac(&k_date, region.as_bytes());
    let k_service = hmac(&k_region, service.as_bytes());
    hmac(&k_service, SCOPE_TERMINATOR.as_bytes())
}

/// Returns the lower-case hex SHA-256 digest of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    hex_encode(&Sha256::digest(data))
}

/// Lower-case hex encoding.
pub fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn hmac(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn canonical_headers(headers: &[(String, String)]) -> (String, String) {
    let mut entries: Vec<(String, String)> = headers
        .iter()
        .map(|(name, value)| {
            let value = value.split_whitespace().collect::<Vec<_>>().join(" ");
            (name.to_ascii_lowercase(), value)
        })
        .collect();
    entries.sort();

    let canonical = entries
        .iter()
        .map(|(name, value)| format!("{name}:{value}\n"))
        .collect::<String>();
    let signed = entries
        .iter()
        .map(|(name, _)| name.as_str())
        .collect::<Vec<_>>()
        .join(";");
    (canonical, signed)
}

fn canonical_query(query: Option<&str>) -> String {
    let Some(query) = query.filter(|q| !q.is_empty()) else {
        return String::new();
    };

    let mut pairs: Vec<(String, String)> = query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) => (encode_rfc3986(key), encode_rfc3986(value)),
            None => (encode_rfc3986(pair), String::new()),
        })
        .collect();
    pairs.sort();

    pairs
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// Percent-encodes everything outside the unreserved set. Valid escapes
/// are decoded first so they are not encoded twice.
fn encode_rfc3986(input: &str) -> String {
    let decoded = urlencoding::decode(input).unwrap_or(Cow::Borrowed(input));
    urlencoding::encode(&decoded).into_owned()
}
