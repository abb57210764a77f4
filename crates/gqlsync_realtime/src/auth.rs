//! Authorization headers for the handshake URL and start frames.
//!
//! | Mode | Headers |
//! |------|---------|
//! | API key | `host`, `x-amz-date`, `x-api-key` |
//! | IAM | signed synthetic POST (`/connect` for the handshake) |
//! | User pool, OIDC, Lambda | `host`, `Authorization: <token>` |

use crate::error::{RealtimeError, RealtimeResult};
use async_trait::async_trait;
use chrono::Utc;
use gqlsync_protocol::Value;
use gqlsync_signer::{
    CredentialsProvider, ParsedUrl, SignableRequest, Signer, SigningScope, AMZ_DATE_HEADER,
};
use serde_json::Map;
use std::fmt;
use std::sync::Arc;

const SIGNING_SERVICE: &str = "appsync";
const CONNECT_PATH: &str = "/connect";
const API_KEY_HEADER: &str = "x-api-key";

/// Resolves a bearer-style token, possibly asynchronously.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Returns the current token.
    async fn token(&self) -> RealtimeResult<String>;
}

/// A fixed token.
#[derive(Clone)]
pub struct StaticToken(String);

impl StaticToken {
    /// Wraps a token.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StaticToken(<redacted>)")
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    async fn token(&self) -> RealtimeResult<String> {
        Ok(self.0.clone())
    }
}

#[async_trait]
impl<F> TokenProvider for F
where
    F: Fn() -> RealtimeResult<String> + Send + Sync,
{
    async fn token(&self) -> RealtimeResult<String> {
        self()
    }
}

/// How realtime frames are authorized.
#[derive(Clone)]
pub enum AuthMode {
    /// Static API key.
    ApiKey(String),
    /// Request signing with credentials.
    Iam(Arc<dyn CredentialsProvider>),
    /// User-pool JWT.
    UserPool(Arc<dyn TokenProvider>),
    /// OpenID Connect token.
    Oidc(Arc<dyn TokenProvider>),
    /// Custom authorizer token.
    Lambda(Arc<dyn TokenProvider>),
}

/// What the headers authorize.
#[derive(Debug, Clone, Copy)]
pub enum AuthTarget<'a> {
    /// The socket handshake.
    Handshake,
    /// A `start` frame carrying this `{query, variables}` payload.
    Start {
        /// Serialized request body.
        data: &'a str,
    },
}

impl AuthMode {
    /// API-key mode.
    pub fn api_key(key: impl Into<String>) -> Self {
        Self::ApiKey(key.into())
    }

    /// IAM mode.
    pub fn iam(credentials: impl CredentialsProvider + 'static) -> Self {
        Self::Iam(Arc::new(credentials))
    }

    /// User-pool mode.
    pub fn user_pool(token: impl TokenProvider + 'static) -> Self {
        Self::UserPool(Arc::new(token))
    }

    /// OIDC mode.
    pub fn oidc(token: impl TokenProvider + 'static) -> Self {
        Self::Oidc(Arc::new(token))
    }

    /// Custom-authorizer mode.
    pub fn lambda(token: impl TokenProvider + 'static) -> Self {
        Self::Lambda(Arc::new(token))
    }

    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ApiKey(_) => "API_KEY",
            Self::Iam(_) => "AWS_IAM",
            Self::UserPool(_) => "AMAZON_COGNITO_USER_POOLS",
            Self::Oidc(_) => "OPENID_CONNECT",
            Self::Lambda(_) => "AWS_LAMBDA",
        }
    }

    /// Derives the authorization headers for `target`.
    ///
    /// # Errors
    ///
    /// Fails if the endpoint is malformed, credentials or tokens cannot be
    /// resolved, or signing fails.
    pub async fn headers(
        &self,
        endpoint: &str,
        region: Option<&str>,
        target: AuthTarget<'_>,
    ) -> RealtimeResult<Map<String, Value>> {
        let host = ParsedUrl::parse(endpoint)?.host;
        let mut headers = Map::new();

        match self {
            Self::ApiKey(key) => {
                headers.insert("host".into(), Value::String(host));
                headers.insert(
                    AMZ_DATE_HEADER.into(),
                    Value::String(Utc::now().format("%Y%m%dT%H%M%SZ").to_string()),
                );
                headers.insert(API_KEY_HEADER.into(), Value::String(key.clone()));
            }
            Self::Iam(provider) => {
                let credentials = provider.credentials().await?;
                let (url, body) = match target {
                    AuthTarget::Handshake => (
                        format!("{}{CONNECT_PATH}", endpoint.trim_end_matches('/')),
                        "{}".to_string(),
                    ),
                    AuthTarget::Start { data } => (endpoint.to_string(), data.to_string()),
                };
                let mut request = SignableRequest::new("POST", url)
                    .with_body(body)
                    .with_header("accept", "application/json, text/javascript")
                    .with_header("content-encoding", "amz-1.0")
                    .with_header("content-type", "application/json; charset=UTF-8");
                let scope = SigningScope {
                    region: region.map(str::to_string),
                    service: Some(SIGNING_SERVICE.to_string()),
                };
                Signer::new(scope).sign(&mut request, &credentials)?;
                for (name, value) in request.headers {
                    headers.insert(name, Value::String(value));
                }
            }
            Self::UserPool(tokens) | Self::Oidc(tokens) | Self::Lambda(tokens) => {
                let token = tokens.token().await?;
                if token.is_empty() {
                    return Err(RealtimeError::Token(format!(
                        "{} token provider returned an empty token",
                        self.name()
                    )));
                }
                headers.insert("Authorization".into(), Value::String(token));
                headers.insert("host".into(), Value::String(host));
            }
        }
        Ok(headers)
    }
}

impl fmt::Debug for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AuthMode({})", self.name())
    }
}
