//! Realtime URL derivation.
//!
//! A standard managed endpoint
//! (`https://<26 chars>.appsync-api.<region>.amazonaws.com/graphql`) has a
//! sibling realtime host (`appsync-realtime-api`). Custom domains serve the
//! realtime endpoint under [`REALTIME_PATH`] instead.

use crate::error::{ProtocolError, ProtocolResult};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::Value;
use url::Url;

/// WebSocket sub-protocol name.
pub const REALTIME_PROTOCOL: &str = "graphql-ws";
/// Path appended to custom-domain endpoints.
pub const REALTIME_PATH: &str = "/realtime";
/// Base64 of the empty JSON object sent as the connect payload.
pub const EMPTY_PAYLOAD: &str = "e30=";

const STANDARD_API_LABEL: &str = "appsync-api";
const REALTIME_API_LABEL: &str = "appsync-realtime-api";

/// Returns true for the standard managed endpoint shape.
pub fn is_standard_endpoint(endpoint: &str) -> bool {
    Url::parse(endpoint).is_ok_and(|url| is_standard_url(&url))
}

fn is_standard_url(url: &Url) -> bool {
    if url.scheme() != "https" || url.path() != "/graphql" || url.port().is_some() {
        return false;
    }
    let Some(host) = url.host_str() else {
        return false;
    };
    let Some(prefix) = host
        .strip_suffix(".amazonaws.com")
        .or_else(|| host.strip_suffix(".amazonaws.com.cn"))
    else {
        return false;
    };

    let labels: Vec<&str> = prefix.split('.').collect();
    match labels.as_slice() {
        [api_id, api, region] => {
            api_id.len() == 26
                && api_id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
                && *api == STANDARD_API_LABEL
                && is_region(region)
        }
        _ => false,
    }
}

fn is_region(label: &str) -> bool {
    // e.g. us-east-1, ap-southeast-2, us-gov-west-1
    let parts: Vec<&str> = label.split('-').collect();
    parts.len() >= 3
        && parts[0].len() == 2
        && parts[0].chars().all(|c| c.is_ascii_lowercase())
        && parts[1..parts.len() - 1]
            .iter()
            .all(|p| p.len() >= 2 && p.chars().all(|c| c.is_ascii_lowercase()))
        && parts[parts.len() - 1].chars().all(|c| c.is_ascii_digit())
        && !parts[parts.len() - 1].is_empty()
}

/// Derives the bare realtime URL for a GraphQL endpoint.
///
/// # Errors
///
/// Fails for endpoints that do not parse or are not `http` or `https`.
pub fn realtime_url(endpoint: &str) -> ProtocolResult<String> {
    let invalid = || ProtocolError::InvalidEndpoint(endpoint.to_string());
    let mut url = Url::parse(endpoint).map_err(|_| invalid())?;
    let scheme = match url.scheme() {
        "https" => "wss",
        "http" => "ws",
        _ => return Err(invalid()),
    };

    if is_standard_url(&url) {
        let host = url
            .host_str()
            .map(|host| host.replacen(STANDARD_API_LABEL, REALTIME_API_LABEL, 1))
            .ok_or_else(invalid)?;
        url.set_host(Some(&host)).map_err(|_| invalid())?;
    } else {
        let path = format!("{}{}", url.path().trim_end_matches('/'), REALTIME_PATH);
        url.set_path(&path);
    }
    url.set_scheme(scheme).map_err(|_| invalid())?;
    Ok(url.into())
}

/// Derives the realtime URL with the base64 header blob and empty payload
/// in the query string.
pub fn realtime_url_with_auth(endpoint: &str, headers: &Value) -> ProtocolResult<String> {
    let url = realtime_url(endpoint)?;
    let header = STANDARD.encode(headers.to_string());
    Ok(format!("{url}?header={header}&payload={EMPTY_PAYLOAD}"))
}
