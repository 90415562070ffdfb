//! Outbound target resolution and header sanitization.

use crate::error::ProxyError;
use axum::http::header::{CONNECTION, HOST, PROXY_AUTHORIZATION};
use axum::http::{HeaderMap, HeaderName, Uri};
use memex_core::Sensitive;
use reqwest::Url;
use tracing::debug;

/// Proxy negotiation headers. These address this hop only and may carry
/// credentials for the proxy itself.
const PROXY_HEADERS: [&str; 3] = ["proxy-connection", "proxy-authenticate", "proxy-authorization"];

const HOP_BY_HOP_HEADERS: [&str; 6] = [
    "connection",
    "keep-alive",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

const DEFAULT_SCHEME: &str = "http";

/// Build the upstream URL from the request target.
///
/// Absolute-form targets are used as-is. Origin-form targets take their host
/// from the `Host` header and default to plain HTTP.
pub fn resolve_target(uri: &Uri, headers: &HeaderMap) -> Result<Url, ProxyError> {
    let scheme = uri.scheme_str().unwrap_or(DEFAULT_SCHEME);

    let authority = match uri.authority() {
        Some(authority) => authority.as_str(),
        None => headers
            .get(HOST)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|host| !host.is_empty())
            .ok_or(ProxyError::MissingHost)?,
    };

    let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    let target = format!("{scheme}://{authority}{path_and_query}");

    Url::parse(&target).map_err(|e| ProxyError::InvalidTarget {
        target: target.clone(),
        reason: e.to_string(),
    })
}

/// Prepare inbound headers for the upstream request.
///
/// `Host` is dropped so the client derives it from the outbound URL.
pub fn sanitize_request_headers(headers: &mut HeaderMap) {
    if let Some(credentials) = headers.get(PROXY_AUTHORIZATION) {
        debug!(
            proxy_authorization = %Sensitive(credentials.as_bytes()),
            "stripping proxy credentials"
        );
    }
    for name in PROXY_HEADERS {
        headers.remove(name);
    }
    strip_hop_by_hop(headers);
    headers.remove(HOST);
}

/// Remove connection-level headers, including any listed in `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|token| HeaderName::from_bytes(token.trim().as_bytes()).ok())
        .collect();

    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP_HEADERS {
        headers.remove(name);
    }
}
