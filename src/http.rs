//! HTTP helpers: CORS grants for known stores and client IP resolution.

use axum::http::{HeaderMap, HeaderValue, header};
use std::net::IpAddr;

/// Grants cross-origin access for an endpoint backed by a known store.
///
/// Only called after the store lookup succeeds, so CORS exposure never
/// reveals which paths exist to an arbitrary origin.
pub fn allow_cors(headers: &mut HeaderMap) {
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("POST"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type"),
    );
}

/// Extracts the first `x-forwarded-for` hop.
pub fn extract_forwarded_ip(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .and_then(|value| value.parse::<IpAddr>().ok())
}

/// Client IP from forwarding headers, falling back to the socket address.
pub fn resolve_client_ip(headers: &HeaderMap, connect_ip: Option<IpAddr>) -> Option<IpAddr> {
    extract_forwarded_ip(headers).or(connect_ip)
}
