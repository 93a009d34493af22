//! Client address resolution.
//!
//! Proxy headers are consulted in a fixed priority order; the first present,
//! non-empty value that is not `unknown` wins, and only its first
//! comma-separated entry is used. Without any usable header the socket peer
//! address is reported.

use std::net::SocketAddr;

use axum::http::HeaderMap;

/// Header names in priority order.
pub const CLIENT_IP_HEADERS: [&str; 11] = [
    "x-forwarded-for",
    "x-real-ip",
    "proxy-client-ip",
    "wl-proxy-client-ip",
    "http_x_forwarded_for",
    "http_x_forwarded",
    "http_x_cluster_client_ip",
    "http_client_ip",
    "http_forwarded_for",
    "http_forwarded",
    "http_via",
];

/// Reported when neither headers nor the peer address are available.
pub const UNKNOWN_CLIENT: &str = "unknown";

pub fn resolve_client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    CLIENT_IP_HEADERS
        .iter()
        .filter_map(|name| headers.get(*name)?.to_str().ok())
        .filter_map(|value| {
            let first = value.split(',').next()?.trim();
            (!first.is_empty() && !first.eq_ignore_ascii_case(UNKNOWN_CLIENT)).then_some(first)
        })
        .map(str::to_string)
        .next()
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}
