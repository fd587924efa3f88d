use axum::http::HeaderMap;
use std::net::SocketAddr;

/// Headers consulted, in order, before falling back to the socket peer.
const FORWARDING_HEADERS: &[&str] = &["x-forwarded-for", "x-real-ip", "cf-connecting-ip"];

pub const UNKNOWN_IDENTITY: &str = "unknown";

/// Derives the rate-limit identity of a request.
///
/// `X-Forwarded-For` contributes only its first hop.
pub fn client_identity(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    for name in FORWARDING_HEADERS {
        let Some(value) = headers.get(*name).and_then(|v| v.to_str().ok()) else {
            continue;
        };
        let first_hop = value.split(',').next().unwrap_or_default().trim();
        if !first_hop.is_empty() {
            return first_hop.to_string();
        }
    }

    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_IDENTITY.to_string())
}
