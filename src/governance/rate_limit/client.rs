//! Identification of the client a request is counted against

use crate::core::headers::{X_FORWARDED_FOR, X_REAL_IP};
use axum::http::{HeaderMap, HeaderName};
use std::net::SocketAddr;

/// Key used when nothing identifies the caller
pub const ANONYMOUS_CLIENT: &str = "anonymous";

/// Resolves the client key of a request
///
/// By default only the peer address counts. Request headers are under the
/// caller's control, so the client-id header and the proxy headers
/// (`X-Forwarded-For`, then `X-Real-IP`) are consulted only when enabled,
/// in that order, ahead of the peer address.
#[derive(Debug, Clone, Default)]
pub struct ClientKeyResolver {
    client_id_header: Option<HeaderName>,
    trust_forwarded: bool,
}

impl ClientKeyResolver {
    /// Key clients by peer address only
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the client key from `name` when the request carries it
    pub fn with_client_id_header(mut self, name: HeaderName) -> Self {
        self.client_id_header = Some(name);
        self
    }

    /// Read the caller's address from the proxy headers
    pub fn trust_forwarded_headers(mut self, trust: bool) -> Self {
        self.trust_forwarded = trust;
        self
    }

    pub fn resolve(&self, headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
        let header = |name: &HeaderName| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        };

        if let Some(id) = self.client_id_header.as_ref().and_then(header) {
            return id.to_string();
        }
        if self.trust_forwarded {
            if let Some(first) = header(&HeaderName::from_static(X_FORWARDED_FOR))
                .and_then(|v| v.split(',').next())
                .map(str::trim)
                .filter(|v| !v.is_empty())
            {
                return first.to_string();
            }
            if let Some(ip) = header(&HeaderName::from_static(X_REAL_IP)) {
                return ip.to_string();
            }
        }
        peer.map(|addr| addr.ip().to_string())
            .unwrap_or_else(|| ANONYMOUS_CLIENT.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn peer() -> SocketAddr {
        "192.0.2.10:5555".parse().unwrap()
    }

    fn spoofed_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("x-client-id", HeaderValue::from_static("internal"));
        headers.insert(
            X_FORWARDED_FOR,
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        headers.insert(X_REAL_IP, HeaderValue::from_static("10.0.0.2"));
        headers
    }

    #[test]
    fn test_default_ignores_request_headers() {
        let resolver = ClientKeyResolver::new();
        assert_eq!(resolver.resolve(&spoofed_headers(), Some(peer())), "192.0.2.10");
        assert_eq!(resolver.resolve(&spoofed_headers(), None), ANONYMOUS_CLIENT);
    }

    #[test]
    fn test_client_id_header_wins_when_enabled() {
        let resolver = ClientKeyResolver::new()
            .with_client_id_header(HeaderName::from_static("x-client-id"))
            .trust_forwarded_headers(true);
        assert_eq!(resolver.resolve(&spoofed_headers(), Some(peer())), "internal");
    }

    #[test]
    fn test_first_forwarded_address_when_trusted() {
        let resolver = ClientKeyResolver::new().trust_forwarded_headers(true);
        assert_eq!(resolver.resolve(&spoofed_headers(), Some(peer())), "203.0.113.7");

        let mut headers = HeaderMap::new();
        headers.insert(X_REAL_IP, HeaderValue::from_static("10.0.0.2"));
        assert_eq!(resolver.resolve(&headers, Some(peer())), "10.0.0.2");
    }

    #[test]
    fn test_falls_back_to_peer_then_anonymous() {
        let resolver = ClientKeyResolver::new()
            .with_client_id_header(HeaderName::from_static("x-client-id"))
            .trust_forwarded_headers(true);
        let headers = HeaderMap::new();
        assert_eq!(resolver.resolve(&headers, Some(peer())), "192.0.2.10");
        assert_eq!(resolver.resolve(&headers, None), ANONYMOUS_CLIENT);
    }
}
