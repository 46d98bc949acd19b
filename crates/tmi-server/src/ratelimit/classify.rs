//! Endpoint classification used to decide which limiters apply and how to
//! extract the client IP.

use http::HeaderMap;

pub fn is_public_endpoint(path: &str) -> bool {
    path == "/" || path == "/config" || path.starts_with("/.well-known/")
}

pub fn is_auth_flow_endpoint(path: &str) -> bool {
    matches!(
        path,
        "/oauth2/authorize"
            | "/oauth2/callback"
            | "/oauth2/token"
            | "/oauth2/refresh"
            | "/oauth2/introspect"
            | "/saml/login"
            | "/saml/acs"
            | "/saml/slo"
    )
}

/// `X-Forwarded-For` (first entry), then `X-Real-IP`, then the peer address.
pub fn extract_ip(headers: &HeaderMap, peer: Option<std::net::IpAddr>) -> Option<String> {
    if let Some(xff) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = xff.split(',').next() {
            let trimmed = first.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    if let Some(real_ip) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        if !real_ip.trim().is_empty() {
            return Some(real_ip.trim().to_string());
        }
    }
    peer.map(|ip| ip.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_endpoints() {
        assert!(is_public_endpoint("/"));
        assert!(is_public_endpoint("/.well-known/jwks.json"));
        assert!(!is_public_endpoint("/threat_models"));
    }

    #[test]
    fn auth_flow_endpoints() {
        assert!(is_auth_flow_endpoint("/oauth2/callback"));
        assert!(is_auth_flow_endpoint("/saml/acs"));
        assert!(!is_auth_flow_endpoint("/oauth2/unknown"));
    }

    #[test]
    fn ip_extraction_prefers_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "1.2.3.4, 5.6.7.8".parse().unwrap());
        headers.insert("x-real-ip", "9.9.9.9".parse().unwrap());
        assert_eq!(extract_ip(&headers, None).as_deref(), Some("1.2.3.4"));
    }

    #[test]
    fn ip_extraction_falls_back_to_peer() {
        let headers = HeaderMap::new();
        let peer: std::net::IpAddr = "127.0.0.1".parse().unwrap();
        assert_eq!(extract_ip(&headers, Some(peer)).as_deref(), Some("127.0.0.1"));
    }
}
