//! Client IP resolution from proxy headers and the socket peer address
//!
//! Resolution order:
//! - first entry of `X-Forwarded-For`
//! - `X-Real-IP` as sent
//! - the socket peer address, with the IPv4-mapped IPv6 prefix removed
//! - the literal `"unknown"`
//!
//! Header values are not validated as IP syntax. Callers get exactly what the
//! proxy (or the client) sent.

use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::{request::Parts, HeaderMap},
};
use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};

pub const UNKNOWN_IP: &str = "unknown";

const IPV4_MAPPED_PREFIX: &str = "::ffff:";

/// Resolve the effective client address for a request.
///
/// # Arguments
/// * `headers` - HTTP request headers
/// * `peer` - The socket remote address, if the transport exposes one
pub fn resolve_client_ip(headers: &HeaderMap, peer: Option<IpAddr>) -> String {
    if let Some(forwarded) = header_value(headers, "x-forwarded-for") {
        let first = forwarded.split(',').next().unwrap_or(forwarded).trim();
        return first.to_string();
    }

    if let Some(real_ip) = header_value(headers, "x-real-ip") {
        return real_ip.to_string();
    }

    match peer {
        Some(ip) => {
            let ip = ip.to_string();
            match ip.strip_prefix(IPV4_MAPPED_PREFIX) {
                Some(v4) => v4.to_string(),
                None => ip,
            }
        }
        None => UNKNOWN_IP.to_string(),
    }
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|h| h.to_str().ok())
        .filter(|v| !v.is_empty())
}

/// Extractor yielding the resolved client IP.
///
/// The peer address is taken from `ConnectInfo<SocketAddr>` when the server
/// was started with `into_make_service_with_connect_info`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIp(pub String);

impl<S> FromRequestParts<S> for ClientIp
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());

        Ok(ClientIp(resolve_client_ip(&parts.headers, peer)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use std::net::Ipv6Addr;

    fn peer(ip: &str) -> Option<IpAddr> {
        Some(ip.parse().unwrap())
    }

    #[test]
    fn test_forwarded_for_takes_first_entry() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static(" 203.0.113.1 , 198.51.100.1"),
        );
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.9"));

        let result = resolve_client_ip(&headers, peer("192.168.1.1"));
        assert_eq!(result, "203.0.113.1");
    }

    #[test]
    fn test_real_ip_used_verbatim() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("not-an-ip"));

        let result = resolve_client_ip(&headers, peer("192.168.1.1"));
        assert_eq!(result, "not-an-ip");
    }

    #[test]
    fn test_peer_address_fallback() {
        let headers = HeaderMap::new();
        assert_eq!(resolve_client_ip(&headers, peer("192.168.1.1")), "192.168.1.1");
        assert_eq!(resolve_client_ip(&headers, peer("2001:db8::1")), "2001:db8::1");
    }

    #[test]
    fn test_ipv4_mapped_prefix_stripped() {
        let headers = HeaderMap::new();
        let mapped = IpAddr::V6(Ipv6Addr::new(0, 0, 0, 0, 0, 0xffff, 0x0a00, 0x0001));

        let result = resolve_client_ip(&headers, Some(mapped));
        assert_eq!(result, "10.0.0.1");
    }

    #[test]
    fn test_unknown_without_any_source() {
        let headers = HeaderMap::new();
        assert_eq!(resolve_client_ip(&headers, None), UNKNOWN_IP);
    }

    #[test]
    fn test_empty_forwarded_for_is_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static(""));

        let result = resolve_client_ip(&headers, peer("192.168.1.1"));
        assert_eq!(result, "192.168.1.1");
    }
}
