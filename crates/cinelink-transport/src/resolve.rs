//! Host name resolution.
//!
//! Dotted-quad input is normalized without a lookup (the unit's own
//! configuration screens print octets with leading zeros, e.g.
//! `192.168.001.010`). Anything else goes through the system resolver.

use std::net::IpAddr;
use std::time::Duration;

use crate::TransportError;

/// Resolves `host` to an IP address string, failing after `timeout`.
///
/// IPv4 results are preferred when the resolver returns both families.
///
/// # Errors
/// [`TransportError::Resolve`] if the name cannot be resolved in time.
pub async fn resolve_host(host: &str, timeout: Duration) -> Result<String, TransportError> {
    if !host.is_empty() && host.bytes().all(|b| b.is_ascii_digit() || b == b'.') {
        return Ok(normalize_ipv4(host));
    }

    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(ip.to_string());
    }

    let lookup = tokio::net::lookup_host((host, 0));
    let addrs: Vec<_> = tokio::time::timeout(timeout, lookup)
        .await
        .map_err(|_| TransportError::Resolve(host.to_string()))?
        .map_err(|_| TransportError::Resolve(host.to_string()))?
        .map(|addr| addr.ip())
        .collect();

    let ip = addrs
        .iter()
        .find(|ip| ip.is_ipv4())
        .or_else(|| addrs.first())
        .ok_or_else(|| TransportError::Resolve(host.to_string()))?;

    tracing::debug!(host, %ip, "resolved host");
    Ok(ip.to_string())
}

/// Strips leading zeros from each octet, keeping a lone `0`.
fn normalize_ipv4(host: &str) -> String {
    host.split('.')
        .map(|octet| {
            let trimmed = octet.trim_start_matches('0');
            if trimmed.is_empty() && !octet.is_empty() { "0" } else { trimmed }
        })
        .collect::<Vec<_>>()
        .join(".")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_ipv4_strips_leading_zeros() {
        assert_eq!(normalize_ipv4("192.168.001.010"), "192.168.1.10");
        assert_eq!(normalize_ipv4("010.000.000.001"), "10.0.0.1");
        assert_eq!(normalize_ipv4("127.0.0.1"), "127.0.0.1");
    }

    #[tokio::test]
    async fn test_resolve_host_numeric_skips_lookup() {
        let ip = resolve_host("127.000.000.001", Duration::from_secs(1)).await.unwrap();
        assert_eq!(ip, "127.0.0.1");
    }

    #[tokio::test]
    async fn test_resolve_host_localhost() {
        let ip = resolve_host("localhost", Duration::from_secs(5)).await.unwrap();
        assert!(ip == "127.0.0.1" || ip == "::1", "got {ip}");
    }

    #[tokio::test]
    async fn test_resolve_host_invalid_name_fails() {
        let err = resolve_host("no-such-host.invalid", Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Resolve(_)));
    }
}
