//! Key Resolver Registry (C8): named strategies producing a rate-limit
//! bucket key from a request. Resolved once per route at compile time
//! (C12) against the route's configured `keyResolverName`, not
//! re-dispatched by name on every request.

use http::HeaderMap;
use std::net::IpAddr;

/// The four resolver kinds spec.md §4.8 names. `Header` carries the
/// route-configured header name as its parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyResolver {
    ClientIp,
    Header(String),
    RouteName,
    RoutePath,
}

pub const KNOWN_RESOLVER_NAMES: &[&str] = &["client-ip", "header", "route-name", "route-path"];

/// Resolves a `keyResolverName` (plus, for `header`, the route's
/// `header-name` arg) to a `KeyResolver`. Returns `None` for anything not
/// in [`KNOWN_RESOLVER_NAMES`] — the caller (C12) drops the route.
pub fn resolve_by_name(name: &str, header_name_arg: Option<&str>) -> Option<KeyResolver> {
    match name {
        "client-ip" => Some(KeyResolver::ClientIp),
        "header" => Some(KeyResolver::Header(header_name_arg?.to_string())),
        "route-name" => Some(KeyResolver::RouteName),
        "route-path" => Some(KeyResolver::RoutePath),
        _ => None,
    }
}

/// Everything a resolver might need from the live request.
pub struct ResolveContext<'a> {
    pub headers: &'a HeaderMap,
    pub socket_addr: Option<IpAddr>,
    pub route_id: &'a str,
    pub path: &'a str,
}

/// Produces the bucket key for `resolver` given `ctx`. `None` means "no
/// key resolvable" — per spec.md §4.8 the rate-limit check is then
/// skipped (request allowed).
pub fn resolve_key(resolver: &KeyResolver, ctx: &ResolveContext<'_>) -> Option<String> {
    match resolver {
        KeyResolver::ClientIp => client_ip(ctx),
        KeyResolver::Header(name) => ctx
            .headers
            .get(name.as_str())
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .filter(|s| !s.is_empty()),
        KeyResolver::RouteName => Some(ctx.route_id.to_string()),
        KeyResolver::RoutePath => Some(ctx.path.to_string()),
    }
}

/// Leftmost public address from `X-Forwarded-For`, else the socket's
/// remote address. Per spec.md §9's flagged revisit point, no
/// trusted-proxy-count configuration narrows this further.
fn client_ip(ctx: &ResolveContext<'_>) -> Option<String> {
    if let Some(xff) = ctx.headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        for candidate in xff.split(',') {
            let candidate = candidate.trim();
            if let Ok(addr) = candidate.parse::<IpAddr>() {
                if !is_private(&addr) {
                    return Some(addr.to_string());
                }
            }
        }
    }
    ctx.socket_addr.map(|a| a.to_string())
}

fn is_private(addr: &IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => {
            v4.is_private() || v4.is_loopback() || v4.is_link_local() || v4.is_unspecified()
        }
        IpAddr::V6(v6) => v6.is_loopback() || v6.is_unspecified() || (v6.segments()[0] & 0xfe00) == 0xfc00,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn headers_with_xff(value: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert("x-forwarded-for", HeaderValue::from_str(value).unwrap());
        h
    }

    #[test]
    fn unknown_resolver_name_returns_none() {
        assert!(resolve_by_name("not-a-resolver", None).is_none());
    }

    #[test]
    fn header_resolver_requires_header_name_arg() {
        assert!(resolve_by_name("header", None).is_none());
        assert!(resolve_by_name("header", Some("X-Tenant")).is_some());
    }

    #[test]
    fn client_ip_picks_leftmost_public_address() {
        let headers = headers_with_xff("10.0.0.1, 203.0.113.5, 198.51.100.9");
        let ctx = ResolveContext {
            headers: &headers,
            socket_addr: None,
            route_id: "r1",
            path: "/x",
        };
        assert_eq!(
            resolve_key(&KeyResolver::ClientIp, &ctx),
            Some("203.0.113.5".to_string())
        );
    }

    #[test]
    fn client_ip_falls_back_to_socket_addr_when_xff_absent() {
        let headers = HeaderMap::new();
        let ctx = ResolveContext {
            headers: &headers,
            socket_addr: Some("198.51.100.9".parse().unwrap()),
            route_id: "r1",
            path: "/x",
        };
        assert_eq!(
            resolve_key(&KeyResolver::ClientIp, &ctx),
            Some("198.51.100.9".to_string())
        );
    }

    #[test]
    fn route_name_and_route_path_resolvers_are_static() {
        let headers = HeaderMap::new();
        let ctx = ResolveContext {
            headers: &headers,
            socket_addr: None,
            route_id: "route-42",
            path: "/a/b",
        };
        assert_eq!(resolve_key(&KeyResolver::RouteName, &ctx), Some("route-42".to_string()));
        assert_eq!(resolve_key(&KeyResolver::RoutePath, &ctx), Some("/a/b".to_string()));
    }

    #[test]
    fn missing_header_resolves_to_none() {
        let headers = HeaderMap::new();
        let ctx = ResolveContext {
            headers: &headers,
            socket_addr: None,
            route_id: "r1",
            path: "/x",
        };
        assert_eq!(resolve_key(&KeyResolver::Header("x-tenant".to_string()), &ctx), None);
    }
}
