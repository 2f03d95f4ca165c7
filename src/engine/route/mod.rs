//! Route planning: database, selector, connect plan, and exchange finder
//! (SPEC_FULL.md §4.2 - §4.6).

pub mod connect_plan;
pub mod database;
pub mod finder;
pub mod plan;
pub mod planner;
pub mod selector;

pub use connect_plan::ConnectPlan;
pub use database::RouteDatabase;
pub use finder::ExchangeFinder;
pub use plan::Plan;
pub use planner::RoutePlanner;
pub use selector::RouteSelector;

use std::net::SocketAddr;

use super::address::Address;

/// `{Address, resolved InetSocketAddress}` (SPEC_FULL.md §3 "Route"). A route
/// requires a CONNECT tunnel iff the proxy is HTTP and the address uses TLS.
#[derive(Clone, Debug)]
pub struct Route {
    pub address: Address,
    pub socket_addr: SocketAddr,
    pub proxy: Option<std::sync::Arc<super::address::ProxyTarget>>,
    /// Pre-resolved `Proxy-Authorization` header value for the CONNECT
    /// tunnel, mirrored out of `proxy.basic_auth` so `connect_plan::tunnel`
    /// doesn't need to match on `proxy` itself.
    pub proxy_auth: Option<http::HeaderValue>,
}

impl Route {
    /// An HTTP proxy in front of an HTTPS destination needs a CONNECT
    /// tunnel; HTTP-through-HTTP-proxy is forwarded in absolute-form
    /// instead (SPEC_FULL.md §4.3/§4.5).
    pub fn requires_tunnel(&self) -> bool {
        matches!(
            self.proxy.as_deref(),
            Some(super::address::ProxyTarget {
                kind: super::address::ProxyKind::Http,
                ..
            })
        ) && self.address.is_https()
    }

    /// A SOCKS proxy negotiates the destination by protocol handshake
    /// rather than an HTTP CONNECT tunnel, regardless of whether the
    /// destination itself is TLS.
    pub fn requires_socks(&self) -> bool {
        self.proxy.as_deref().is_some_and(|p| p.kind.is_socks())
    }

    #[cfg(test)]
    pub(crate) fn test_fixture() -> Route {
        use http::uri::{Authority, Scheme};

        Route {
            address: Address {
                scheme: Scheme::HTTPS,
                host: Authority::from_static("example.com"),
                port: 443,
                dns: std::sync::Arc::new(crate::dns::GaiResolver::new()),
                tls: true,
                tls_config: None,
                connect_options: Default::default(),
                proxy: None,
            },
            socket_addr: "127.0.0.1:443".parse().unwrap(),
            proxy: None,
            proxy_auth: None,
        }
    }
}

impl PartialEq for Route {
    fn eq(&self, other: &Self) -> bool {
        self.socket_addr == other.socket_addr && self.address.equals_non_host(&other.address)
    }
}
