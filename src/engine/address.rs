//! Target address and low-level TCP connect options.
//!
//! `TcpConnectOptions` carries the same interface-binding and local-address
//! knobs that `connect.rs`'s `Connector` threads into a `hyper_util`
//! `HttpConnector` (`local_addr_v4`/`local_addr_v6`/`interface`). `Address`
//! itself is new: elsewhere proxies and DNS are resolved inline inside
//! `Connector::call`; the route planner needs them split out as a
//! first-class, comparable value (§3 "Address").

use std::{
    net::{Ipv4Addr, Ipv6Addr},
    sync::Arc,
};

use http::{HeaderMap, Uri, header::HeaderValue, uri::{Authority, Scheme}};

use crate::dns::Resolve;

/// Which proxy protocol a [`ProxyTarget`] speaks, carried separately from
/// the user-facing `crate::proxy::Proxy` builder since the connect plan
/// only needs the resolved URI, auth, and protocol kind (SPEC_FULL.md §4.3
/// "pass the hostname unresolved to a SOCKS proxy").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyKind {
    Http,
    Socks4,
    Socks4a,
    Socks5,
    Socks5h,
}

impl ProxyKind {
    pub fn from_scheme(scheme: &str) -> Option<ProxyKind> {
        match scheme {
            "http" | "https" => Some(ProxyKind::Http),
            "socks4" => Some(ProxyKind::Socks4),
            "socks4a" => Some(ProxyKind::Socks4a),
            "socks5" => Some(ProxyKind::Socks5),
            "socks5h" => Some(ProxyKind::Socks5h),
            _ => None,
        }
    }

    pub fn is_socks(self) -> bool {
        !matches!(self, ProxyKind::Http)
    }
}

/// A resolved proxy a [`Route`](super::route::Route) dials through:
/// the proxy's own URI (dialed in place of the destination), its protocol
/// kind, and whatever auth the matcher attached.
#[derive(Debug, Clone)]
pub struct ProxyTarget {
    pub uri: Uri,
    pub kind: ProxyKind,
    pub basic_auth: Option<HeaderValue>,
    pub custom_headers: Option<HeaderMap>,
    #[cfg(feature = "socks")]
    pub raw_auth: Option<(bytes::Bytes, bytes::Bytes)>,
}

/// Options for configuring a TCP network connection: interface binding and
/// local source address selection.
///
/// Platform-specific behavior is handled internally, with the interface
/// binding mechanism differing across Unix-like systems:
/// - Linux/Android/Fuchsia: `SO_BINDTODEVICE`.
/// - macOS/iOS/tvOS/watchOS/visionOS/illumos/Solaris: `IP_BOUND_IF`.
#[derive(Debug, Clone, Hash, PartialEq, Eq, Default)]
pub struct TcpConnectOptions {
    #[cfg(any(target_os = "android", target_os = "fuchsia", target_os = "linux"))]
    pub(crate) interface: Option<std::borrow::Cow<'static, str>>,
    #[cfg(any(
        target_os = "illumos",
        target_os = "ios",
        target_os = "macos",
        target_os = "solaris",
        target_os = "tvos",
        target_os = "visionos",
        target_os = "watchos",
    ))]
    pub(crate) interface: Option<std::ffi::CString>,
    pub(crate) local_ipv4: Option<Ipv4Addr>,
    pub(crate) local_ipv6: Option<Ipv6Addr>,
}

impl TcpConnectOptions {
    /// Sets the name of the network interface to bind the socket to.
    #[cfg(any(
        target_os = "android",
        target_os = "fuchsia",
        target_os = "illumos",
        target_os = "ios",
        target_os = "linux",
        target_os = "macos",
        target_os = "solaris",
        target_os = "tvos",
        target_os = "visionos",
        target_os = "watchos",
    ))]
    #[inline]
    pub fn set_interface<S>(&mut self, interface: S) -> &mut Self
    where
        S: Into<Option<std::borrow::Cow<'static, str>>>,
    {
        #[cfg(any(target_os = "android", target_os = "fuchsia", target_os = "linux"))]
        {
            self.interface = interface.into();
        }

        #[cfg(not(any(target_os = "android", target_os = "fuchsia", target_os = "linux")))]
        {
            self.interface = interface
                .into()
                .and_then(|iface| std::ffi::CString::new(iface.into_owned()).ok());
        }

        self
    }

    /// Sets the local address the socket will bind to before connecting.
    #[inline]
    pub fn set_local_address(&mut self, local_addr: Option<std::net::IpAddr>) {
        match local_addr {
            Some(std::net::IpAddr::V4(a)) => self.local_ipv4 = Some(a),
            Some(std::net::IpAddr::V6(a)) => self.local_ipv6 = Some(a),
            _ => {}
        };
    }

    /// Sets both local IPv4 and IPv6 addresses explicitly.
    #[inline]
    pub fn set_local_addresses(
        &mut self,
        local_ipv4: Option<Ipv4Addr>,
        local_ipv6: Option<Ipv6Addr>,
    ) {
        self.local_ipv4 = local_ipv4;
        self.local_ipv6 = local_ipv6;
    }
}

/// A planned target: `{scheme, host, port, DNS, TLS, proxy}` (SPEC_FULL.md
/// §3 "Address"). Two addresses are equal iff every **non-host** field and
/// the port match — the host only participates in URL equality. This is
/// what makes HTTP/2 coalescing (§3, §4.4) possible: two different hostnames
/// sharing `equals_non_host` plus a shared resolved IP plus certificate
/// coverage may share one connection.
#[derive(Clone)]
pub struct Address {
    pub scheme: Scheme,
    pub host: Authority,
    pub port: u16,
    pub dns: Arc<dyn Resolve>,
    pub tls: bool,
    pub tls_config: Option<Arc<rustls::ClientConfig>>,
    pub connect_options: TcpConnectOptions,
    pub proxy: Option<Arc<ProxyTarget>>,
}

impl Address {
    pub fn is_https(&self) -> bool {
        self.tls
    }

    /// Compares every field except `host` (and, trivially, `dns`/`proxy`
    /// identity, which the caller is expected to have already normalized to
    /// the same `Arc` when addresses are meant to be coalescing-eligible).
    pub fn equals_non_host(&self, other: &Address) -> bool {
        self.scheme == other.scheme
            && self.port == other.port
            && self.tls == other.tls
            && self.connect_options == other.connect_options
            && Arc::ptr_eq(&self.dns, &other.dns)
            && match (&self.proxy, &other.proxy) {
                (None, None) => true,
                (Some(a), Some(b)) => Arc::ptr_eq(a, b),
                _ => false,
            }
    }
}

impl std::fmt::Debug for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Address")
            .field("scheme", &self.scheme)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("tls", &self.tls)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::GaiResolver;

    fn addr(host: &str) -> Address {
        Address {
            scheme: Scheme::HTTPS,
            host: host.parse().unwrap(),
            port: 443,
            dns: Arc::new(GaiResolver::new()),
            tls: true,
            tls_config: None,
            connect_options: TcpConnectOptions::default(),
            proxy: None,
        }
    }

    #[test]
    fn equals_non_host_ignores_hostname() {
        let a = addr("a.example.com");
        let b = addr("b.example.com");
        // different `dns` Arc instances -> not coalescing-eligible by identity
        assert!(!a.equals_non_host(&b));

        let dns: Arc<dyn Resolve> = Arc::new(GaiResolver::new());
        let mut a2 = addr("a.example.com");
        let mut b2 = addr("b.example.com");
        a2.dns = dns.clone();
        b2.dns = dns;
        assert!(a2.equals_non_host(&b2));
    }

    #[test]
    fn differing_port_breaks_equality() {
        let a = addr("a.example.com");
        let mut b = addr("a.example.com");
        b.port = 8443;
        assert!(!a.equals_non_host(&b));
    }
}
