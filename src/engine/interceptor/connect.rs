//! Connect interceptor: turns the request's target URI into a live
//! connection (SPEC_FULL.md §3 "ConnectPlan"/"ExchangeFinder", §4.4, §4.5).
//!
//! Grounded in the teacher's `src/connect.rs` `Connector` for *what* has to
//! happen before a request can be written (DNS, TCP, optional CONNECT
//! tunnel, TLS, ALPN) and in `hyper_util::client::legacy::PoolClient` for
//! *how* a freshly-negotiated handle gets turned into something a later
//! stage can keep sending requests through — except here that's
//! `engine::connection::Connection::send_request` instead of a `tower`
//! `Service`, since the pool itself (`engine::pool::ConnectionPool`) is the
//! engine's own, not `hyper-util`'s.

use std::{sync::Arc, time::Duration};

use hyper_util::rt::{TokioExecutor, TokioIo};

use crate::{
    dns::Resolve,
    engine::{
        address::{Address, ProxyKind, ProxyTarget},
        connection::{Connection, Protocol, Sender},
        exchange::Exchange,
        pool::ConnectionPool,
        route::{
            ConnectPlan, Plan, PlanStream, Route, RouteDatabase, RoutePlanner,
            finder::{ExchangeFinder, Strategy},
        },
    },
    error::BoxError,
    proxy::Intercepted,
};

use super::{BoxFuture, Chain, Interceptor, ReqBody, ResBody};

/// Resolves a [`Plan`] into a pooled [`Connection`] and attaches it to the
/// call before handing the request down to the remaining stages.
pub struct ConnectInterceptor {
    pool: Arc<ConnectionPool>,
    database: Arc<RouteDatabase>,
    dns: Arc<dyn Resolve>,
    tls_config: Arc<rustls::ClientConfig>,
    fast_fallback: bool,
    connect_timeout: Option<Duration>,
    /// Client-wide proxies, tried in configuration order. Mirrors the
    /// teacher's `ClientInner::proxies`/`proxy_auth` "first match wins"
    /// semantics, generalized to the route planner's `Matcher` type.
    default_proxy_matchers: Vec<crate::proxy::Matcher>,
}

impl std::fmt::Debug for ConnectInterceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectInterceptor").finish_non_exhaustive()
    }
}

impl ConnectInterceptor {
    pub fn new(
        pool: Arc<ConnectionPool>,
        database: Arc<RouteDatabase>,
        dns: Arc<dyn Resolve>,
        tls_config: Arc<rustls::ClientConfig>,
        fast_fallback: bool,
        connect_timeout: Option<Duration>,
        default_proxy_matchers: Vec<crate::proxy::Matcher>,
    ) -> Self {
        ConnectInterceptor {
            pool,
            database,
            dns,
            tls_config,
            fast_fallback,
            connect_timeout,
            default_proxy_matchers,
        }
    }

    /// The proxy that intercepts `uri` for this request: a per-request
    /// override stored in `RequestLayerOptions` replaces the client-wide
    /// proxies entirely (matching or not); otherwise the first
    /// client-configured proxy that intercepts `uri` wins.
    fn intercept_for(
        &self,
        request: &http::Request<ReqBody>,
        uri: &http::Uri,
    ) -> Option<crate::proxy::Intercepted> {
        let override_matcher = crate::config::RequestConfig::<crate::config::RequestLayerOptions>::get(
            request.extensions(),
        )
        .and_then(|opts| opts.proxy_matcher());
        if let Some(matcher) = override_matcher {
            return matcher.intercept(uri);
        }
        self.default_proxy_matchers
            .iter()
            .find_map(|m| m.intercept(uri))
    }

    /// Translates the per-request `RequestLayerOptions::tcp_connect_opts`
    /// override (set via `RequestBuilder::local_address`/`local_addresses`/
    /// `interface`) into the engine-level options the connect plan actually
    /// dials with.
    fn connect_options_for(&self, request: &http::Request<ReqBody>) -> crate::engine::address::TcpConnectOptions {
        let mut opts = crate::engine::address::TcpConnectOptions::default();
        let Some(layer_opts) =
            crate::config::RequestConfig::<crate::config::RequestLayerOptions>::get(request.extensions())
        else {
            return opts;
        };
        let tcp = layer_opts.tcp_connect_opts();
        opts.set_local_addresses(tcp.local_address_ipv4(), tcp.local_address_ipv6());
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
        if let Some(interface) = tcp.interface() {
            opts.set_interface(std::borrow::Cow::Owned(interface.to_owned()));
        }
        opts
    }

    /// Builds the [`Address`] a request targets, including the proxy (if
    /// any) the configured matcher intercepts it to (SPEC_FULL.md §4.3).
    fn address_for(&self, request: &http::Request<ReqBody>) -> Result<Address, BoxError> {
        let uri = request.uri();
        let scheme = uri.scheme().cloned().ok_or("request URI has no scheme")?;
        let tls = scheme == http::uri::Scheme::HTTPS;
        let host = uri.authority().cloned().ok_or("request URI has no host")?;
        let port = uri.port_u16().unwrap_or(if tls { 443 } else { 80 });

        let proxy = match self.intercept_for(request, uri) {
            Some(Intercepted::Proxy(intercept)) => {
                let kind = ProxyKind::from_scheme(intercept.uri().scheme_str().unwrap_or("http"))
                    .ok_or("unrecognized proxy scheme")?;
                Some(Arc::new(ProxyTarget {
                    uri: intercept.uri().clone(),
                    kind,
                    basic_auth: intercept.basic_auth().cloned(),
                    custom_headers: intercept.custom_headers().cloned(),
                    #[cfg(feature = "socks")]
                    raw_auth: intercept.raw_auth(),
                }))
            }
            #[cfg(unix)]
            Some(Intercepted::Unix(_)) => {
                return Err("unix-socket proxies are not yet supported by the connect plan".into());
            }
            None => None,
        };

        Ok(Address {
            scheme,
            host,
            port,
            dns: self.dns.clone(),
            tls,
            tls_config: tls.then(|| self.tls_config.clone()),
            connect_options: self.connect_options_for(request),
            proxy,
        })
    }

    /// Runs a [`ConnectPlan`] (plus any sibling routes the selector batched
    /// alongside it) through the exchange finder, builds the wire handshake,
    /// and returns a pooled, wired-up [`Connection`].
    ///
    /// When `fast_fallback` is enabled and `extra_routes` is non-empty, the
    /// finder races every route at once with staggered 250 ms launches
    /// (SPEC_FULL.md §4.6 scenario S4) rather than being handed one route
    /// per call. Routes the race didn't get to launch are pushed back onto
    /// `planner`'s deferred queue so they're tried before the selector is
    /// consulted again.
    async fn establish(
        &self,
        connect_plan: ConnectPlan,
        extra_routes: Vec<Route>,
        planner: &RoutePlanner,
        listener: crate::engine::listener::Listener,
    ) -> Result<Arc<Connection>, BoxError> {
        let strategy = if self.fast_fallback {
            Strategy::FastFallback
        } else {
            Strategy::Sequential
        };
        let finder = ExchangeFinder::new(strategy, self.connect_timeout, listener);
        let mut routes = vec![connect_plan.route.clone()];
        routes.extend(extra_routes);
        let attempted_addrs: Vec<_> = routes.iter().map(|r| r.socket_addr).collect();

        let (connected, deferred) = match finder.find(routes).await {
            Ok(ok) => ok,
            Err(err) => {
                for addr in attempted_addrs {
                    self.database.failed(addr);
                }
                return Err(err);
            }
        };
        for route in deferred {
            planner.defer_back(route);
        }
        self.database.connected(connected.route.socket_addr);

        let allocation_limit_hint = match connected.info.protocol {
            Protocol::Http1 => 1,
            Protocol::Http2 => u32::MAX,
        };

        let sender = match connected.stream {
            PlanStream::Plain(tcp) => handshake(TokioIo::new(tcp), connected.info.protocol).await?,
            PlanStream::Tls(tls) => handshake(TokioIo::new(*tls), connected.info.protocol).await?,
        };

        let conn = Connection::new(connected.route, connected.info, allocation_limit_hint);
        conn.set_sender(sender);
        Ok(conn)
    }
}

/// Drives the HTTP/1 or HTTP/2 handshake over an already-connected I/O
/// stream, spawning its background connection-driver task, and returns the
/// handle requests get sent through.
async fn handshake<T>(io: T, protocol: Protocol) -> Result<Sender, BoxError>
where
    T: hyper::rt::Read + hyper::rt::Write + Unpin + Send + 'static,
{
    match protocol {
        Protocol::Http1 => {
            let (sender, conn) = hyper::client::conn::http1::handshake(io)
                .await
                .map_err(|e| Box::new(e) as BoxError)?;
            tokio::spawn(async move {
                if let Err(err) = conn.await {
                    log::debug!("http/1 connection driver exited: {err}");
                }
            });
            Ok(Sender::Http1(sender))
        }
        Protocol::Http2 => {
            let (sender, conn) = hyper::client::conn::http2::handshake(TokioExecutor::new(), io)
                .await
                .map_err(|e| Box::new(e) as BoxError)?;
            tokio::spawn(async move {
                if let Err(err) = conn.await {
                    log::debug!("http/2 connection driver exited: {err}");
                }
            });
            Ok(Sender::Http2(sender))
        }
    }
}

impl Interceptor for ConnectInterceptor {
    fn intercept<'a>(
        &'a self,
        chain: Chain<'a>,
        request: http::Request<ReqBody>,
    ) -> BoxFuture<'a, Result<http::Response<ResBody>, BoxError>> {
        Box::pin(async move {
            let ctx = chain.ctx.clone();

            if let Some(conn) = ctx.call.attached_connection() {
                if conn.has_capacity() {
                    return chain.proceed(request).await;
                }
                ctx.call.detach_connection();
            }

            let address = self.address_for(&request)?;
            let planner = RoutePlanner::new(address, self.pool.clone(), self.database.clone(), ctx.listener.clone(), self.fast_fallback);

            let (conn, reused) = loop {
                let plan = planner.plan().await.map_err(|e| Box::new(e) as BoxError)?;
                match plan {
                    Plan::Reuse(conn) => break (conn, true),
                    Plan::Connect(connect_plan, extra_routes) => {
                        match self
                            .establish(connect_plan, extra_routes, &planner, ctx.listener.clone())
                            .await
                        {
                            Ok(conn) => {
                                self.pool.put(conn.clone());
                                break (conn, false);
                            }
                            Err(err) => {
                                if planner.has_next() {
                                    continue;
                                }
                                return Err(err);
                            }
                        }
                    }
                }
            };

            ctx.listener.connection_acquired(reused);

            let exchange = Exchange::new(ctx.listener.clone(), false);
            conn.acquire(exchange.weak_token());
            ctx.set_exchange(exchange);
            ctx.call.attach_connection(conn);

            chain.proceed(request).await
        })
    }
}
