//! The public [`Client`]/[`ClientBuilder`] entry point.
//!
//! Grounded in the teacher's own `src/client/http.rs`: a cheap, cloneable
//! `Client` wrapping an `Arc`-shared inner, a `ClientBuilder` that assembles
//! a `tower::Service` stack and then erases it behind
//! `tower::util::BoxCloneSyncService` so `Client`'s own type doesn't leak
//! every middleware's concrete type. The split here is two-layered instead
//! of the teacher's single stack: an inner [`EngineService`] adapts this
//! crate's own (non-`tower`) interceptor [`Chain`](crate::engine::interceptor::Chain)
//! — dispatcher admission, route planning, pooling, caching — into a
//! `tower_service::Service`, and an outer stack of ordinary `tower` layers
//! (timeout, retry, decompression, cookies) wraps that adapter exactly the
//! way the teacher wraps its own connector service.
use std::{
    fmt,
    future::Future,
    path::PathBuf,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};

use bytes::Bytes;
use http::{HeaderMap, Method, Uri};
use tower::{Layer, util::BoxCloneSyncService};
use tower_service::Service;

use crate::{
    client::{
        Body, Request, RequestBuilder, Response,
        body::{self, ResponseBody},
        middleware::timeout::TimeoutLayer,
    },
    config::{RequestConfig, RequestDefaultHeaders},
    cookie::CookieStore,
    dns::Resolve,
    engine::{
        call::Call,
        cache::ResponseCache,
        dispatcher::{AsyncCall, CallId, Dispatcher},
        interceptor::{
            CallContext, Interceptor, bridge::BridgeInterceptor, cache::CacheInterceptor,
            call_server::CallServerInterceptor, connect::ConnectInterceptor, execute,
            retry_followup::{Authenticator, RetryFollowUpInterceptor},
        },
        listener::{EventListener, Listener},
        pool::ConnectionPool,
        route::RouteDatabase,
    },
    error::{BoxError, Error},
    proxy::Proxy,
    redirect,
    retry,
};

#[cfg(any(feature = "gzip", feature = "brotli", feature = "zstd", feature = "deflate"))]
use crate::client::middleware::decoder::{AcceptEncoding, DecompressionLayer};
#[cfg(feature = "cookies")]
use crate::client::middleware::cookie::CookieManagerLayer;

/// The request/response shape every stage of the outer `tower` stack agrees
/// on before erasure.
type BoxedStack = BoxCloneSyncService<http::Request<Body>, http::Response<ResponseBody>, BoxError>;

/// An HTTP/1.1 and HTTP/2 client.
///
/// Cheap to clone: every clone shares the same dispatcher, connection pool,
/// route database, and (if configured) disk cache, matching the way a
/// single OkHttp `OkHttpClient` is meant to be reused across many calls
/// rather than built fresh per request.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientRef>,
}

struct ClientRef {
    stack: BoxedStack,
    default_headers: HeaderMap,
}

impl Default for Client {
    fn default() -> Self {
        Client::new()
    }
}

impl Client {
    /// Creates a `Client` with default settings.
    ///
    /// # Panics
    ///
    /// Panics if the default TLS backend can't be initialized. Use
    /// [`ClientBuilder::build`] to handle that failure as an error instead.
    pub fn new() -> Client {
        ClientBuilder::new()
            .build()
            .expect("Client::new: default configuration should always build")
    }

    /// Starts building a `Client` with non-default configuration.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Starts a `GET` request to `uri`.
    pub fn get<U: crate::IntoUrl>(&self, uri: U) -> RequestBuilder {
        self.request(Method::GET, uri)
    }

    /// Starts a `POST` request to `uri`.
    pub fn post<U: crate::IntoUrl>(&self, uri: U) -> RequestBuilder {
        self.request(Method::POST, uri)
    }

    /// Starts a `PUT` request to `uri`.
    pub fn put<U: crate::IntoUrl>(&self, uri: U) -> RequestBuilder {
        self.request(Method::PUT, uri)
    }

    /// Starts a `PATCH` request to `uri`.
    pub fn patch<U: crate::IntoUrl>(&self, uri: U) -> RequestBuilder {
        self.request(Method::PATCH, uri)
    }

    /// Starts a `DELETE` request to `uri`.
    pub fn delete<U: crate::IntoUrl>(&self, uri: U) -> RequestBuilder {
        self.request(Method::DELETE, uri)
    }

    /// Starts a `HEAD` request to `uri`.
    pub fn head<U: crate::IntoUrl>(&self, uri: U) -> RequestBuilder {
        self.request(Method::HEAD, uri)
    }

    /// Starts a request with an arbitrary method.
    pub fn request<U: crate::IntoUrl>(&self, method: Method, url: U) -> RequestBuilder {
        let req = url.into_url().and_then(|url| {
            Uri::try_from(url.as_str())
                .map(|uri| Request::new(method, uri))
                .map_err(Error::builder)
        });
        RequestBuilder::new(self.clone(), req)
    }

    /// Executes a `Request`, returning the final `Response` once it arrives.
    pub fn execute(&self, request: Request) -> Pending {
        let default_headers = self.inner.default_headers.clone();
        let mut req: http::Request<Body> = request.into();

        let merge_defaults = RequestConfig::<RequestDefaultHeaders>::get(req.extensions())
            .copied()
            .unwrap_or(true);
        if merge_defaults {
            for (name, value) in default_headers.iter() {
                if !req.headers().contains_key(name) {
                    req.headers_mut().insert(name, value.clone());
                }
            }
        }

        let uri = req.uri().clone();
        let mut stack = self.inner.stack.clone();
        let fut = Box::pin(async move {
            std::future::poll_fn(|cx| stack.poll_ready(cx)).await.map_err(|e| into_error(e, &uri))?;
            let res = stack.call(req).await.map_err(|e| into_error(e, &uri))?;
            Ok(Response::new(res, uri))
        });
        Pending { inner: PendingInner::Request(fut) }
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client").finish_non_exhaustive()
    }
}

fn into_error(err: BoxError, uri: &Uri) -> Error {
    match err.downcast::<Error>() {
        Ok(e) => *e,
        Err(other) => Error::request(other).with_uri(uri.clone()),
    }
}

/// A future returned by [`Client::execute`]/[`RequestBuilder::send`].
pub struct Pending {
    inner: PendingInner,
}

enum PendingInner {
    Request(Pin<Box<dyn Future<Output = crate::Result<Response>> + Send>>),
    Error(Option<Error>),
}

impl Pending {
    pub(crate) fn error(err: Error) -> Pending {
        Pending { inner: PendingInner::Error(Some(err)) }
    }
}

impl Future for Pending {
    type Output = crate::Result<Response>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().inner {
            PendingInner::Request(fut) => fut.as_mut().poll(cx),
            PendingInner::Error(err) => Poll::Ready(Err(err.take().expect("Pending polled after completion"))),
        }
    }
}

impl fmt::Debug for Pending {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad("Pending")
    }
}

/// Adapts the engine's own interceptor [`Chain`](crate::engine::interceptor::Chain)
/// into a `tower_service::Service`, gated by the [`Dispatcher`]'s admission
/// control (SPEC_FULL.md §3 "Dispatcher").
#[derive(Clone)]
struct EngineService {
    interceptors: Arc<Vec<Arc<dyn Interceptor>>>,
    dispatcher: Arc<Dispatcher>,
    listener: Listener,
}

impl fmt::Debug for EngineService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineService").finish_non_exhaustive()
    }
}

impl Service<http::Request<Body>> for EngineService {
    type Response = http::Response<ResponseBody>;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        // Admission control happens per-call inside the dispatcher, not here:
        // the dispatcher queues calls past its concurrency caps rather than
        // blocking `poll_ready`.
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: http::Request<Body>) -> Self::Future {
        let interceptors = self.interceptors.clone();
        let dispatcher = self.dispatcher.clone();
        let listener = self.listener.clone();
        let host = request.uri().host().unwrap_or_default().to_owned();

        Box::pin(async move {
            let call = Call::new(listener.clone());
            call.start_executing()
                .map_err(|e| Box::new(e) as BoxError)?;
            call.begin_exchange(false);

            let ctx = CallContext::new(call.clone(), listener);
            let (tx, rx) = tokio::sync::oneshot::channel();
            let tx = Arc::new(crate::sync::Mutex::new(Some(tx)));

            let run_tx = tx.clone();
            let run_interceptors = interceptors.clone();
            let run_ctx = ctx.clone();
            let run = async move {
                let result = execute(&run_interceptors, run_ctx, request).await;
                if let Some(tx) = run_tx.lock().take() {
                    let _ = tx.send(result);
                }
            };

            let reject_tx = tx;
            let reject = move || {
                if let Some(tx) = reject_tx.lock().take() {
                    let _ = tx.send(Err("call rejected: dispatcher is shut down".into()));
                }
            };

            let _id: CallId = dispatcher.enqueue(&host, AsyncCall::new(host.clone(), run, reject));

            let result = rx
                .await
                .unwrap_or_else(|_| Err("call dropped before it produced a response".into()));

            match result {
                Ok(response) => {
                    let (parts, response_body) = response.into_parts();
                    let body = body::boxed(FinalizingBody::new(response_body, call));
                    Ok(http::Response::from_parts(parts, body))
                }
                Err(err) => {
                    call.call_done(Some(&err));
                    Err(err)
                }
            }
        })
    }
}

pin_project_lite::pin_project! {
    /// Finalizes the owning [`Call`] when the response body reaches its last
    /// frame. `call_server.rs` documents that releasing the connection's
    /// exchange slot is "driven by whoever finishes consuming the response
    /// body" — this is that consumer. A body that is dropped before being
    /// fully read never finalizes the call; callers are expected to drain
    /// responses, matching this crate's lack of a half-read cancellation API.
    struct FinalizingBody<B> {
        #[pin]
        inner: B,
        call: Option<Arc<Call>>,
    }
}

impl<B> FinalizingBody<B> {
    fn new(inner: B, call: Arc<Call>) -> Self {
        FinalizingBody { inner, call: Some(call) }
    }
}

impl<B> http_body::Body for FinalizingBody<B>
where
    B: http_body::Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<http_body::Frame<Bytes>, BoxError>>> {
        let this = self.project();
        match this.inner.poll_frame(cx) {
            Poll::Ready(Some(Err(e))) => {
                let err = e.into();
                if let Some(call) = this.call.take() {
                    call.message_done(true, true, true, true, Some(&err));
                }
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(None) => {
                if let Some(call) = this.call.take() {
                    call.message_done(true, true, true, true, None);
                }
                Poll::Ready(None)
            }
            Poll::Ready(Some(Ok(frame))) => Poll::Ready(Some(Ok(frame))),
            Poll::Pending => Poll::Pending,
        }
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> http_body::SizeHint {
        self.inner.size_hint()
    }
}

/// Re-erases a `tower::Service` stage behind [`BoxCloneSyncService`],
/// boxing its response body along the way. Every optional layer in
/// [`ClientBuilder::build`] is erased right after being added instead of
/// composed into one deeply-nested type: layers like the decompression and
/// timeout middleware each change the response body's concrete type, and
/// some of them only exist under a Cargo feature, so there is no single
/// nested type to name once at the end.
fn erase<S, ResBody>(svc: S) -> BoxedStack
where
    S: Service<http::Request<Body>, Response = http::Response<ResBody>> + Clone + Send + Sync + 'static,
    S::Future: Send + 'static,
    S::Error: Into<BoxError>,
    ResBody: http_body::Body<Data = Bytes> + Send + Sync + 'static,
    ResBody::Error: Into<BoxError>,
{
    BoxCloneSyncService::new(BodyBoxing(svc))
}

#[derive(Clone)]
struct BodyBoxing<S>(S);

impl<S, ResBody> Service<http::Request<Body>> for BodyBoxing<S>
where
    S: Service<http::Request<Body>, Response = http::Response<ResBody>>,
    S::Error: Into<BoxError>,
    S::Future: Send + 'static,
    ResBody: http_body::Body<Data = Bytes> + Send + Sync + 'static,
    ResBody::Error: Into<BoxError>,
{
    type Response = http::Response<ResponseBody>;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.0.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, req: http::Request<Body>) -> Self::Future {
        let fut = self.0.call(req);
        Box::pin(async move {
            let res = fut.await.map_err(Into::into)?;
            let (parts, resp_body) = res.into_parts();
            Ok(http::Response::from_parts(parts, body::boxed(resp_body)))
        })
    }
}

/// Builds a [`Client`].
pub struct ClientBuilder {
    max_requests: usize,
    max_requests_per_host: usize,
    pool_max_idle_connections: usize,
    pool_keep_alive: Duration,
    connect_timeout: Option<Duration>,
    total_timeout: Option<Duration>,
    read_timeout: Option<Duration>,
    fast_fallback: bool,
    follow_redirects: bool,
    redirect_policy: Option<redirect::Policy>,
    authenticator: Option<Arc<dyn Authenticator>>,
    proxy_authenticator: Option<Arc<dyn Authenticator>>,
    proxies: Vec<Proxy>,
    auto_sys_proxy: bool,
    #[cfg(feature = "cookies")]
    cookie_store: Option<Arc<dyn CookieStore>>,
    #[cfg(any(feature = "gzip", feature = "brotli", feature = "zstd", feature = "deflate"))]
    accept_encoding: AcceptEncoding,
    cache: Option<(PathBuf, u64)>,
    retry_policy: retry::Policy,
    default_headers: HeaderMap,
    #[cfg(feature = "hickory-dns")]
    use_hickory_dns: bool,
    network_interceptors: Vec<Arc<dyn Interceptor>>,
    listener: Listener,
}

impl Default for ClientBuilder {
    fn default() -> Self {
        ClientBuilder {
            // SPEC_FULL.md §3 "Dispatcher": default policy knobs.
            max_requests: 64,
            max_requests_per_host: 5,
            // OkHttp's `ConnectionPool` defaults (5 idle, 5 minutes); not
            // pinned to an explicit number in SPEC_FULL.md, see DESIGN.md.
            pool_max_idle_connections: 5,
            pool_keep_alive: Duration::from_secs(5 * 60),
            connect_timeout: None,
            total_timeout: None,
            read_timeout: None,
            fast_fallback: true,
            follow_redirects: true,
            redirect_policy: None,
            authenticator: None,
            proxy_authenticator: None,
            proxies: Vec::new(),
            auto_sys_proxy: true,
            #[cfg(feature = "cookies")]
            cookie_store: None,
            #[cfg(any(feature = "gzip", feature = "brotli", feature = "zstd", feature = "deflate"))]
            accept_encoding: AcceptEncoding::default(),
            cache: None,
            retry_policy: retry::Policy::default(),
            default_headers: HeaderMap::new(),
            #[cfg(feature = "hickory-dns")]
            use_hickory_dns: false,
            network_interceptors: Vec::new(),
            listener: Listener::noop(),
        }
    }
}

impl ClientBuilder {
    /// Creates a new `ClientBuilder` with default configuration.
    pub fn new() -> ClientBuilder {
        ClientBuilder::default()
    }

    /// Caps the number of calls dispatched concurrently across all hosts
    /// (SPEC_FULL.md §3 "Dispatcher", default 64).
    pub fn max_requests(mut self, max: usize) -> ClientBuilder {
        self.max_requests = max;
        self
    }

    /// Caps the number of calls dispatched concurrently to a single host
    /// (SPEC_FULL.md §3 "Dispatcher", default 5).
    pub fn max_requests_per_host(mut self, max: usize) -> ClientBuilder {
        self.max_requests_per_host = max;
        self
    }

    /// The maximum number of idle connections kept per connection pool
    /// (default 5, matching OkHttp).
    pub fn pool_max_idle_per_host(mut self, max: usize) -> ClientBuilder {
        self.pool_max_idle_connections = max;
        self
    }

    /// How long an idle pooled connection is kept before eviction (default
    /// 5 minutes, matching OkHttp).
    pub fn pool_idle_timeout(mut self, timeout: Duration) -> ClientBuilder {
        self.pool_keep_alive = timeout;
        self
    }

    /// Caps how long establishing a connection may take.
    pub fn connect_timeout(mut self, timeout: Duration) -> ClientBuilder {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Caps the total time a call (including redirects/retries) may take.
    pub fn timeout(mut self, timeout: Duration) -> ClientBuilder {
        self.total_timeout = Some(timeout);
        self
    }

    /// Caps how long a single read of the response body may take.
    pub fn read_timeout(mut self, timeout: Duration) -> ClientBuilder {
        self.read_timeout = Some(timeout);
        self
    }

    /// Enables or disables the Happy-Eyeballs-style fast-fallback connect
    /// strategy (SPEC_FULL.md §4.5 "ExchangeFinder", default enabled).
    pub fn fast_fallback(mut self, enabled: bool) -> ClientBuilder {
        self.fast_fallback = enabled;
        self
    }

    /// Whether redirect responses are automatically followed (default
    /// `true`).
    pub fn redirect(mut self, policy: redirect::Policy) -> ClientBuilder {
        self.follow_redirects = true;
        self.redirect_policy = Some(policy);
        self
    }

    /// Disables automatic redirect following.
    pub fn no_redirect(mut self) -> ClientBuilder {
        self.follow_redirects = false;
        self.redirect_policy = None;
        self
    }

    /// Installs an authenticator consulted on `401 Unauthorized` responses.
    pub fn authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> ClientBuilder {
        self.authenticator = Some(authenticator);
        self
    }

    /// Installs an authenticator consulted on `407 Proxy Authentication
    /// Required` responses.
    pub fn proxy_authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> ClientBuilder {
        self.proxy_authenticator = Some(authenticator);
        self
    }

    /// Adds a proxy, tried in the order added (first match wins).
    pub fn proxy(mut self, proxy: Proxy) -> ClientBuilder {
        self.proxies.push(proxy);
        self
    }

    /// Disables honoring system proxy environment variables when no
    /// explicit proxy is configured.
    pub fn no_proxy(mut self) -> ClientBuilder {
        self.auto_sys_proxy = false;
        self
    }

    /// Enables a persistent cookie jar (default disabled).
    #[cfg(feature = "cookies")]
    pub fn cookie_store(mut self, enable: bool) -> ClientBuilder {
        self.cookie_store = enable.then(|| Arc::new(crate::cookie::Jar::default()) as Arc<dyn CookieStore>);
        self
    }

    /// Installs a custom cookie store.
    #[cfg(feature = "cookies")]
    pub fn cookie_provider(mut self, provider: Arc<dyn CookieStore>) -> ClientBuilder {
        self.cookie_store = Some(provider);
        self
    }

    /// Resolves DNS through `hickory-resolver` instead of the system
    /// resolver.
    #[cfg(feature = "hickory-dns")]
    pub fn hickory_dns(mut self, enable: bool) -> ClientBuilder {
        self.use_hickory_dns = enable;
        self
    }

    /// Opens a persistent, disk-backed RFC 7234 response cache at `dir`,
    /// capped at `max_size` bytes (SPEC_FULL.md §4.9/§6 "Disk LRU cache").
    pub fn cache(mut self, dir: impl Into<PathBuf>, max_size: u64) -> ClientBuilder {
        self.cache = Some((dir.into(), max_size));
        self
    }

    /// Replaces the retry policy (SPEC_FULL.md §4.7, default
    /// [`retry::Policy::default`]).
    pub fn retry(mut self, policy: retry::Policy) -> ClientBuilder {
        self.retry_policy = policy;
        self
    }

    /// Sets headers merged into every request that doesn't already set
    /// them.
    pub fn default_headers(mut self, headers: HeaderMap) -> ClientBuilder {
        self.default_headers = headers;
        self
    }

    /// Appends a network interceptor, run after the connect stage and
    /// before the final call-server stage (SPEC_FULL.md §4.7).
    pub fn network_interceptor(mut self, interceptor: Arc<dyn Interceptor>) -> ClientBuilder {
        self.network_interceptors.push(interceptor);
        self
    }

    /// Installs an [`EventListener`] observing connection/call lifecycle
    /// events.
    pub fn event_listener<L: EventListener>(mut self, listener: L) -> ClientBuilder {
        self.listener = Listener::new(listener);
        self
    }

    /// Builds the `Client`.
    pub fn build(self) -> crate::Result<Client> {
        let tls_config = crate::tls::default_tls_config()?;

        #[cfg(feature = "hickory-dns")]
        let dns: Arc<dyn Resolve> = if self.use_hickory_dns {
            Arc::new(crate::dns::HickoryDnsResolver::new())
        } else {
            Arc::new(crate::dns::GaiResolver::new())
        };
        #[cfg(not(feature = "hickory-dns"))]
        let dns: Arc<dyn Resolve> = Arc::new(crate::dns::GaiResolver::new());

        let mut proxy_matchers: Vec<crate::proxy::Matcher> =
            self.proxies.into_iter().map(Proxy::into_matcher).collect();
        if proxy_matchers.is_empty() && self.auto_sys_proxy {
            proxy_matchers.push(crate::proxy::Matcher::system());
        }

        let pool = Arc::new(ConnectionPool::new(self.pool_max_idle_connections, self.pool_keep_alive));
        let database = Arc::new(RouteDatabase::new());
        let dispatcher = Dispatcher::new(self.max_requests, self.max_requests_per_host);

        let cache = match self.cache {
            Some((dir, max_size)) => Some(Arc::new(ResponseCache::open(dir, max_size).map_err(Error::cache)?)),
            None => None,
        };

        let mut retry_followup = RetryFollowUpInterceptor::new(self.follow_redirects);
        if let Some(policy) = self.redirect_policy {
            retry_followup = retry_followup.with_redirect_policy(policy);
        }
        if let Some(authenticator) = self.authenticator {
            retry_followup = retry_followup.with_authenticator(authenticator);
        }
        if let Some(authenticator) = self.proxy_authenticator {
            retry_followup = retry_followup.with_proxy_authenticator(authenticator);
        }

        let mut interceptors: Vec<Arc<dyn Interceptor>> = vec![
            Arc::new(retry_followup),
            Arc::new(BridgeInterceptor::default()),
            Arc::new(CacheInterceptor::new(cache)),
            Arc::new(ConnectInterceptor::new(
                pool,
                database,
                dns,
                tls_config,
                self.fast_fallback,
                self.connect_timeout,
                proxy_matchers,
            )),
        ];
        interceptors.extend(self.network_interceptors);
        interceptors.push(Arc::new(CallServerInterceptor::default()));

        let engine_service = EngineService {
            interceptors: Arc::new(interceptors),
            dispatcher,
            listener: self.listener,
        };

        let mut stack: BoxedStack = erase(engine_service);

        #[cfg(feature = "cookies")]
        {
            stack = erase(CookieManagerLayer::new(self.cookie_store).layer(stack));
        }

        #[cfg(any(feature = "gzip", feature = "brotli", feature = "zstd", feature = "deflate"))]
        {
            stack = erase(DecompressionLayer::new(self.accept_encoding).layer(stack));
        }

        stack = erase(tower::retry::RetryLayer::new(crate::client::layer::retry::RetryPolicy::new(self.retry_policy)).layer(stack));
        stack = erase(TimeoutLayer::new(self.total_timeout, self.read_timeout).layer(stack));

        Ok(Client {
            inner: Arc::new(ClientRef { stack, default_headers: self.default_headers }),
        })
    }
}

impl fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientBuilder").finish_non_exhaustive()
    }
}
