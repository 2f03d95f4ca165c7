//! Ambient observation hook for the engine.
//!
//! The teacher only exposes connect/TLS timing through `Connected` extras and
//! scattered `log::trace!` lines in `connect.rs`'s `verbose` module. This
//! gives the engine first-class hook points instead, mirroring the way the
//! teacher threads its `verbose::Wrapper` through `Connector`/`Conn`: a cheap
//! `Clone` handle carried down into every layer, invoked outside of any lock.

use std::{fmt, net::SocketAddr, sync::Arc, time::Duration};

use http::Uri;

use crate::error::BoxError;

/// Observes the lifecycle of a call, its connections, and its exchanges.
///
/// All methods have no-op default bodies, so implementors only override the
/// events they care about. Every method is called outside of any engine
/// lock; implementations must not block for long or acquire engine locks
/// themselves.
pub trait EventListener: Send + Sync + fmt::Debug + 'static {
    /// A call is about to begin route/connection planning.
    fn call_start(&self, _uri: &Uri) {}

    /// DNS resolution for `domain` is starting.
    fn dns_start(&self, _domain: &str) {}

    /// DNS resolution finished, successfully or not.
    fn dns_end(&self, _domain: &str, _result: Result<&[SocketAddr], &BoxError>) {}

    /// A TCP connect attempt to `addr` is starting.
    fn connect_start(&self, _addr: SocketAddr) {}

    /// A TCP connect attempt finished.
    fn connect_end(&self, _addr: SocketAddr, _result: Result<(), &BoxError>) {}

    /// A TLS handshake is starting.
    fn tls_start(&self) {}

    /// A TLS handshake finished; `alpn` is the negotiated protocol, if any.
    fn tls_end(&self, _alpn: Option<&str>, _result: Result<(), &BoxError>) {}

    /// A connection was taken from, or added to, the pool for reuse.
    fn connection_acquired(&self, _reused: bool) {}

    /// A connection was released back to the pool or closed.
    fn connection_released(&self) {}

    /// The first byte of the request body is about to be written.
    fn request_body_start(&self) {}

    /// The request body finished writing `bytes` total.
    fn request_body_end(&self, _bytes: u64) {}

    /// The first byte of the response headers arrived.
    fn response_headers_start(&self) {}

    /// Response headers finished parsing.
    fn response_headers_end(&self, _status: u16) {}

    /// The first byte of the response body arrived.
    fn response_body_start(&self) {}

    /// The response body finished reading `bytes` total.
    fn response_body_end(&self, _bytes: u64) {}

    /// A retry-able failure was recorded against a connection or exchange.
    fn track_failure(&self, _err: &BoxError) {}

    /// The call finished successfully.
    fn call_end(&self, _total: Duration) {}

    /// The call finished with an error (including cancellation).
    fn call_failed(&self, _err: &BoxError) {}

    /// A response was served, wholly or partly, from the disk cache.
    fn cache_hit(&self, _uri: &Uri) {}

    /// A response was written to the disk cache.
    fn cache_store(&self, _uri: &Uri) {}

    /// A conditional request resulted in a 304 and the cached entry was
    /// refreshed and reused.
    fn cache_conditional_hit(&self, _uri: &Uri) {}
}

/// The default, silent [`EventListener`].
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventListener;

impl EventListener for NoopEventListener {}

/// A cheaply-cloneable handle to a shared [`EventListener`].
///
/// This is what is actually threaded through the engine — equivalent to the
/// teacher's `verbose::Wrapper(bool)`, but carrying a full trait object
/// instead of a single flag.
#[derive(Clone)]
pub struct Listener(Arc<dyn EventListener>);

impl Listener {
    pub fn new<L: EventListener>(listener: L) -> Self {
        Listener(Arc::new(listener))
    }

    pub fn noop() -> Self {
        Listener(Arc::new(NoopEventListener))
    }
}

impl Default for Listener {
    fn default() -> Self {
        Listener::noop()
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl std::ops::Deref for Listener {
    type Target = dyn EventListener;

    fn deref(&self) -> &Self::Target {
        &*self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_listener_is_inert() {
        let l = Listener::noop();
        l.call_start(&"https://example.com/".parse().unwrap());
        l.connect_start("127.0.0.1:443".parse().unwrap());
    }

    #[derive(Debug, Default)]
    struct Counting(std::sync::atomic::AtomicUsize);

    impl EventListener for Counting {
        fn call_end(&self, _total: Duration) {
            self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }
    }

    #[test]
    fn custom_listener_is_invoked() {
        let counting = Arc::new(Counting::default());
        let l = Listener::new(CountingRef(counting.clone()));
        l.call_end(Duration::from_secs(1));
        assert_eq!(counting.0.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[derive(Debug)]
    struct CountingRef(Arc<Counting>);

    impl EventListener for CountingRef {
        fn call_end(&self, total: Duration) {
            self.0.call_end(total)
        }
    }
}
