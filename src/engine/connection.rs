//! The live `Connection` record (SPEC_FULL.md §3) and its public-facing
//! `ConnectionInfo` snapshot.
//!
//! Grounded in the teacher's `core::client::connect::HttpInfo` (local/remote
//! socket addresses exposed via `Connected::extra`, referenced from
//! `client/response.rs`) generalized to also carry the negotiated protocol
//! and, for HTTPS, the peer certificate — the engine's `ConnectPlan`
//! (`engine/route/connect_plan.rs`) is the only thing that can observe TLS
//! info, so it is natural for `ConnectionInfo` to carry it end to end instead
//! of bolting it onto `hyper::client::connect::Connected::extra` the way the
//! teacher's BoringSSL-backed `Connector` did.

use std::{
    net::SocketAddr,
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering},
    },
    time::Instant,
};

use crate::{error::BoxError, sync::Mutex};

use super::route::Route;

/// Negotiated application protocol for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Http1,
    Http2,
}

/// The handle a call-server interceptor actually writes a request through.
/// HTTP/1 connections serialize every request on the one handle; HTTP/2
/// handles are cheap to clone, giving each concurrent exchange its own
/// handle onto the same multiplexed connection.
pub enum Sender {
    Http1(hyper::client::conn::http1::SendRequest<crate::client::Body>),
    Http2(hyper::client::conn::http2::SendRequest<crate::client::Body>),
}

impl Sender {
    async fn send_request(
        &mut self,
        req: http::Request<crate::client::Body>,
    ) -> Result<http::Response<hyper::body::Incoming>, BoxError> {
        match self {
            Sender::Http1(s) => s.send_request(req).await.map_err(|e| Box::new(e) as BoxError),
            Sender::Http2(s) => s.send_request(req).await.map_err(|e| Box::new(e) as BoxError),
        }
    }
}

/// Public, cheaply-cloneable snapshot of a connection's metadata, exposed via
/// `Response::extension::<ConnectionInfo>()`.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub local_addr: Option<SocketAddr>,
    pub remote_addr: Option<SocketAddr>,
    pub protocol: Protocol,
    pub reused: bool,
    pub peer_certificate: Option<Vec<u8>>,
    /// Negotiated cipher suite name, e.g. `"TLS13_AES_256_GCM_SHA384"`.
    /// `None` for a plaintext connection.
    pub cipher_suite: Option<String>,
    /// Negotiated TLS protocol version, e.g. `"TLSv1.3"`.
    pub tls_version: Option<String>,
}

/// Opaque identifier for a live call, used to prune dead weak references from
/// a connection's call list (SPEC_FULL.md §4.4 "leak pruning").
pub type CallId = u64;

/// A pooled connection (SPEC_FULL.md §3 "Connection").
///
/// Mutation of the fields behind the mutex requires holding `state`'s lock;
/// per the crate-wide lock order (`dispatcher > pool > connection > call >
/// cache > disk-LRU`) this lock may be taken while holding the pool's lock,
/// but never while holding a call's lock.
pub struct Connection {
    pub route: Route,
    pub info: ConnectionInfo,
    /// `1` for HTTP/1.1; set to the peer's `SETTINGS_MAX_CONCURRENT_STREAMS`
    /// for HTTP/2 and revised on every SETTINGS frame (§3 invariant).
    allocation_limit: AtomicU32,
    active: AtomicUsize,
    state: Mutex<State>,
    idle_since: Mutex<Option<Instant>>,
    no_new_exchanges: AtomicBool,
    no_coalesced_connections: AtomicBool,
    route_failure_count: AtomicU32,
    /// Set once by the connect interceptor right after the handshake
    /// completes. `None` for a `Connection` built only for planning/testing
    /// (e.g. `test_fixture`-backed pool tests that never write to the wire).
    sender: tokio::sync::Mutex<Option<Sender>>,
}

struct State {
    calls: Vec<Weak<()>>,
}

impl Connection {
    pub fn new(route: Route, info: ConnectionInfo, allocation_limit: u32) -> Arc<Self> {
        Arc::new(Connection {
            route,
            info,
            allocation_limit: AtomicU32::new(allocation_limit),
            active: AtomicUsize::new(0),
            state: Mutex::new(State { calls: Vec::new() }),
            idle_since: Mutex::new(Some(Instant::now())),
            no_new_exchanges: AtomicBool::new(false),
            no_coalesced_connections: AtomicBool::new(false),
            route_failure_count: AtomicU32::new(0),
            sender: tokio::sync::Mutex::new(None),
        })
    }

    /// Attaches the transport handle the call-server interceptor sends
    /// requests through. Called exactly once, right after the connect
    /// interceptor finishes the handshake, before the connection is handed
    /// to the pool.
    pub fn set_sender(&self, sender: Sender) {
        *self
            .sender
            .try_lock()
            .expect("set_sender is only ever called once, before the connection is shared") =
            Some(sender);
    }

    /// Sends `req` over this connection's transport handle. HTTP/2 handles
    /// are cloned and the lock released before the send, so concurrent
    /// exchanges on the same connection don't serialize on each other;
    /// HTTP/1 exchanges do serialize, by design, on the one handle.
    pub async fn send_request(
        &self,
        req: http::Request<crate::client::Body>,
    ) -> Result<http::Response<hyper::body::Incoming>, BoxError> {
        let mut guard = self.sender.lock().await;
        match guard.as_mut() {
            Some(Sender::Http2(s)) => {
                let mut handle = Sender::Http2(s.clone());
                drop(guard);
                handle.send_request(req).await
            }
            Some(sender @ Sender::Http1(_)) => sender.send_request(req).await,
            None => Err("connection has no transport sender attached".into()),
        }
    }

    pub fn allocation_limit(&self) -> u32 {
        self.allocation_limit.load(Ordering::Acquire)
    }

    /// Revise the concurrency limit (called when an HTTP/2 SETTINGS frame
    /// updates `MAX_CONCURRENT_STREAMS`). Never shrinks below active calls
    /// silently — callers simply stop admitting new exchanges until
    /// `active()` drops below the new limit.
    pub fn set_allocation_limit(&self, limit: u32) {
        self.allocation_limit.store(limit, Ordering::Release);
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    pub fn is_multiplexed(&self) -> bool {
        matches!(self.info.protocol, Protocol::Http2)
    }

    pub fn no_new_exchanges(&self) -> bool {
        self.no_new_exchanges.load(Ordering::Acquire)
    }

    /// Monotonic: once set, stays set (§3 invariant, I7).
    pub fn mark_no_new_exchanges(&self) {
        self.no_new_exchanges.store(true, Ordering::Release);
    }

    pub fn no_coalesced_connections(&self) -> bool {
        self.no_coalesced_connections.load(Ordering::Acquire)
    }

    pub fn disable_coalescing(&self) {
        self.no_coalesced_connections.store(true, Ordering::Release);
    }

    pub fn route_failure_count(&self) -> u32 {
        self.route_failure_count.load(Ordering::Acquire)
    }

    pub fn bump_route_failure_count(&self) {
        self.route_failure_count.fetch_add(1, Ordering::AcqRel);
    }

    /// `true` iff `active_calls.len < allocation_limit` and no-new-exchanges
    /// has not been set.
    pub fn has_capacity(&self) -> bool {
        !self.no_new_exchanges() && self.active() < self.allocation_limit() as usize
    }

    /// Registers a new exchange's weak handle; the caller decrements
    /// `active` via `release()` when the exchange completes.
    pub fn acquire(&self, call: Weak<()>) {
        let mut state = self.state.lock();
        state.calls.push(call);
        self.active.fetch_add(1, Ordering::AcqRel);
        *self.idle_since.lock() = None;
    }

    /// Releases one exchange. If this was the last active exchange, the
    /// connection becomes idle as of now.
    pub fn release(&self) {
        let prev = self.active.fetch_sub(1, Ordering::AcqRel);
        if prev == 1 {
            *self.idle_since.lock() = Some(Instant::now());
        }
    }

    pub fn idle_since(&self) -> Option<Instant> {
        *self.idle_since.lock()
    }

    /// Prunes dead weak references from the call list, returning how many
    /// were pruned (SPEC_FULL.md §4.4 "leak pruning" — logging is optional,
    /// correctness does not depend on it).
    pub fn prune_dead_calls(&self) -> usize {
        let mut state = self.state.lock();
        let before = state.calls.len();
        state.calls.retain(|w| w.strong_count() > 0);
        before - state.calls.len()
    }

    pub fn call_count(&self) -> usize {
        self.state.lock().calls.len()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("protocol", &self.info.protocol)
            .field("active", &self.active())
            .field("allocation_limit", &self.allocation_limit())
            .field("no_new_exchanges", &self.no_new_exchanges())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::route::Route;
    use std::sync::Arc as StdArc;

    fn dummy_conn(limit: u32) -> Arc<Connection> {
        let route = Route::test_fixture();
        let info = ConnectionInfo {
            local_addr: None,
            remote_addr: None,
            protocol: Protocol::Http2,
            reused: false,
            peer_certificate: None,
            cipher_suite: None,
            tls_version: None,
        };
        Connection::new(route, info, limit)
    }

    #[test]
    fn capacity_respects_allocation_limit() {
        let conn = dummy_conn(2);
        assert!(conn.has_capacity());
        conn.acquire(StdArc::downgrade(&StdArc::new(())));
        conn.acquire(StdArc::downgrade(&StdArc::new(())));
        assert!(!conn.has_capacity());
        conn.release();
        assert!(conn.has_capacity());
    }

    #[test]
    fn no_new_exchanges_is_monotonic() {
        let conn = dummy_conn(10);
        assert!(!conn.no_new_exchanges());
        conn.mark_no_new_exchanges();
        assert!(conn.no_new_exchanges());
        assert!(!conn.has_capacity());
    }

    #[test]
    fn prune_dead_calls_removes_stale_weak_refs() {
        let conn = dummy_conn(10);
        let strong = StdArc::new(());
        conn.acquire(StdArc::downgrade(&strong));
        conn.acquire(StdArc::downgrade(&StdArc::new(())));
        assert_eq!(conn.call_count(), 2);
        let pruned = conn.prune_dead_calls();
        assert_eq!(pruned, 1);
        assert_eq!(conn.call_count(), 1);
    }
}
