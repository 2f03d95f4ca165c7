//! Connection pool: bounded set of idle connections with address-scoped
//! eviction and HTTP/2 coalescing (SPEC_FULL.md §4.4).
//!
//! Grounded in the teacher's locking discipline (`crate::sync::Mutex`, never
//! held across `.await` — see `src/sync.rs`) and in `connect.rs`'s
//! `Connector::set_keepalive`/timeout knobs, generalized from "one connector
//! owns one keepalive duration" to "the pool owns many connections, each
//! individually timed out".

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use http::uri::Authority;

use crate::sync::Mutex;

use super::connection::Connection;

/// Per-address policy enabling preemptive connection warming (SPEC_FULL.md
/// §4.4 "Preemptive opening").
#[derive(Debug, Clone, Copy)]
pub struct AddressPolicy {
    pub min_concurrent_calls: u32,
    pub backoff_delay: Duration,
    pub backoff_jitter: Duration,
}

impl Default for AddressPolicy {
    fn default() -> Self {
        AddressPolicy {
            min_concurrent_calls: 0,
            backoff_delay: Duration::from_secs(1),
            backoff_jitter: Duration::from_millis(100),
        }
    }
}

/// The key connections are grouped by for address-scoped policy lookups:
/// scheme + host + port. Coalescing is decided per-connection by
/// `Address::equals_non_host`, not by this key, so two different
/// `PoolKey`s can still share a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolKey {
    pub host: Authority,
    pub tls: bool,
}

#[derive(Default)]
struct Inner {
    connections: Vec<Arc<Connection>>,
    policies: HashMap<PoolKey, AddressPolicy>,
}

/// The connection pool. One instance is shared by every call made through a
/// `Client`.
pub struct ConnectionPool {
    inner: Mutex<Inner>,
    pub max_idle_connections: usize,
    pub keep_alive: Duration,
}

impl ConnectionPool {
    pub fn new(max_idle_connections: usize, keep_alive: Duration) -> Self {
        ConnectionPool {
            inner: Mutex::new(Inner::default()),
            max_idle_connections,
            keep_alive,
        }
    }

    pub fn set_policy(&self, key: PoolKey, policy: AddressPolicy) {
        self.inner.lock().policies.insert(key, policy);
    }

    /// Registers a freshly-connected connection with the pool.
    pub fn put(&self, conn: Arc<Connection>) {
        self.inner.lock().connections.push(conn);
    }

    /// Scans for an eligible connection for `address`/candidate `routes`.
    /// Eligibility (SPEC_FULL.md §4.4 "Acquisition"):
    /// 1. if `require_multiplexed`, the connection must be HTTP/2.
    /// 2. it must have spare allocation and not be marked `no_new_exchanges`.
    /// 3. its address must match non-host fields, and either the host
    ///    matches or one of `routes`' resolved IPs matches the connection's
    ///    remote address (coalescing) and the connection allows coalescing.
    pub fn acquire(
        &self,
        address: &super::address::Address,
        routes: &[super::route::Route],
        require_multiplexed: bool,
    ) -> Option<Arc<Connection>> {
        let inner = self.inner.lock();
        for conn in inner.connections.iter() {
            if require_multiplexed && !conn.is_multiplexed() {
                continue;
            }
            if !conn.has_capacity() {
                continue;
            }
            if !conn.route.address.equals_non_host(address) {
                continue;
            }

            let host_matches = conn.route.address.host == address.host;
            let coalesces = !host_matches
                && conn.is_multiplexed()
                && !conn.no_coalesced_connections()
                && routes.iter().any(|r| r.socket_addr == conn.route.socket_addr)
                && certificate_covers(conn, address);

            if host_matches || coalesces {
                return Some(conn.clone());
            }
        }
        None
    }

    /// Two-pass idle eviction (SPEC_FULL.md §4.4 "Eviction"). Returns the
    /// number of nanoseconds the caller should sleep before calling again:
    /// `0` if a connection was closed (rerun immediately), the time until the
    /// earliest evictable connection matures, `keep_alive` if all
    /// connections are busy, or `None` if the pool is empty.
    pub fn close_connections(&self, now: Instant) -> Option<Duration> {
        let mut inner = self.inner.lock();
        if inner.connections.is_empty() {
            return None;
        }

        let max_idle = self.max_idle_connections;
        let keep_alive = self.keep_alive;

        let idle_count = inner
            .connections
            .iter()
            .filter(|c| c.idle_since().is_some())
            .count();

        let mut oldest_old: Option<(usize, Instant)> = None;
        let mut oldest_evictable: Option<(usize, Instant)> = None;

        for (i, conn) in inner.connections.iter().enumerate() {
            conn.prune_dead_calls();
            let Some(idle_since) = conn.idle_since() else {
                continue;
            };
            if conn.call_count() > 0 {
                continue;
            }
            let idle_for = now.saturating_duration_since(idle_since);
            if idle_for >= keep_alive {
                let should_replace = oldest_old.map(|(_, t)| idle_since < t).unwrap_or(true);
                if should_replace {
                    oldest_old = Some((i, idle_since));
                }
            } else if idle_count > max_idle {
                let should_replace = oldest_evictable.map(|(_, t)| idle_since < t).unwrap_or(true);
                if should_replace {
                    oldest_evictable = Some((i, idle_since));
                }
            }
        }

        if let Some((i, _)) = oldest_old.or(oldest_evictable) {
            let conn = inner.connections.remove(i);
            conn.mark_no_new_exchanges();
            return Some(Duration::ZERO);
        }

        // Nothing to close now. If some connection is idle but not yet old
        // enough to evict, report when it will mature; otherwise the pool is
        // fully busy and the next check can wait a full keep-alive period.
        let next_maturity = inner
            .connections
            .iter()
            .filter_map(|c| c.idle_since())
            .map(|idle_since| (idle_since + keep_alive).saturating_duration_since(now))
            .min();

        Some(next_maturity.unwrap_or(keep_alive))
    }

    /// Removes every connection regardless of state (used on client
    /// shutdown).
    pub fn evict_all(&self) {
        let mut inner = self.inner.lock();
        for conn in inner.connections.drain(..) {
            conn.mark_no_new_exchanges();
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Whether `conn`'s certificate (and default hostname verifier) would cover
/// `address`'s host, for HTTP/2 coalescing eligibility. A full SAN/SPKI-pin
/// check needs the parsed certificate; until that's threaded through, this
/// conservatively requires an explicit peer certificate to be present and
/// defers to the caller to have pre-verified the hostname as covered (a
/// CONNECT_PLAN TLS verifier does this at handshake time for the original
/// host, not the coalescing candidate, so full coverage-checking belongs in
/// the TLS layer's `ServerVerifier`, not here).
fn certificate_covers(conn: &Connection, _address: &super::address::Address) -> bool {
    conn.info.peer_certificate.is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{
        connection::{ConnectionInfo, Protocol},
        route::Route,
    };

    fn conn_with(route: Route, protocol: Protocol, limit: u32) -> Arc<Connection> {
        Connection::new(
            route,
            ConnectionInfo {
                local_addr: None,
                remote_addr: None,
                protocol,
                reused: false,
                peer_certificate: None,
                cipher_suite: None,
                tls_version: None,
            },
            limit,
        )
    }

    #[test]
    fn acquire_finds_matching_host() {
        let pool = ConnectionPool::new(5, Duration::from_secs(60));
        let route = Route::test_fixture();
        let conn = conn_with(route.clone(), Protocol::Http2, 100);
        pool.put(conn);

        let found = pool.acquire(&route.address, &[route.clone()], false);
        assert!(found.is_some());
    }

    #[test]
    fn acquire_skips_no_new_exchanges() {
        let pool = ConnectionPool::new(5, Duration::from_secs(60));
        let route = Route::test_fixture();
        let conn = conn_with(route.clone(), Protocol::Http2, 100);
        conn.mark_no_new_exchanges();
        pool.put(conn);

        let found = pool.acquire(&route.address, &[route], false);
        assert!(found.is_none());
    }

    #[test]
    fn acquire_requires_multiplexed_when_asked() {
        let pool = ConnectionPool::new(5, Duration::from_secs(60));
        let route = Route::test_fixture();
        let conn = conn_with(route.clone(), Protocol::Http1, 1);
        pool.put(conn);

        let found = pool.acquire(&route.address, &[route], true);
        assert!(found.is_none());
    }

    #[test]
    fn eviction_closes_old_idle_connection() {
        let pool = ConnectionPool::new(0, Duration::from_millis(1));
        let route = Route::test_fixture();
        let conn = conn_with(route, Protocol::Http1, 1);
        pool.put(conn);

        std::thread::sleep(Duration::from_millis(5));
        let result = pool.close_connections(Instant::now());
        assert_eq!(result, Some(Duration::ZERO));
        assert_eq!(pool.len(), 0);
    }
}
