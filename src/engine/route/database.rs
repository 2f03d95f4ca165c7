//! Route failure bookkeeping (SPEC_FULL.md §4.2, §4.3 "should postpone").
//!
//! Grounded in the general shape of the teacher's `crate::sync` primitives
//! (a plain mutex-guarded map, never held across `.await`) applied to OkHttp's
//! `RouteDatabase`: a small set of socket addresses that recently failed to
//! connect, consulted by the route selector to push flaky routes to the back
//! of the attempt order instead of excluding them outright.

use std::{collections::HashSet, net::SocketAddr};

use crate::sync::Mutex;

/// Tracks routes that have recently failed, so the selector can postpone
/// (not exclude) them on the next attempt.
#[derive(Default)]
pub struct RouteDatabase {
    failed_routes: Mutex<HashSet<SocketAddr>>,
}

impl RouteDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `addr` failed to connect (or failed in a way that
    /// warrants trying other routes first next time).
    pub fn failed(&self, addr: SocketAddr) {
        self.failed_routes.lock().insert(addr);
    }

    /// Clears the failure record for `addr` (a subsequent connect to it
    /// succeeded).
    pub fn connected(&self, addr: SocketAddr) {
        self.failed_routes.lock().remove(&addr);
    }

    /// Whether `addr` should be tried only after all not-previously-failed
    /// routes have been exhausted.
    pub fn should_postpone(&self, addr: &SocketAddr) -> bool {
        self.failed_routes.lock().contains(addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_route_is_postponed_until_cleared() {
        let db = RouteDatabase::new();
        let addr: SocketAddr = "127.0.0.1:443".parse().unwrap();
        assert!(!db.should_postpone(&addr));
        db.failed(addr);
        assert!(db.should_postpone(&addr));
        db.connected(addr);
        assert!(!db.should_postpone(&addr));
    }
}
