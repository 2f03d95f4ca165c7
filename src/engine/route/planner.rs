//! Route planner: ties the pool, route database, and selector together into
//! a single `plan()` call (SPEC_FULL.md §4.2).

use std::{collections::VecDeque, sync::Arc};

use crate::{error::Error, sync::Mutex};

use super::{
    Plan, Route, RouteDatabase,
    connect_plan::ConnectPlan,
    selector::RouteSelector,
};
use crate::engine::{address::Address, connection::Connection, listener::Listener, pool::ConnectionPool};

/// Per-call planning state, threaded through repeated `plan()` calls for the
/// same logical call as retries/follow-ups happen.
pub struct RoutePlanner {
    address: Address,
    pool: Arc<ConnectionPool>,
    database: Arc<RouteDatabase>,
    listener: Listener,
    fast_fallback: bool,
    state: Mutex<PlannerState>,
}

#[derive(Default)]
struct PlannerState {
    deferred: VecDeque<Route>,
    next_route_to_try: Option<Route>,
    selector_primary: VecDeque<Route>,
    selector_postponed: VecDeque<Route>,
    selector_initialized: bool,
}

impl RoutePlanner {
    pub fn new(
        address: Address,
        pool: Arc<ConnectionPool>,
        database: Arc<RouteDatabase>,
        listener: Listener,
        fast_fallback: bool,
    ) -> Self {
        RoutePlanner {
            address,
            pool,
            database,
            listener,
            fast_fallback,
            state: Mutex::new(PlannerState::default()),
        }
    }

    /// SPEC_FULL.md §4.2 "Algorithm (on each plan() invocation)", steps 2-4
    /// (step 1, "is the call already holding a healthy connection", is the
    /// caller's responsibility — it owns the currently-attached connection,
    /// the planner only ever produces a *new* plan).
    pub async fn plan(&self) -> Result<Plan, Error> {
        // Step 2: consult the pool for an eligible connection.
        let candidate_routes: Vec<Route> = {
            let state = self.state.lock();
            state
                .selector_primary
                .iter()
                .chain(state.deferred.iter())
                .cloned()
                .collect()
        };
        if let Some(conn) = self.pool.acquire(&self.address, &candidate_routes, false) {
            return Ok(Plan::Reuse(conn));
        }

        // Step 3: deferred plans, FIFO.
        if let Some(route) = {
            let mut state = self.state.lock();
            state.deferred.pop_front()
        } {
            return Ok(Plan::Connect(ConnectPlan::new(route, None, self.listener.clone()), Vec::new()));
        }

        // Step 4: fresh connect plan(s). When the batch comes straight from
        // the selector it may hold every primary route at once, so the
        // exchange finder can race them (SPEC_FULL.md §4.6) instead of
        // dialing one route per `plan()` round trip.
        let mut batch = self.next_route_batch().await?;
        let route = batch.remove(0);

        // Step 5 ("After TCP planning, consult the pool again with resolved
        // IPs") is performed by the caller once the route's socket address is
        // known, by calling `pool.acquire` again before running the connect
        // plan — the planner only hands out the route(s) here.
        Ok(Plan::Connect(ConnectPlan::new(route, None, self.listener.clone()), batch))
    }

    /// Returns the next batch of routes to attempt: a single stashed retry
    /// route, or every route the selector currently has queued in its
    /// primary tier (falling back to one postponed route if the primary
    /// tier is empty).
    async fn next_route_batch(&self) -> Result<Vec<Route>, Error> {
        // 4a: stashed single route from a failed-connection retry or
        // coalesced swap. Never batched with the selector — it bypasses
        // route selection entirely.
        if let Some(route) = {
            let mut state = self.state.lock();
            state.next_route_to_try.take()
        } {
            return Ok(vec![route]);
        }

        loop {
            let batch: Vec<Route> = {
                let mut state = self.state.lock();
                if !state.selector_primary.is_empty() {
                    state.selector_primary.drain(..).collect()
                } else if let Some(route) = state.selector_postponed.pop_front() {
                    vec![route]
                } else {
                    Vec::new()
                }
            };
            if !batch.is_empty() {
                return Ok(batch);
            }

            let already_initialized = self.state.lock().selector_initialized;
            if already_initialized {
                return Err(Error::exhausted_routes(
                    "no more routes to try",
                    self.address_uri(),
                ));
            }

            let selector = RouteSelector::new(&self.address, &self.database, self.fast_fallback);
            let (primary, postponed) = selector
                .select()
                .await
                .map_err(|e| Error::exhausted_routes(e, self.address_uri()))?;

            let mut state = self.state.lock();
            state.selector_primary = primary.into();
            state.selector_postponed = postponed.into();
            state.selector_initialized = true;
            if state.selector_primary.is_empty() && state.selector_postponed.is_empty() {
                return Err(Error::exhausted_routes(
                    "dns resolution returned no addresses",
                    self.address_uri(),
                ));
            }
        }
    }

    fn address_uri(&self) -> http::Uri {
        http::Uri::builder()
            .scheme(self.address.scheme.clone())
            .authority(self.address.host.clone())
            .path_and_query("/")
            .build()
            .unwrap_or_else(|_| http::Uri::from_static("/"))
    }

    /// `has_next` per SPEC_FULL.md §4.2: true iff deferred non-empty, or
    /// `next_route_to_try` set, or the selector still has routes, or the
    /// selector is uninitialized (optimistic true).
    pub fn has_next(&self) -> bool {
        let state = self.state.lock();
        !state.deferred.is_empty()
            || state.next_route_to_try.is_some()
            || !state.selector_primary.is_empty()
            || !state.selector_postponed.is_empty()
            || !state.selector_initialized
    }

    /// Stashes a single route to be tried next, bypassing the selector
    /// (coalescing swap or a connection-spec TLS fallback).
    pub fn retry_with(&self, route: Route) {
        self.state.lock().next_route_to_try = Some(route);
    }

    /// Pushes a route onto the front of the deferred queue (a fast-fallback
    /// loser's route, per SPEC_FULL.md §4.6).
    pub fn defer_front(&self, route: Route) {
        self.state.lock().deferred.push_front(route);
    }

    pub fn defer_back(&self, route: Route) {
        self.state.lock().deferred.push_back(route);
    }

    /// A failed connection's route may be retried iff its failure count is
    /// zero, it was fully retired (`no_new_exchanges`), and the address is
    /// reusable (SPEC_FULL.md §4.2 "Route eligibility for retry").
    pub fn route_eligible_for_retry(&self, conn: &Connection) -> bool {
        conn.route_failure_count() == 0 && conn.no_new_exchanges()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn test_address() -> Address {
        Route::test_fixture().address
    }

    #[test]
    fn has_next_is_optimistic_before_first_plan() {
        let planner = RoutePlanner::new(
            test_address(),
            Arc::new(ConnectionPool::new(5, Duration::from_secs(60))),
            Arc::new(RouteDatabase::new()),
            Listener::noop(),
            true,
        );
        assert!(planner.has_next());
    }

    #[test]
    fn deferred_route_makes_has_next_true() {
        let planner = RoutePlanner::new(
            test_address(),
            Arc::new(ConnectionPool::new(5, Duration::from_secs(60))),
            Arc::new(RouteDatabase::new()),
            Listener::noop(),
            true,
        );
        planner.defer_back(Route::test_fixture());
        assert!(planner.has_next());
    }

    #[tokio::test]
    async fn fresh_plan_batches_every_primary_route_for_racing() {
        let planner = RoutePlanner::new(
            test_address(),
            Arc::new(ConnectionPool::new(5, Duration::from_secs(60))),
            Arc::new(RouteDatabase::new()),
            Listener::noop(),
            true,
        );
        {
            let mut state = planner.state.lock();
            state.selector_primary = vec![Route::test_fixture(), Route::test_fixture(), Route::test_fixture()].into();
            state.selector_initialized = true;
        }

        let Plan::Connect(plan, extra_routes) = planner.plan().await.unwrap() else {
            panic!("expected a fresh connect plan");
        };
        let _ = plan;
        assert_eq!(extra_routes.len(), 2);
        assert!(planner.state.lock().selector_primary.is_empty());
    }

    #[tokio::test]
    async fn stashed_retry_route_is_never_batched_with_the_selector() {
        let planner = RoutePlanner::new(
            test_address(),
            Arc::new(ConnectionPool::new(5, Duration::from_secs(60))),
            Arc::new(RouteDatabase::new()),
            Listener::noop(),
            true,
        );
        {
            let mut state = planner.state.lock();
            state.selector_primary = vec![Route::test_fixture()].into();
            state.selector_initialized = true;
        }
        planner.retry_with(Route::test_fixture());

        let Plan::Connect(_, extra_routes) = planner.plan().await.unwrap() else {
            panic!("expected a fresh connect plan");
        };
        assert!(extra_routes.is_empty());
        assert_eq!(planner.state.lock().selector_primary.len(), 1);
    }
}
