//! Exchange finder: sequential and fast-fallback (Happy Eyeballs) connect
//! strategies (SPEC_FULL.md §4.6).
//!
//! The fast-fallback timing (launch a new attempt no more than every 250 ms,
//! first success wins, losers canceled and their routes deferred) has no
//! direct analogue in the teacher, which only ever dials one route at a
//! time in `Connector::call` (`src/connect.rs`); this is grounded instead on
//! the teacher's general pattern of racing futures with `tokio::time` (used
//! throughout `connect.rs`/`proxy.rs` for timeouts) applied to OkHttp's
//! `FastFallbackExchangeFinder`.

use std::{collections::VecDeque, time::Duration};

use tokio::sync::mpsc;

use super::{Route, connect_plan::{ConnectPlan, Connected}};
use crate::{engine::listener::Listener, error::BoxError};

/// Interval between successive fast-fallback connect launches (SPEC_FULL.md
/// scenario S4: "spawns `v4a`" at 250 ms if `v6a` hasn't completed).
const FAST_FALLBACK_INTERVAL: Duration = Duration::from_millis(250);

pub enum Strategy {
    Sequential,
    FastFallback,
}

/// Finds a working connection among a list of candidate routes.
pub struct ExchangeFinder {
    strategy: Strategy,
    connect_timeout: Option<Duration>,
    listener: Listener,
}

/// Routes whose connect attempt lost a fast-fallback race, or that emitted a
/// "next plan" (coalescing swap, TLS connection-spec fallback) while losing,
/// are pushed here so the route planner retries them before consulting the
/// selector again.
pub type Deferred = VecDeque<Route>;

impl ExchangeFinder {
    pub fn new(strategy: Strategy, connect_timeout: Option<Duration>, listener: Listener) -> Self {
        ExchangeFinder {
            strategy,
            connect_timeout,
            listener,
        }
    }

    /// Attempts `routes` in order, returning the first successful connection
    /// plus any deferred routes that should be retried later.
    pub async fn find(&self, routes: Vec<Route>) -> Result<(Connected, Deferred), BoxError> {
        match self.strategy {
            Strategy::Sequential => self.find_sequential(routes).await,
            Strategy::FastFallback => self.find_fast_fallback(routes).await,
        }
    }

    async fn find_sequential(&self, routes: Vec<Route>) -> Result<(Connected, Deferred), BoxError> {
        let mut suppressed: Vec<BoxError> = Vec::new();
        for route in routes {
            let plan = ConnectPlan::new(route, self.connect_timeout, self.listener.clone());
            match plan.execute().await {
                Ok(connected) => return Ok((connected, Deferred::new())),
                Err(e) => suppressed.push(e),
            }
        }
        Err(combine_errors(suppressed))
    }

    async fn find_fast_fallback(&self, routes: Vec<Route>) -> Result<(Connected, Deferred), BoxError> {
        if routes.is_empty() {
            return Err("no routes to try".into());
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut remaining: VecDeque<Route> = routes.into_iter().collect();
        let mut in_flight = 0usize;
        let mut suppressed: Vec<BoxError> = Vec::new();
        let mut deferred: Deferred = Deferred::new();

        let mut launch_next = |remaining: &mut VecDeque<Route>, in_flight: &mut usize| {
            if let Some(route) = remaining.pop_front() {
                let tx = tx.clone();
                let connect_timeout = self.connect_timeout;
                let listener = self.listener.clone();
                *in_flight += 1;
                tokio::spawn(async move {
                    let plan = ConnectPlan::new(route.clone(), connect_timeout, listener);
                    let result = plan.execute().await;
                    let _ = tx.send((route, result));
                });
                true
            } else {
                false
            }
        };

        launch_next(&mut remaining, &mut in_flight);

        loop {
            let mut ticker = Box::pin(tokio::time::sleep(FAST_FALLBACK_INTERVAL));
            tokio::select! {
                _ = &mut ticker, if !remaining.is_empty() => {
                    launch_next(&mut remaining, &mut in_flight);
                }
                msg = rx.recv() => {
                    match msg {
                        Some((_route, Ok(connected))) => {
                            // winner: remaining unlaunched routes become
                            // deferred plans for a later attempt.
                            deferred.extend(remaining.drain(..));
                            return Ok((connected, deferred));
                        }
                        Some((_route, Err(e))) => {
                            in_flight -= 1;
                            suppressed.push(e);
                            if in_flight == 0 && remaining.is_empty() {
                                return Err(combine_errors(suppressed));
                            }
                            if remaining.is_empty() && in_flight == 0 {
                                return Err(combine_errors(suppressed));
                            }
                        }
                        None => return Err(combine_errors(suppressed)),
                    }
                }
            }
        }
    }
}

fn combine_errors(errors: Vec<BoxError>) -> BoxError {
    if errors.is_empty() {
        return "no routes attempted".into();
    }
    if errors.len() == 1 {
        return errors.into_iter().next().unwrap();
    }
    let joined = errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ");
    format!("all routes failed: {joined}").into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn combine_errors_single_passthrough() {
        let e: BoxError = "boom".into();
        let msg = e.to_string();
        let combined = combine_errors(vec!["boom".into()]);
        assert_eq!(combined.to_string(), msg);
    }

    #[test]
    fn combine_errors_joins_multiple() {
        let combined = combine_errors(vec!["a".into(), "b".into()]);
        assert!(combined.to_string().contains('a'));
        assert!(combined.to_string().contains('b'));
    }

    fn route_to(addr: std::net::SocketAddr) -> Route {
        let mut route = Route::test_fixture();
        route.address.tls = false;
        route.socket_addr = addr;
        route
    }

    #[tokio::test]
    async fn fast_fallback_races_every_route_given_to_it() {
        // A real listener to win the race, plus an address nothing is
        // listening on so the loser's connect attempt actually fails fast
        // instead of timing out the test.
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let winner_addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            let _ = listener.accept();
        });
        let dead_addr: std::net::SocketAddr = "127.0.0.1:1".parse().unwrap();

        let finder = ExchangeFinder::new(Strategy::FastFallback, None, Listener::noop());
        let routes = vec![route_to(dead_addr), route_to(winner_addr)];
        let (connected, deferred) = finder.find(routes).await.unwrap();

        assert_eq!(connected.route.socket_addr, winner_addr);
        assert!(deferred.is_empty());
    }

    #[tokio::test]
    async fn sequential_tries_routes_in_order_and_stops_at_the_first_success() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let winner_addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            let _ = listener.accept();
        });
        let dead_addr: std::net::SocketAddr = "127.0.0.1:1".parse().unwrap();

        let finder = ExchangeFinder::new(Strategy::Sequential, None, Listener::noop());
        let (connected, deferred) = finder
            .find(vec![route_to(winner_addr), route_to(dead_addr)])
            .await
            .unwrap();

        assert_eq!(connected.route.socket_addr, winner_addr);
        assert!(deferred.is_empty());
    }
}
