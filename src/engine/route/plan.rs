//! The result of route planning: either reuse a pooled connection or build a
//! fresh one (SPEC_FULL.md §3 "Plan").

use std::sync::Arc;

use super::{Route, connect_plan::ConnectPlan};
use crate::engine::connection::Connection;

/// Either a [`ConnectPlan`] (new connection to be built) or a `ReusePlan`
/// (already-ready pooled connection). `is_ready()` is false for a
/// `ConnectPlan` until TCP + (tunnel) + TLS finish.
///
/// `Connect` carries the primary route plus any further routes the selector
/// produced in the same batch (SPEC_FULL.md §4.6): when fast-fallback is
/// enabled, these are raced alongside the primary route instead of being
/// tried one `plan()` call at a time.
pub enum Plan {
    Connect(ConnectPlan, Vec<Route>),
    Reuse(Arc<Connection>),
}

impl Plan {
    pub fn is_ready(&self) -> bool {
        match self {
            Plan::Connect(p, _) => p.is_ready(),
            Plan::Reuse(_) => true,
        }
    }
}
