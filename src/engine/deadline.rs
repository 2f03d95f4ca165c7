//! Per-call and per-phase deadlines.
//!
//! The source architecture represents a deadline as a node threaded through a
//! "current-thread" timeout wheel (`okio.Timeout`), sampled cooperatively at
//! blocking-I/O call sites. On top of tokio that pattern has no purchase:
//! every suspension point already goes through the reactor, so a deadline is
//! just an [`tokio::time::Instant`] raced with the future via
//! [`tokio::time::timeout_at`]. See REDESIGN FLAGS in `DESIGN.md`.

use std::time::Duration;

use tokio::time::{Instant, error::Elapsed, timeout_at};

use crate::error::{BoxError, TimedOut};

/// A single point in time after which an operation must be abandoned.
///
/// `Deadline` is `Copy` and cheap to pass down call stacks; `None` means "no
/// limit". A call carries up to four independent deadlines (connect, read,
/// write, overall-call) per SPEC_FULL.md §5 — each is a separate `Deadline`,
/// not a shared one, so that an overall-call timeout firing doesn't need to
/// be distinguished from a connect timeout firing by anything other than
/// which `Deadline` raced the future.
#[derive(Debug, Clone, Copy)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    /// No deadline at all.
    pub const NONE: Deadline = Deadline(None);

    /// A deadline `dur` from now. `None` if `dur` is `None`.
    pub fn after(dur: Option<Duration>) -> Self {
        Deadline(dur.map(|d| Instant::now() + d))
    }

    /// A deadline at a fixed instant.
    pub fn at(instant: Instant) -> Self {
        Deadline(Some(instant))
    }

    /// Whether this deadline has already elapsed.
    pub fn is_expired(&self) -> bool {
        self.0.is_some_and(|at| Instant::now() >= at)
    }

    /// Remaining duration until the deadline, or `None` if unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.0.map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// Race `fut` against this deadline. Resolves to `Err(TimedOut)` wrapped
    /// as a [`BoxError`] if the deadline elapses first.
    pub async fn race<F, T>(&self, fut: F) -> Result<T, BoxError>
    where
        F: std::future::Future<Output = Result<T, BoxError>>,
    {
        match self.0 {
            None => fut.await,
            Some(at) => match timeout_at(at, fut).await {
                Ok(res) => res,
                Err(Elapsed { .. }) => Err(Box::new(TimedOut) as BoxError),
            },
        }
    }

    /// Like [`race`](Self::race), but for a future that cannot itself fail;
    /// the deadline is the only source of error.
    pub async fn race_infallible<F, T>(&self, fut: F) -> Result<T, BoxError>
    where
        F: std::future::Future<Output = T>,
    {
        match self.0 {
            None => Ok(fut.await),
            Some(at) => match timeout_at(at, fut).await {
                Ok(val) => Ok(val),
                Err(Elapsed { .. }) => Err(Box::new(TimedOut) as BoxError),
            },
        }
    }
}

impl Default for Deadline {
    fn default() -> Self {
        Deadline::NONE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unbounded_never_times_out() {
        let d = Deadline::NONE;
        let res: Result<u32, BoxError> = d.race(async { Ok(7) }).await;
        assert_eq!(res.unwrap(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn elapsed_deadline_errors() {
        let d = Deadline::after(Some(Duration::from_millis(10)));
        let res: Result<u32, BoxError> = d
            .race(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(7)
            })
            .await;
        assert!(res.is_err());
    }

    #[test]
    fn is_expired_reflects_past_instant() {
        let d = Deadline::at(Instant::now() - Duration::from_secs(1));
        assert!(d.is_expired());
    }
}
