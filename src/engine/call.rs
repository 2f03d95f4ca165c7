//! Per-call state machine: the 2-bit cancellation lattice, per-exchange
//! stream-open flags, and the call/connection attachment (SPEC_FULL.md §3
//! "Lifecycles — Call", §4.12).
//!
//! Grounded in the teacher's plain `std::sync` usage around shared client
//! state (`src/client/client/mod.rs`) generalized to the per-call object
//! OkHttp calls `RealCall`: a small compare-and-swap lattice for
//! cancellation plus a mutex-guarded set of stream-lifecycle flags, so that
//! `callDone` fires its terminal callback exactly once no matter which
//! stream closes last.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU8, Ordering},
    },
    time::{Duration, Instant},
};

use crate::{error::BoxError, sync::Mutex};

use super::{connection::Connection, listener::Listener};

const NOT_STARTED: u8 = 0b00;
const EXECUTING: u8 = 0b01;
const CANCELED_BIT: u8 = 0b10;

/// The 2-bit cancellation lattice (SPEC_FULL.md §3 "Lifecycles — Call").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    NotStarted,
    CanceledBeforeStart,
    Executing,
    CanceledWhileExecuting,
}

fn decode(bits: u8) -> CallState {
    match bits {
        NOT_STARTED => CallState::NotStarted,
        EXECUTING => CallState::Executing,
        CANCELED_BIT => CallState::CanceledBeforeStart,
        _ => CallState::CanceledWhileExecuting,
    }
}

#[derive(Default)]
struct Flags {
    request_body_open: bool,
    response_body_open: bool,
    socket_reader_open: bool,
    socket_writer_open: bool,
    expect_more_exchanges: bool,
}

impl Flags {
    fn any_stream_open(&self) -> bool {
        self.request_body_open
            || self.response_body_open
            || self.socket_reader_open
            || self.socket_writer_open
    }
}

/// A single outbound call's state: cancellation, attached connection, and
/// the stream-open flags that decide when `callDone` fires.
pub struct Call {
    state: AtomicU8,
    flags: Mutex<Flags>,
    connection: Mutex<Option<Arc<Connection>>>,
    listener: Listener,
    started_at: Mutex<Option<Instant>>,
    terminal: Mutex<bool>,
}

/// Error returned by [`Call::start_executing`] when the call was canceled
/// before it ever ran (SPEC_FULL.md invariant I6: "A canceled call never
/// produces a response").
#[derive(Debug)]
pub struct CanceledBeforeStart;

impl std::fmt::Display for CanceledBeforeStart {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("call was canceled before it started executing")
    }
}

impl std::error::Error for CanceledBeforeStart {}

impl Call {
    pub fn new(listener: Listener) -> Arc<Self> {
        Arc::new(Call {
            state: AtomicU8::new(NOT_STARTED),
            flags: Mutex::new(Flags::default()),
            connection: Mutex::new(None),
            listener,
            started_at: Mutex::new(None),
            terminal: Mutex::new(false),
        })
    }

    pub fn state(&self) -> CallState {
        decode(self.state.load(Ordering::Acquire))
    }

    pub fn is_canceled(&self) -> bool {
        self.state.load(Ordering::Acquire) & CANCELED_BIT != 0
    }

    /// Idempotent: sets the canceled bit regardless of current state. The
    /// lattice only ever gains the canceled bit, never loses it.
    pub fn cancel(&self) {
        let _ = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                Some(bits | CANCELED_BIT)
            });
    }

    /// Transitions `NotStarted`/`CanceledBeforeStart` to the executing bit
    /// being set. Fails iff the call was already canceled before start,
    /// enforcing I6.
    pub fn start_executing(&self) -> Result<(), CanceledBeforeStart> {
        loop {
            let current = self.state.load(Ordering::Acquire);
            if current & CANCELED_BIT != 0 {
                return Err(CanceledBeforeStart);
            }
            if self
                .state
                .compare_exchange(
                    current,
                    current | EXECUTING,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                *self.started_at.lock() = Some(Instant::now());
                return Ok(());
            }
        }
    }

    /// Attaches `conn` as the connection this call currently holds, for the
    /// route planner's "already holds a healthy connection" fast path
    /// (SPEC_FULL.md §4.2 step 1).
    pub fn attach_connection(&self, conn: Arc<Connection>) {
        *self.connection.lock() = Some(conn);
    }

    pub fn attached_connection(&self) -> Option<Arc<Connection>> {
        self.connection.lock().clone()
    }

    /// Detaches the connection (violent release on retry/follow-up, or
    /// final release in `call_done`), returning it so the caller can decide
    /// whether to return it to the pool or close it.
    pub fn detach_connection(&self) -> Option<Arc<Connection>> {
        self.connection.lock().take()
    }

    /// Marks the start of a new exchange: all four stream flags open, and
    /// `expect_more_exchanges` set so a mid-exchange `message_done` doesn't
    /// prematurely finish the call (there may be a retry/follow-up still to
    /// come).
    pub fn begin_exchange(&self, expect_more_exchanges: bool) {
        let mut flags = self.flags.lock();
        flags.request_body_open = true;
        flags.response_body_open = true;
        flags.socket_reader_open = true;
        flags.socket_writer_open = true;
        flags.expect_more_exchanges = expect_more_exchanges;
    }

    /// No more exchanges will be attempted for this call (the final
    /// response has been chosen). Subsequent `message_done` calls finish
    /// the call once its last stream closes.
    pub fn no_more_exchanges(&self) {
        self.flags.lock().expect_more_exchanges = false;
    }

    /// SPEC_FULL.md §4.12 `messageDone`: clears the named flags under the
    /// call mutex; if every stream flag is now closed and no more exchanges
    /// are expected, runs `call_done`.
    pub fn message_done(
        self: &Arc<Self>,
        request_done: bool,
        response_done: bool,
        socket_reader_done: bool,
        socket_writer_done: bool,
        err: Option<&BoxError>,
    ) {
        let should_finish = {
            let mut flags = self.flags.lock();
            if request_done {
                flags.request_body_open = false;
            }
            if response_done {
                flags.response_body_open = false;
            }
            if socket_reader_done {
                flags.socket_reader_open = false;
            }
            if socket_writer_done {
                flags.socket_writer_open = false;
            }
            !flags.any_stream_open() && !flags.expect_more_exchanges
        };

        if should_finish {
            self.call_done(err);
        }
    }

    /// Releases the held connection (if any), applies timeout wrapping, and
    /// dispatches exactly one of `call_end`/`call_failed`. Safe to call more
    /// than once — only the first call has any effect, matching "each call
    /// terminates by either returning a response or raising exactly one
    /// error" (SPEC_FULL.md §7 "User-visible failure behavior").
    pub fn call_done(self: &Arc<Self>, err: Option<&BoxError>) -> Option<Arc<Connection>> {
        let mut terminal = self.terminal.lock();
        if *terminal {
            return None;
        }
        *terminal = true;
        drop(terminal);

        let released = self.detach_connection();
        if let Some(conn) = &released {
            conn.release();
        }
        self.listener.connection_released();

        let total = self
            .started_at
            .lock()
            .map(|at| at.elapsed())
            .unwrap_or(Duration::ZERO);

        match err {
            None => self.listener.call_end(total),
            Some(e) => self.listener.call_failed(e),
        }

        released
    }

    pub fn is_terminal(&self) -> bool {
        *self.terminal.lock()
    }
}

impl std::fmt::Debug for Call {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Call")
            .field("state", &self.state())
            .field("terminal", &self.is_terminal())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::connection::{ConnectionInfo, Protocol};
    use crate::engine::route::Route;

    fn test_connection() -> Arc<Connection> {
        Connection::new(
            Route::test_fixture(),
            ConnectionInfo {
                local_addr: None,
                remote_addr: None,
                protocol: Protocol::Http1,
                reused: false,
                peer_certificate: None,
                cipher_suite: None,
                tls_version: None,
            },
            1,
        )
    }

    #[test]
    fn cancel_before_start_prevents_execution() {
        let call = Call::new(Listener::noop());
        call.cancel();
        assert_eq!(call.state(), CallState::CanceledBeforeStart);
        assert!(call.start_executing().is_err());
    }

    #[test]
    fn cancel_while_executing_is_observed_but_does_not_undo_executing() {
        let call = Call::new(Listener::noop());
        call.start_executing().unwrap();
        call.cancel();
        assert_eq!(call.state(), CallState::CanceledWhileExecuting);
        assert!(call.is_canceled());
    }

    #[test]
    fn cancel_is_idempotent() {
        let call = Call::new(Listener::noop());
        call.cancel();
        call.cancel();
        assert_eq!(call.state(), CallState::CanceledBeforeStart);
    }

    #[test]
    fn message_done_waits_for_every_stream() {
        let call = Call::new(Listener::noop());
        call.start_executing().unwrap();
        call.begin_exchange(false);
        assert!(!call.is_terminal());

        call.message_done(true, false, false, false, None);
        assert!(!call.is_terminal());
        call.message_done(false, true, false, false, None);
        assert!(!call.is_terminal());
        call.message_done(false, false, true, false, None);
        assert!(!call.is_terminal());
        call.message_done(false, false, false, true, None);
        assert!(call.is_terminal());
    }

    #[test]
    fn expect_more_exchanges_defers_call_done() {
        let call = Call::new(Listener::noop());
        call.start_executing().unwrap();
        call.begin_exchange(true);
        call.message_done(true, true, true, true, None);
        assert!(!call.is_terminal(), "a retry/follow-up is still expected");

        call.no_more_exchanges();
        call.message_done(false, false, false, false, None);
        assert!(call.is_terminal());
    }

    #[test]
    fn call_done_releases_attached_connection_exactly_once() {
        let call = Call::new(Listener::noop());
        call.start_executing().unwrap();
        let conn = test_connection();
        conn.acquire(Arc::downgrade(&Arc::new(())));
        assert_eq!(conn.active(), 1);
        call.attach_connection(conn.clone());

        let released = call.call_done(None);
        assert!(released.is_some());
        assert_eq!(conn.active(), 0);

        // Second call is a no-op: nothing left attached to release.
        assert!(call.call_done(None).is_none());
    }
}
