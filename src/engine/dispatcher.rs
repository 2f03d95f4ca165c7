//! Admission control for asynchronous calls: global and per-host concurrency
//! limits, FIFO promotion, and an idle callback (SPEC_FULL.md §4.1).
//!
//! Grounded in the teacher's locking discipline (`crate::sync::Mutex`,
//! nothing held across an `.await` point — see `src/sync.rs`) applied to
//! OkHttp's `Dispatcher`: a small mutex-guarded set of queues, with the
//! actual work (spawning a task, running the idle callback) always done
//! after the lock is released.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    future::Future,
    pin::Pin,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    },
};

use crate::sync::Mutex;

/// Opaque identifier for a call admitted to (or waiting on) the dispatcher.
pub type CallId = u64;

type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// An asynchronous unit of work submitted to the [`Dispatcher`].
///
/// `run` is spawned on the executor once admitted. `reject` is invoked
/// instead, without ever running `run`, if the dispatcher has been shut
/// down (SPEC_FULL.md §4.1 "If the executor is shut down, synthesize a
/// rejected-execution failure ... and deliver it via the call's completion
/// path").
pub struct AsyncCall {
    host: String,
    run: BoxFuture,
    reject: Box<dyn FnOnce() + Send>,
}

impl AsyncCall {
    pub fn new<F, R>(host: impl Into<String>, run: F, reject: R) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
        R: FnOnce() + Send + 'static,
    {
        AsyncCall {
            host: host.into(),
            run: Box::pin(run),
            reject: Box::new(reject),
        }
    }
}

struct Waiting {
    id: CallId,
    call: AsyncCall,
}

#[derive(Default)]
struct Inner {
    ready: VecDeque<Waiting>,
    running_async: HashSet<CallId>,
    running_sync: usize,
    host_counters: HashMap<String, Arc<AtomicUsize>>,
    canceled: HashSet<CallId>,
}

impl Inner {
    fn host_counter(&mut self, host: &str) -> Arc<AtomicUsize> {
        self.host_counters
            .entry(host.to_owned())
            .or_insert_with(|| Arc::new(AtomicUsize::new(0)))
            .clone()
    }

    fn is_idle(&self) -> bool {
        self.ready.is_empty() && self.running_async.is_empty() && self.running_sync == 0
    }
}

/// Concurrency gate for asynchronous calls, with global and per-host
/// admission limits (SPEC_FULL.md §4.1).
///
/// Policy defaults match the teacher's OkHttp ancestor: 64 total in-flight
/// requests, 5 per host. Always constructed behind an `Arc`, since the
/// promote step needs to hand completed tasks a way to call back into
/// `finished_async`.
pub struct Dispatcher {
    max_requests: usize,
    max_requests_per_host: usize,
    inner: Mutex<Inner>,
    next_id: AtomicU64,
    shutdown: AtomicBool,
    idle_callback: Mutex<Option<Arc<dyn Fn() + Send + Sync>>>,
}

impl Dispatcher {
    pub fn new(max_requests: usize, max_requests_per_host: usize) -> Arc<Self> {
        Arc::new(Dispatcher {
            max_requests,
            max_requests_per_host,
            inner: Mutex::new(Inner::default()),
            next_id: AtomicU64::new(1),
            shutdown: AtomicBool::new(false),
            idle_callback: Mutex::new(None),
        })
    }

    pub fn set_idle_callback<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self.idle_callback.lock() = Some(Arc::new(callback));
    }

    pub fn max_requests(&self) -> usize {
        self.max_requests
    }

    pub fn max_requests_per_host(&self) -> usize {
        self.max_requests_per_host
    }

    /// Enqueues an asynchronous call, sharing the per-host counter with any
    /// other call already in the system for the same (lowercased) host, then
    /// drives the promote step. Returns a [`CallId`] the caller may later
    /// pass to [`cancel`](Self::cancel).
    pub fn enqueue(self: &Arc<Self>, host: &str, call: AsyncCall) -> CallId {
        let host = host.to_ascii_lowercase();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        if self.shutdown.load(Ordering::Acquire) {
            (call.reject)();
            return id;
        }

        {
            let mut inner = self.inner.lock();
            inner.host_counter(&host);
            inner.ready.push_back(Waiting {
                id,
                call: AsyncCall { host, ..call },
            });
        }
        self.promote();
        id
    }

    /// Cancels a call that has not yet started running. A no-op if the call
    /// is already running or finished; per SPEC_FULL.md §4.1 "Cancellation
    /// of a ready-but-not-running async call must still prevent execution".
    pub fn cancel(&self, id: CallId) {
        self.inner.lock().canceled.insert(id);
    }

    /// Registers a synchronous (blocking) call as running. Synchronous calls
    /// are not subject to the global/per-host limits — they occupy the
    /// calling thread directly, as in the teacher's blocking client.
    pub fn execute_sync(&self) {
        self.inner.lock().running_sync += 1;
    }

    /// Marks a previously-`execute_sync`'d call as finished.
    pub fn finished_sync(&self) {
        let was_idle;
        {
            let mut inner = self.inner.lock();
            inner.running_sync = inner.running_sync.saturating_sub(1);
            was_idle = inner.is_idle();
        }
        if was_idle {
            self.fire_idle_callback();
        }
    }

    /// Marks an asynchronous call as finished, decrements its shared
    /// per-host counter, re-runs the promote step, and fires the idle
    /// callback if the dispatcher is now fully drained.
    fn finished_async(self: &Arc<Self>, id: CallId, host: &str) {
        {
            let mut inner = self.inner.lock();
            inner.running_async.remove(&id);
            inner.canceled.remove(&id);
            if let Some(counter) = inner.host_counters.get(host) {
                counter.fetch_sub(1, Ordering::AcqRel);
            }
        }
        self.promote();
        let was_idle = self.inner.lock().is_idle();
        if was_idle {
            self.fire_idle_callback();
        }
    }

    fn fire_idle_callback(&self) {
        let callback = self.idle_callback.lock().clone();
        if let Some(callback) = callback {
            callback();
        }
    }

    /// Walks `ready` in FIFO order, starting every call whose global and
    /// per-host admission checks pass (SPEC_FULL.md §4.1 "Promote step").
    /// Canceled-but-not-yet-running calls are dropped silently, without ever
    /// invoking `run` or `reject`. Admitted calls are spawned on the
    /// executor; if the dispatcher has been shut down, every remaining
    /// queued call is rejected instead.
    fn promote(self: &Arc<Self>) {
        let shutdown = self.shutdown.load(Ordering::Acquire);
        let mut to_start: Vec<(CallId, String, BoxFuture)> = Vec::new();
        let mut to_reject: Vec<Box<dyn FnOnce() + Send>> = Vec::new();

        {
            let mut inner = self.inner.lock();
            let mut requeue = VecDeque::new();

            while let Some(waiting) = inner.ready.pop_front() {
                if inner.canceled.remove(&waiting.id) {
                    continue;
                }
                if shutdown {
                    to_reject.push(waiting.call.reject);
                    continue;
                }

                let counter = inner.host_counter(&waiting.call.host);
                if inner.running_async.len() >= self.max_requests {
                    // Global cap hit: stop promoting entirely, leaving this
                    // and everything behind it queued.
                    requeue.push_back(waiting);
                    break;
                }
                if counter.load(Ordering::Acquire) >= self.max_requests_per_host {
                    // Only the per-host cap is hit: skip this one, but keep
                    // looking — a later call for a different host may still
                    // be admitted.
                    requeue.push_back(waiting);
                    continue;
                }

                inner.running_async.insert(waiting.id);
                counter.fetch_add(1, Ordering::AcqRel);
                to_start.push((waiting.id, waiting.call.host, waiting.call.run));
            }

            // Whatever is still in `ready` (the global-cap break case)
            // follows everything we passed over, preserving FIFO order.
            requeue.extend(inner.ready.drain(..));
            inner.ready = requeue;
        }

        for reject in to_reject {
            reject();
        }

        for (id, host, run) in to_start {
            let dispatcher = self.clone();
            tokio::spawn(async move {
                run.await;
                dispatcher.finished_async(id, &host);
            });
        }
    }

    pub fn is_idle(&self) -> bool {
        self.inner.lock().is_idle()
    }

    pub fn running_async_count(&self) -> usize {
        self.inner.lock().running_async.len()
    }

    pub fn ready_count(&self) -> usize {
        self.inner.lock().ready.len()
    }

    /// Disables further admission. Calls already running are left alone;
    /// everything still queued (and everything enqueued from now on) is
    /// rejected instead of run.
    pub fn shutdown(self: &Arc<Self>) {
        self.shutdown.store(true, Ordering::Release);
        self.promote();
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Dispatcher")
            .field("max_requests", &self.max_requests)
            .field("max_requests_per_host", &self.max_requests_per_host)
            .field("ready", &inner.ready.len())
            .field("running_async", &inner.running_async.len())
            .field("running_sync", &inner.running_sync)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize as StdAtomicUsize;

    #[tokio::test]
    async fn per_host_cap_skips_without_blocking_other_hosts() {
        let dispatcher = Dispatcher::new(10, 1);
        let ran_x2 = Arc::new(StdAtomicUsize::new(0));
        let ran_y1 = Arc::new(StdAtomicUsize::new(0));

        let gate = Arc::new(tokio::sync::Notify::new());
        let gate_clone = gate.clone();
        dispatcher.enqueue(
            "x.example.com",
            AsyncCall::new(
                "x.example.com",
                async move {
                    gate_clone.notified().await;
                },
                || {},
            ),
        );

        let ran_x2_clone = ran_x2.clone();
        dispatcher.enqueue(
            "x.example.com",
            AsyncCall::new(
                "x.example.com",
                async move {
                    ran_x2_clone.fetch_add(1, Ordering::SeqCst);
                },
                || {},
            ),
        );

        let ran_y1_clone = ran_y1.clone();
        dispatcher.enqueue(
            "y.example.com",
            AsyncCall::new(
                "y.example.com",
                async move {
                    ran_y1_clone.fetch_add(1, Ordering::SeqCst);
                },
                || {},
            ),
        );

        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        // x is capped at 1 in-flight by the first (still-blocked) call; y is
        // unaffected and should have run already.
        assert_eq!(ran_x2.load(Ordering::SeqCst), 0);
        assert_eq!(ran_y1.load(Ordering::SeqCst), 1);

        gate.notify_one();
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        assert_eq!(ran_x2.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn canceled_ready_call_never_runs() {
        let dispatcher = Dispatcher::new(1, 10);
        let ran = Arc::new(StdAtomicUsize::new(0));

        // Saturate the global cap with a call that blocks forever, so the
        // second call stays in `ready` where cancellation can observe it.
        let blocker = Arc::new(tokio::sync::Notify::new());
        let blocker_clone = blocker.clone();
        dispatcher.enqueue(
            "a.example.com",
            AsyncCall::new(
                "a.example.com",
                async move {
                    blocker_clone.notified().await;
                },
                || {},
            ),
        );

        let ran_clone = ran.clone();
        let id = dispatcher.enqueue(
            "b.example.com",
            AsyncCall::new(
                "b.example.com",
                async move {
                    ran_clone.fetch_add(1, Ordering::SeqCst);
                },
                || {},
            ),
        );

        dispatcher.cancel(id);
        blocker.notify_one();
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(dispatcher.ready_count(), 0);
    }

    #[tokio::test]
    async fn shutdown_rejects_queued_calls() {
        let dispatcher = Dispatcher::new(1, 10);
        let rejected = Arc::new(StdAtomicUsize::new(0));

        let blocker = Arc::new(tokio::sync::Notify::new());
        let blocker_clone = blocker.clone();
        dispatcher.enqueue(
            "a.example.com",
            AsyncCall::new(
                "a.example.com",
                async move {
                    blocker_clone.notified().await;
                },
                || {},
            ),
        );

        let rejected_clone = rejected.clone();
        dispatcher.enqueue(
            "b.example.com",
            AsyncCall::new(
                "b.example.com",
                async {},
                move || {
                    rejected_clone.fetch_add(1, Ordering::SeqCst);
                },
            ),
        );

        dispatcher.shutdown();
        assert_eq!(rejected.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.ready_count(), 0);
        blocker.notify_one();
    }

    #[tokio::test]
    async fn fairness_s5() {
        // SPEC_FULL.md scenario S5: max_requests_per_host=1, 3 requests to
        // host X and 1 to host Y; running set after promote is {X1, Y1}. On
        // X1 finish, running becomes {X2, Y1}, not {X2, X3}.
        let dispatcher = Dispatcher::new(10, 1);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<&'static str>();

        let gate = Arc::new(tokio::sync::Notify::new());
        let gate_clone = gate.clone();
        let tx1 = tx.clone();
        dispatcher.enqueue(
            "x.example.com",
            AsyncCall::new(
                "x.example.com",
                async move {
                    let _ = tx1.send("x1-start");
                    gate_clone.notified().await;
                },
                || {},
            ),
        );
        let tx2 = tx.clone();
        dispatcher.enqueue(
            "x.example.com",
            AsyncCall::new("x.example.com", async move { let _ = tx2.send("x2"); }, || {}),
        );
        let tx3 = tx.clone();
        dispatcher.enqueue(
            "x.example.com",
            AsyncCall::new("x.example.com", async move { let _ = tx3.send("x3"); }, || {}),
        );
        let tx4 = tx.clone();
        dispatcher.enqueue(
            "y.example.com",
            AsyncCall::new("y.example.com", async move { let _ = tx4.send("y1"); }, || {}),
        );

        assert_eq!(rx.recv().await, Some("x1-start"));
        assert_eq!(rx.recv().await, Some("y1"));

        gate.notify_one();
        assert_eq!(rx.recv().await, Some("x2"));
        assert_eq!(rx.recv().await, Some("x3"));
    }
}
