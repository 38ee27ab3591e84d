//! Admission gate bounding the number of concurrently running operations.
//!
//! Every operation is submitted as an `invoke` thunk plus an `on_complete`
//! handler. The gate runs the thunk immediately when fewer than `limit`
//! operations are in flight, otherwise it parks the request in a FIFO
//! backlog. Each completion releases one slot and attempts to admit the next
//! backlog entry, so the gate drives itself without a poller.
//!
//! # Admission
//!
//! - Submit appends to the backlog tail and requests one drain.
//! - A drain pops the backlog head. If a slot is free the head is admitted,
//!   otherwise it goes back to the FRONT of the backlog.
//! - Completing an operation decrements the in-flight count, requests one
//!   drain, then forwards the result to `on_complete`.
//!
//! # Caller obligation
//!
//! Every admitted `invoke` must eventually call [`Completion::complete`]
//! exactly once. A handle that is held forever leaks its slot; a handle
//! that is dropped releases the slot without calling `on_complete`.
//!
//! # Example
//!
//! ```
//! use filequeue::gate::AdmissionGate;
//!
//! let gate = AdmissionGate::new(2);
//! gate.submit(
//!     |done| done.complete(String::from("some_data")),
//!     |data: String| assert_eq!(data, "some_data"),
//! );
//! assert_eq!(gate.in_flight(), 0);
//! ```

use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use crate::error::{FsError, Result};

/// Default limit, based on a typical per-process maxfiles of 256.
pub const DEFAULT_LIMIT: usize = 200;

/// Maps an absent or zero limit to [`DEFAULT_LIMIT`].
pub fn effective_limit(limit: Option<usize>) -> usize {
    match limit {
        Some(limit) if limit > 0 => limit,
        _ => DEFAULT_LIMIT,
    }
}

type Job = Box<dyn FnOnce(Slot) + Send + 'static>;

/// Snapshot of gate counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateStats {
    /// Current admission limit.
    pub limit: usize,
    /// Admitted operations that have not completed yet.
    pub in_flight: usize,
    /// Operations waiting in the backlog.
    pub queued: usize,
    /// Total operations submitted.
    pub submitted: u64,
    /// Total operations admitted.
    pub admitted: u64,
    /// Total operations completed through their handle.
    pub completed: u64,
    /// Handles dropped without completing.
    pub abandoned: u64,
    /// Drain attempts that found the gate full.
    pub deferred: u64,
    /// Highest in-flight count observed.
    pub peak_in_flight: usize,
}

struct GateState {
    limit: usize,
    in_flight: usize,
    backlog: VecDeque<Job>,
    draining: bool,
    pending_drains: usize,
    stats: GateStats,
}

struct GateInner {
    state: Mutex<GateState>,
}

impl GateInner {
    /// Queues `count` drain attempts and runs them unless a drain loop is
    /// already active on this gate, in which case that loop picks them up.
    fn request_drains(self: &Arc<Self>, count: usize) {
        if count == 0 {
            return;
        }

        let mut state = self.state.lock();
        state.pending_drains += count;
        if state.draining {
            return;
        }
        state.draining = true;

        while state.pending_drains > 0 {
            state.pending_drains -= 1;

            let Some(job) = state.backlog.pop_front() else {
                continue;
            };

            if state.in_flight < state.limit {
                state.in_flight += 1;
                state.stats.admitted += 1;
                state.stats.peak_in_flight = state.stats.peak_in_flight.max(state.in_flight);
                trace!(
                    in_flight = state.in_flight,
                    limit = state.limit,
                    queued = state.backlog.len(),
                    "admitted operation"
                );

                let slot = Slot {
                    gate: Arc::clone(self),
                };
                let outcome = MutexGuard::unlocked(&mut state, || {
                    panic::catch_unwind(AssertUnwindSafe(|| job(slot)))
                });
                if let Err(payload) = outcome {
                    // drains queued meanwhile run on the next request
                    state.draining = false;
                    drop(state);
                    panic::resume_unwind(payload);
                }
            } else {
                state.stats.deferred += 1;
                state.backlog.push_front(job);
                trace!(
                    in_flight = state.in_flight,
                    limit = state.limit,
                    queued = state.backlog.len(),
                    "gate full, operation deferred"
                );
            }
        }

        state.draining = false;
    }

    fn release(self: &Arc<Self>, completed: bool) {
        {
            let mut state = self.state.lock();
            state.in_flight -= 1;
            if completed {
                state.stats.completed += 1;
            } else {
                state.stats.abandoned += 1;
            }
        }
        self.request_drains(1);
    }
}

/// One admitted operation's hold on the gate, owned by its [`Completion`].
struct Slot {
    gate: Arc<GateInner>,
}

impl Slot {
    fn finish(self, completed: bool) {
        self.gate.release(completed);
    }
}

/// Single-shot completion signal handed to an admitted operation.
///
/// `complete` consumes the handle, so an operation can signal at most once.
pub struct Completion<T> {
    slot: Option<Slot>,
    on_complete: Option<Box<dyn FnOnce(T) + Send + 'static>>,
}

impl<T> Completion<T> {
    /// Releases the slot, admits the next queued operation, then hands
    /// `value` to the submitter's `on_complete`.
    pub fn complete(mut self, value: T) {
        if let Some(slot) = self.slot.take() {
            slot.finish(true);
        }
        if let Some(on_complete) = self.on_complete.take() {
            on_complete(value);
        }
    }
}

impl<T> Drop for Completion<T> {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            warn!("completion dropped without signalling, releasing slot");
            slot.finish(false);
        }
    }
}

impl<T> fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("pending", &self.slot.is_some())
            .finish()
    }
}

/// Bounded-concurrency gate with a FIFO backlog.
///
/// Cloning yields another handle to the same gate.
#[derive(Clone)]
pub struct AdmissionGate {
    inner: Arc<GateInner>,
}

impl AdmissionGate {
    /// Creates an independent gate. A zero limit falls back to [`DEFAULT_LIMIT`].
    pub fn new(limit: usize) -> Self {
        let limit = effective_limit(Some(limit));
        debug!(limit, "creating admission gate");
        Self {
            inner: Arc::new(GateInner {
                state: Mutex::new(GateState {
                    limit,
                    in_flight: 0,
                    backlog: VecDeque::new(),
                    draining: false,
                    pending_drains: 0,
                    stats: GateStats::default(),
                }),
            }),
        }
    }

    /// Returns the process-wide shared gate, creating it on first use.
    ///
    /// See [`crate::registry::GateRegistry::shared`].
    pub fn shared(limit: Option<usize>) -> Self {
        crate::registry::GateRegistry::global().shared(limit)
    }

    /// Queues an operation and immediately attempts to admit the backlog head.
    ///
    /// `invoke` receives the [`Completion`] for this operation and must not
    /// panic. The result passed to `complete` reaches `on_complete` unchanged.
    pub fn submit<T, I, C>(&self, invoke: I, on_complete: C)
    where
        T: 'static,
        I: FnOnce(Completion<T>) + Send + 'static,
        C: FnOnce(T) + Send + 'static,
    {
        let job: Job = Box::new(move |slot: Slot| {
            invoke(Completion {
                slot: Some(slot),
                on_complete: Some(Box::new(on_complete)),
            })
        });

        {
            let mut state = self.inner.state.lock();
            state.backlog.push_back(job);
            state.stats.submitted += 1;
        }
        self.inner.request_drains(1);
    }

    /// Runs the future produced by `op` once admitted and returns its output.
    ///
    /// The future is spawned on the current Tokio runtime, so dropping the
    /// returned future does not cancel the operation; its slot is released
    /// when it finishes.
    pub async fn run<F, Fut, T>(&self, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|_| FsError::NoRuntime { op: "run" })?;
        let (tx, rx) = oneshot::channel();

        self.submit(
            move |completion: Completion<T>| {
                handle.spawn(async move {
                    let output = op().await;
                    completion.complete(output);
                });
            },
            move |output: T| {
                let _ = tx.send(output);
            },
        );

        rx.await.map_err(|_| FsError::Abandoned)
    }

    /// Raises the limit to `limit` if it is higher than the current one.
    ///
    /// The comparison and the update happen under one lock, so concurrent
    /// raises always leave the largest requested limit in place.
    pub fn raise_limit(&self, limit: usize) {
        self.update_limit(|old| old.max(limit));
    }

    /// Replaces the limit. Lowering it never interrupts in-flight
    /// operations; admission resumes once `in_flight` falls below the new
    /// limit. Raising it admits queued operations into the new slots.
    ///
    /// A limit of zero is not a valid bound and means [`DEFAULT_LIMIT`],
    /// as it does for [`AdmissionGate::new`].
    pub fn set_limit(&self, limit: usize) {
        let limit = effective_limit(Some(limit));
        self.update_limit(|_| limit);
    }

    fn update_limit(&self, next: impl FnOnce(usize) -> usize) {
        let extra = {
            let mut state = self.inner.state.lock();
            let old = state.limit;
            let limit = next(old);
            if limit == old {
                return;
            }
            state.limit = limit;
            debug!(old, new = limit, "admission limit changed");
            limit
                .saturating_sub(old.max(state.in_flight))
                .min(state.backlog.len())
        };
        self.inner.request_drains(extra);
    }

    /// Current admission limit.
    pub fn limit(&self) -> usize {
        self.inner.state.lock().limit
    }

    /// Operations admitted and not yet completed.
    pub fn in_flight(&self) -> usize {
        self.inner.state.lock().in_flight
    }

    /// Operations waiting in the backlog.
    pub fn queued(&self) -> usize {
        self.inner.state.lock().backlog.len()
    }

    /// Snapshot of the gate's counters.
    pub fn stats(&self) -> GateStats {
        let state = self.inner.state.lock();
        GateStats {
            limit: state.limit,
            in_flight: state.in_flight,
            queued: state.backlog.len(),
            ..state.stats.clone()
        }
    }

    /// Returns true if both handles refer to the same gate state.
    pub fn same_gate(&self, other: &AdmissionGate) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Default for AdmissionGate {
    fn default() -> Self {
        Self::new(DEFAULT_LIMIT)
    }
}

impl fmt::Debug for AdmissionGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("AdmissionGate")
            .field("limit", &state.limit)
            .field("in_flight", &state.in_flight)
            .field("queued", &state.backlog.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    type Pending = Arc<Mutex<HashMap<usize, Completion<usize>>>>;

    /// Submits `ids` with invokes that park their completion in `pending`.
    fn submit_manual(gate: &AdmissionGate, ids: &[usize], pending: &Pending, done: &Arc<Mutex<Vec<usize>>>) {
        for &id in ids {
            let pending = Arc::clone(pending);
            let done = Arc::clone(done);
            gate.submit(
                move |completion| {
                    pending.lock().insert(id, completion);
                },
                move |value: usize| done.lock().push(value),
            );
        }
    }

    fn started(pending: &Pending) -> Vec<usize> {
        let mut ids: Vec<usize> = pending.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    fn signal(pending: &Pending, id: usize) {
        let completion = pending.lock().remove(&id).expect("operation not in flight");
        completion.complete(id);
    }

    #[test]
    fn test_default_limit() {
        assert_eq!(AdmissionGate::default().limit(), DEFAULT_LIMIT);
        assert_eq!(AdmissionGate::new(0).limit(), DEFAULT_LIMIT);
        assert_eq!(effective_limit(None), 200);
        assert_eq!(effective_limit(Some(7)), 7);
    }

    #[test]
    fn test_manual_completion_pipeline() {
        let gate = AdmissionGate::new(2);
        let pending: Pending = Arc::default();
        let done = Arc::new(Mutex::new(Vec::new()));

        submit_manual(&gate, &[1, 2, 3, 4], &pending, &done);
        assert_eq!(started(&pending), vec![1, 2]);
        assert_eq!(gate.in_flight(), 2);
        assert_eq!(gate.queued(), 2);

        signal(&pending, 1);
        assert_eq!(started(&pending), vec![2, 3]);

        signal(&pending, 2);
        assert_eq!(started(&pending), vec![3, 4]);
        assert_eq!(gate.queued(), 0);

        signal(&pending, 4);
        signal(&pending, 3);
        assert_eq!(gate.in_flight(), 0);
        assert_eq!(*done.lock(), vec![1, 2, 4, 3]);
    }

    #[test]
    fn test_fifo_under_contention() {
        let gate = AdmissionGate::new(1);
        let pending: Pending = Arc::default();
        let done = Arc::new(Mutex::new(Vec::new()));

        submit_manual(&gate, &[0, 1, 2, 3, 4], &pending, &done);
        for id in 0..5 {
            assert_eq!(started(&pending), vec![id]);
            signal(&pending, id);
        }
        assert_eq!(*done.lock(), vec![0, 1, 2, 3, 4]);

        let stats = gate.stats();
        assert_eq!(stats.submitted, 5);
        assert_eq!(stats.admitted, 5);
        assert_eq!(stats.completed, 5);
        assert_eq!(stats.deferred, 4);
        assert_eq!(stats.peak_in_flight, 1);
    }

    #[test]
    fn test_deferred_head_stays_first() {
        let gate = AdmissionGate::new(1);
        let pending: Pending = Arc::default();
        let done = Arc::new(Mutex::new(Vec::new()));

        submit_manual(&gate, &[10, 11], &pending, &done);
        // 12 arrives while 11 is still parked at the head
        submit_manual(&gate, &[12], &pending, &done);
        signal(&pending, 10);
        assert_eq!(started(&pending), vec![11]);
    }

    #[test]
    fn test_synchronous_completion_chain() {
        let gate = AdmissionGate::new(3);
        let count = Arc::new(Mutex::new(0usize));

        for _ in 0..20_000 {
            let count = Arc::clone(&count);
            gate.submit(|done| done.complete(()), move |()| *count.lock() += 1);
        }

        assert_eq!(*count.lock(), 20_000);
        assert_eq!(gate.in_flight(), 0);
        assert_eq!(gate.queued(), 0);
    }

    #[test]
    fn test_completion_pass_through() {
        let gate = AdmissionGate::new(4);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let results: Vec<std::result::Result<(u32, String), String>> = vec![
            Ok((1, "one".to_string())),
            Err("ENOENT".to_string()),
            Ok((3, "three".to_string())),
        ];
        for result in results.clone() {
            let seen = Arc::clone(&seen);
            gate.submit(move |done| done.complete(result), move |r| seen.lock().push(r));
        }

        assert_eq!(*seen.lock(), results);
    }

    #[test]
    fn test_error_does_not_disturb_siblings() {
        let gate = AdmissionGate::new(1);
        let outcomes = Arc::new(Mutex::new(Vec::new()));

        for i in 0..4u32 {
            let outcomes = Arc::clone(&outcomes);
            gate.submit(
                move |done| {
                    if i % 2 == 0 {
                        done.complete(Err(i))
                    } else {
                        done.complete(Ok(i))
                    }
                },
                move |r: std::result::Result<u32, u32>| outcomes.lock().push(r),
            );
        }

        assert_eq!(*outcomes.lock(), vec![Err(0), Ok(1), Err(2), Ok(3)]);
        assert_eq!(gate.in_flight(), 0);
    }

    #[test]
    fn test_dropped_completion_releases_slot() {
        let gate = AdmissionGate::new(1);
        let called = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&called);

        gate.submit(|done: Completion<()>| drop(done), move |()| *flag.lock() = true);

        assert!(!*called.lock());
        assert_eq!(gate.in_flight(), 0);
        assert_eq!(gate.stats().abandoned, 1);

        let ran = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&ran);
        gate.submit(|done| done.complete(()), move |()| *flag.lock() = true);
        assert!(*ran.lock());
    }

    #[test]
    fn test_raise_limit_admits_backlog() {
        let gate = AdmissionGate::new(1);
        let pending: Pending = Arc::default();
        let done = Arc::new(Mutex::new(Vec::new()));

        submit_manual(&gate, &[1, 2, 3, 4], &pending, &done);
        assert_eq!(started(&pending), vec![1]);

        gate.raise_limit(3);
        assert_eq!(gate.limit(), 3);
        assert_eq!(started(&pending), vec![1, 2, 3]);

        gate.raise_limit(2);
        assert_eq!(gate.limit(), 3);
    }

    #[test]
    fn test_lowered_limit_waits_for_completions() {
        let gate = AdmissionGate::new(3);
        let pending: Pending = Arc::default();
        let done = Arc::new(Mutex::new(Vec::new()));

        submit_manual(&gate, &[1, 2, 3, 4], &pending, &done);
        assert_eq!(started(&pending), vec![1, 2, 3]);

        gate.set_limit(1);
        signal(&pending, 1);
        assert_eq!(started(&pending), vec![2, 3]);
        signal(&pending, 2);
        assert_eq!(started(&pending), vec![3]);
        signal(&pending, 3);
        assert_eq!(started(&pending), vec![4]);
    }

    #[test]
    fn test_same_gate() {
        let gate = AdmissionGate::new(5);
        let clone = gate.clone();
        assert!(gate.same_gate(&clone));
        assert!(!gate.same_gate(&AdmissionGate::new(5)));
    }

    #[test]
    fn test_stats_serialization() {
        let gate = AdmissionGate::new(8);
        let json = serde_json::to_string(&gate.stats()).unwrap();
        let back: GateStats = serde_json::from_str(&json).unwrap();
        assert_eq!(back.limit, 8);
        assert_eq!(back.in_flight, 0);
    }

    #[test]
    fn test_panicking_invoke_does_not_wedge_gate() {
        let gate = AdmissionGate::new(4);

        let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
            gate.submit(|_done: Completion<()>| panic!("invoke failed"), |()| {});
        }));
        assert!(result.is_err());
        assert_eq!(gate.in_flight(), 0);
        assert_eq!(gate.stats().abandoned, 1);

        let ran = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&ran);
        gate.submit(|done| done.complete(()), move |()| *flag.lock() = true);
        assert!(*ran.lock());
        assert_eq!(gate.queued(), 0);
    }

    #[test]
    fn test_set_limit_zero_means_default() {
        let gate = AdmissionGate::new(3);
        gate.set_limit(0);
        assert_eq!(gate.limit(), DEFAULT_LIMIT);
    }

    #[test]
    fn test_concurrent_raises_keep_maximum() {
        for _ in 0..200 {
            let gate = AdmissionGate::new(10);
            let barrier = Arc::new(std::sync::Barrier::new(8));
            let handles: Vec<_> = (0..8)
                .map(|i| {
                    let gate = gate.clone();
                    let barrier = Arc::clone(&barrier);
                    std::thread::spawn(move || {
                        barrier.wait();
                        gate.raise_limit(100 + i);
                    })
                })
                .collect();
            for handle in handles {
                handle.join().unwrap();
            }
            assert_eq!(gate.limit(), 107);
        }
    }

    #[tokio::test]
    async fn test_run_returns_output() {
        let gate = AdmissionGate::new(2);
        let value = gate.run(|| async { 21 * 2 }).await.unwrap();
        assert_eq!(value, 42);
        assert_eq!(gate.stats().completed, 1);
    }

    #[tokio::test]
    async fn test_run_panicking_op_is_abandoned() {
        let gate = AdmissionGate::new(1);
        let result: Result<()> = gate.run(|| async { panic!("op failed") }).await;
        assert!(matches!(result, Err(FsError::Abandoned)));
        assert_eq!(gate.in_flight(), 0);
    }
}
