//! Delegation queue - bounded, throttled admission of worker dispatches.
//!
//! # Purpose
//! Every dispatch a scheduler makes passes through one of these. The queue
//! enforces the two resource rules that protect downstream workers:
//! a hard cap on dispatches in flight, and a minimum spacing between any two
//! dispatch initiations.
//!
//! # Invariants
//! - At most `max_concurrent` dispatches are running at any instant
//! - Any two initiation times from one queue differ by at least
//!   `throttle_interval` (plus any pending quota penalty)
//! - Queued submissions start in FIFO order
//! - A closed queue admits nothing; dispatches already running finish on
//!   their own
//!
//! # Design
//! Admission happens inline in `submit`: the caller suspends for the slot
//! wait and the throttle wait, then the dispatch itself is spawned and runs
//! concurrently. Initiation times are reserved under a short lock, so pacing
//! never blocks the caller on another dispatch's sleep.

use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Concurrency and pacing limits for one queue.
#[derive(Debug, Clone, Copy)]
pub struct QueueLimits {
    /// Dispatch slots
    pub max_concurrent: usize,
    /// Minimum gap between dispatch initiations
    pub throttle_interval: Duration,
}

impl QueueLimits {
    pub fn new(max_concurrent: usize, throttle_interval: Duration) -> Self {
        Self {
            max_concurrent,
            throttle_interval,
        }
    }
}

/// Errors surfaced by queue admission and dispatch handles.
#[derive(Debug, Clone, thiserror::Error)]
pub enum QueueError {
    #[error("Delegation queue is closed")]
    Closed,

    #[error("Dispatch did not run to completion: {0}")]
    DispatchFailed(String),
}

/// Initiation-time bookkeeping. Reservations are handed out under a short
/// std lock; the actual waiting happens outside it.
#[derive(Debug, Default)]
struct Pacer {
    /// Earliest instant the next dispatch may initiate
    next_free: Option<Instant>,
    /// One-shot extra gap, consumed by the next reservation
    penalty: Duration,
}

impl Pacer {
    /// Reserve an initiation slot at or after `now`, pushing `next_free`
    /// forward by the throttle interval.
    fn reserve(&mut self, now: Instant, throttle: Duration) -> Instant {
        let earliest = match self.next_free {
            Some(next_free) => next_free + self.penalty,
            None => now + self.penalty,
        };
        let scheduled = earliest.max(now);
        self.penalty = Duration::ZERO;
        self.next_free = Some(scheduled + throttle);
        scheduled
    }
}

/// Decrements the active gauge when a dispatch finishes, panicking included.
struct ActiveGuard(Arc<AtomicUsize>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Handle to one spawned dispatch.
#[derive(Debug)]
pub struct DispatchHandle<T> {
    label: String,
    join: JoinHandle<T>,
}

impl<T> DispatchHandle<T> {
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Wait for the dispatch to finish.
    ///
    /// # Errors
    /// `DispatchFailed` when the dispatch task panicked or was torn down by
    /// the runtime.
    pub async fn join(self) -> Result<T, QueueError> {
        self.join
            .await
            .map_err(|e| QueueError::DispatchFailed(e.to_string()))
    }
}

/// Bounded, throttled dispatch admission for one scheduler.
///
/// Counters and pacing state are scoped to this instance; two queues never
/// share anything.
pub struct DelegationQueue {
    limits: QueueLimits,
    slots: Arc<Semaphore>,
    pacer: StdMutex<Pacer>,
    closed: CancellationToken,
    active: Arc<AtomicUsize>,
    high_water: Arc<AtomicUsize>,
    dispatched: AtomicU64,
}

impl DelegationQueue {
    pub fn new(limits: QueueLimits) -> Self {
        Self {
            limits,
            slots: Arc::new(Semaphore::new(limits.max_concurrent)),
            pacer: StdMutex::new(Pacer::default()),
            closed: CancellationToken::new(),
            active: Arc::new(AtomicUsize::new(0)),
            high_water: Arc::new(AtomicUsize::new(0)),
            dispatched: AtomicU64::new(0),
        }
    }

    pub fn limits(&self) -> QueueLimits {
        self.limits
    }

    /// Admit and spawn one dispatch.
    ///
    /// Suspends the caller at up to two points, in order: waiting for a free
    /// slot, then waiting out the throttle spacing. Only after both does the
    /// dispatch start, with its slot held until `work` finishes.
    ///
    /// # Errors
    /// `Closed` when the queue was closed before or during admission.
    pub async fn submit<F, T>(
        &self,
        label: impl Into<String>,
        work: F,
    ) -> Result<DispatchHandle<T>, QueueError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let label = label.into();

        if self.closed.is_cancelled() {
            return Err(QueueError::Closed);
        }

        // Slot wait. FIFO fairness comes from the semaphore's waiter queue.
        let permit = tokio::select! {
            _ = self.closed.cancelled() => return Err(QueueError::Closed),
            permit = Arc::clone(&self.slots).acquire_owned() => {
                permit.map_err(|_| QueueError::Closed)?
            }
        };

        // Throttle wait. The reservation is taken after the slot is held, so
        // a dispatch right behind a freed slot still keeps its distance from
        // the previous initiation.
        let scheduled = {
            let mut pacer = self.pacer.lock().expect("pacer mutex poisoned");
            pacer.reserve(Instant::now(), self.limits.throttle_interval)
        };
        let wait = scheduled.saturating_duration_since(Instant::now());
        if !wait.is_zero() {
            debug!(task = %label, wait_ms = wait.as_millis() as u64, "throttling dispatch");
            tokio::select! {
                _ = self.closed.cancelled() => return Err(QueueError::Closed),
                _ = tokio::time::sleep_until(scheduled) => {}
            }
        }
        if self.closed.is_cancelled() {
            return Err(QueueError::Closed);
        }

        self.dispatched.fetch_add(1, Ordering::Relaxed);
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.high_water.fetch_max(now_active, Ordering::SeqCst);
        debug!(task = %label, active = now_active, "dispatch initiated");

        let guard = ActiveGuard(Arc::clone(&self.active));
        let join = tokio::spawn(async move {
            let _permit = permit;
            let _guard = guard;
            work.await
        });

        Ok(DispatchHandle { label, join })
    }

    /// Impose a one-shot extra gap before the next dispatch.
    ///
    /// Overlapping penalties collapse to the longest outstanding one rather
    /// than stacking.
    pub fn penalize(&self, extra: Duration) {
        let mut pacer = self.pacer.lock().expect("pacer mutex poisoned");
        pacer.penalty = pacer.penalty.max(extra);
        debug!(penalty_ms = pacer.penalty.as_millis() as u64, "queue penalized");
    }

    /// Stop admitting. Dispatches already running are left to finish;
    /// submissions waiting on a slot or on the throttle return `Closed`.
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    // Gauges, for callers and tests.

    /// Dispatches currently running.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Highest number of dispatches ever running at once.
    pub fn high_water(&self) -> usize {
        self.high_water.load(Ordering::SeqCst)
    }

    /// Total dispatches initiated.
    pub fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }
}
