//! One-Shot Expiration Scheduler
//!
//! This module implements [`ExpirationScheduler`], which runs a callback once
//! after a delay and lets the caller cancel it until it starts.
//!
//! ## Why an Owned Runtime?
//!
//! The scheduler is an explicit object with a start (`new`) and an end
//! (`shutdown` or drop), not a process-wide global. Maps that share a
//! scheduler share it through an `Arc`, and shutting it down has a
//! well-defined effect: waiting timers are cancelled and running callbacks
//! get `shutdown_timeout` to finish.

use crate::error::{SchedulerError, SchedulingError};
use crate::expiry::config::SchedulerConfig;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::AbortHandle;
use tracing::{debug, error, info, trace, warn};

/// Task has been scheduled and is waiting for its delay to elapse.
const PENDING: u8 = 0;
/// Callback has started (or finished) running.
const RUNNING: u8 = 1;
/// Task was cancelled before it started.
const CANCELLED: u8 = 2;

/// Identifies one scheduled task.
///
/// Handles are unique for the lifetime of a scheduler and compare equal only
/// to themselves, which is what lets the map tell a stale timer from the
/// current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EvictionHandle(u64);

impl EvictionHandle {
    /// Returns the raw task id.
    pub fn id(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for EvictionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Scheduler-side state of one task.
#[derive(Debug)]
struct TaskSlot {
    state: AtomicU8,
    abort: OnceLock<AbortHandle>,
}

impl TaskSlot {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(PENDING),
            abort: OnceLock::new(),
        }
    }

    /// Moves `Pending -> Running`. Fails if the task was cancelled.
    fn begin(&self) -> bool {
        self.state
            .compare_exchange(PENDING, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Moves `Pending -> Cancelled`. Fails if the task already started.
    fn cancel(&self) -> bool {
        self.state
            .compare_exchange(PENDING, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn is_cancelled(&self) -> bool {
        self.state.load(Ordering::Acquire) == CANCELLED
    }
}

/// Point-in-time scheduler statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Tasks accepted by `schedule`
    pub scheduled: u64,
    /// Callbacks that ran to completion
    pub fired: u64,
    /// Tasks cancelled before they started
    pub cancelled: u64,
    /// `schedule` calls refused because of saturation or shutdown
    pub rejected: u64,
    /// Callbacks that panicked
    pub panicked: u64,
    /// Tasks that have not finished yet
    pub pending: usize,
}

/// State shared between the scheduler and its spawned tasks.
#[derive(Debug, Default)]
struct Shared {
    registry: DashMap<EvictionHandle, Arc<TaskSlot>>,
    pending: AtomicUsize,

    scheduled: AtomicU64,
    fired: AtomicU64,
    cancelled: AtomicU64,
    rejected: AtomicU64,
    panicked: AtomicU64,
}

impl Shared {
    /// Drops the registry entry for `handle`, freeing its capacity slot.
    ///
    /// Both the task itself and `cancel` may call this; only the first one
    /// to remove the entry gives the slot back.
    fn release(&self, handle: EvictionHandle) {
        if self.registry.remove(&handle).is_some() {
            self.pending.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

/// Runs one-shot callbacks after a delay on a bounded pool of worker threads.
///
/// # Example
///
/// ```
/// use ttlmap::expiry::{ExpirationScheduler, SchedulerConfig};
/// use std::sync::mpsc;
/// use std::time::Duration;
///
/// let scheduler = ExpirationScheduler::new(SchedulerConfig::default()).unwrap();
/// let (tx, rx) = mpsc::channel();
///
/// let handle = scheduler
///     .schedule(Duration::from_millis(10), move |h| tx.send(h).unwrap())
///     .unwrap();
///
/// assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), handle);
/// scheduler.shutdown();
/// ```
pub struct ExpirationScheduler {
    shared: Arc<Shared>,

    /// Handle used to spawn tasks; stays valid after the runtime is taken
    handle: Handle,

    /// The runtime itself, taken on shutdown
    runtime: Mutex<Option<Runtime>>,

    /// `true` once shutdown has started. Held for reading across a whole
    /// `schedule` call so shutdown cannot interleave with a registration.
    closed: RwLock<bool>,

    next_id: AtomicU64,
    config: SchedulerConfig,
}

impl std::fmt::Debug for ExpirationScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpirationScheduler")
            .field("worker_threads", &self.config.worker_threads)
            .field("pending", &self.shared.pending.load(Ordering::Relaxed))
            .field("closed", &*self.closed.read())
            .finish()
    }
}

impl ExpirationScheduler {
    /// Starts a scheduler with its own worker threads.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Runtime`] if the worker threads cannot be spawned.
    pub fn new(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(config.worker_threads.max(1))
            .thread_name(config.thread_name.clone())
            .enable_time()
            .build()?;

        info!(
            worker_threads = config.worker_threads.max(1),
            max_pending_tasks = config.max_pending_tasks,
            "Expiration scheduler started"
        );

        Ok(Self {
            shared: Arc::new(Shared::default()),
            handle: runtime.handle().clone(),
            runtime: Mutex::new(Some(runtime)),
            closed: RwLock::new(false),
            next_id: AtomicU64::new(1),
            config,
        })
    }

    /// Schedules `callback` to run once after `delay`.
    ///
    /// The callback receives the handle returned here, so it can identify
    /// itself to whatever it calls back into.
    ///
    /// # Errors
    ///
    /// - [`SchedulingError::Saturated`] if `max_pending_tasks` tasks are unfinished
    /// - [`SchedulingError::ShutDown`] if [`shutdown`](Self::shutdown) was called
    pub fn schedule<F>(&self, delay: Duration, callback: F) -> Result<EvictionHandle, SchedulingError>
    where
        F: FnOnce(EvictionHandle) + Send + 'static,
    {
        let closed = self.closed.read();
        if *closed {
            self.shared.rejected.fetch_add(1, Ordering::Relaxed);
            return Err(SchedulingError::ShutDown);
        }

        let capacity = self.config.max_pending_tasks;
        let pending = self.shared.pending.fetch_add(1, Ordering::AcqRel);
        if pending >= capacity {
            self.shared.pending.fetch_sub(1, Ordering::AcqRel);
            self.shared.rejected.fetch_add(1, Ordering::Relaxed);
            warn!(pending, capacity, "Expiration scheduler saturated, rejecting task");
            return Err(SchedulingError::Saturated { pending, capacity });
        }

        let handle = EvictionHandle(self.next_id.fetch_add(1, Ordering::Relaxed));
        let slot = Arc::new(TaskSlot::new());
        self.shared.registry.insert(handle, Arc::clone(&slot));

        let shared = Arc::clone(&self.shared);
        let task_slot = Arc::clone(&slot);
        let join = self.handle.spawn(async move {
            tokio::time::sleep(delay).await;

            if task_slot.begin() {
                match panic::catch_unwind(AssertUnwindSafe(|| callback(handle))) {
                    Ok(()) => {
                        shared.fired.fetch_add(1, Ordering::Relaxed);
                        trace!(%handle, "Scheduled task fired");
                    }
                    Err(_) => {
                        shared.panicked.fetch_add(1, Ordering::Relaxed);
                        error!(%handle, "Scheduled callback panicked");
                    }
                }
            }

            shared.release(handle);
        });

        let abort = join.abort_handle();
        // A cancel that landed before the abort handle was stored could not abort the sleep.
        if slot.abort.set(abort).is_ok() && slot.is_cancelled() {
            if let Some(abort) = slot.abort.get() {
                abort.abort();
            }
        }

        self.shared.scheduled.fetch_add(1, Ordering::Relaxed);
        drop(closed);

        Ok(handle)
    }

    /// Cancels a task that has not started yet.
    ///
    /// Returns `true` iff the task was still waiting; it will then never run.
    /// Returns `false` if it is already running, has finished, was already
    /// cancelled, or is unknown to this scheduler. A running callback is not
    /// interrupted.
    pub fn cancel(&self, handle: EvictionHandle) -> bool {
        let slot = match self.shared.registry.get(&handle).map(|s| Arc::clone(s.value())) {
            Some(slot) => slot,
            None => return false,
        };

        if !slot.cancel() {
            return false;
        }

        if let Some(abort) = slot.abort.get() {
            abort.abort();
        }
        self.shared.release(handle);
        self.shared.cancelled.fetch_add(1, Ordering::Relaxed);
        debug!(%handle, "Scheduled task cancelled");

        true
    }

    /// Returns the number of tasks that have not finished yet.
    pub fn pending_tasks(&self) -> usize {
        self.shared.pending.load(Ordering::Acquire)
    }

    /// Returns `true` once [`shutdown`](Self::shutdown) has been called.
    pub fn is_shut_down(&self) -> bool {
        *self.closed.read()
    }

    /// Returns the configuration this scheduler was started with.
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Returns scheduler statistics.
    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            scheduled: self.shared.scheduled.load(Ordering::Relaxed),
            fired: self.shared.fired.load(Ordering::Relaxed),
            cancelled: self.shared.cancelled.load(Ordering::Relaxed),
            rejected: self.shared.rejected.load(Ordering::Relaxed),
            panicked: self.shared.panicked.load(Ordering::Relaxed),
            pending: self.pending_tasks(),
        }
    }

    /// Stops the scheduler.
    ///
    /// New `schedule` calls fail with [`SchedulingError::ShutDown`], every task
    /// that has not started is cancelled, and callbacks that are already
    /// running get up to `shutdown_timeout` to complete. Calling it again is
    /// a no-op.
    ///
    /// Returns the number of tasks that were cancelled.
    ///
    /// This blocks the calling thread, so it must not be called from inside
    /// an async context. Dropping the scheduler is the non-blocking alternative.
    pub fn shutdown(&self) -> usize {
        {
            let mut closed = self.closed.write();
            if *closed {
                return 0;
            }
            *closed = true;
        }

        let waiting: Vec<EvictionHandle> = self.shared.registry.iter().map(|e| *e.key()).collect();
        let cancelled = waiting.into_iter().filter(|h| self.cancel(*h)).count();

        if let Some(runtime) = self.runtime.lock().take() {
            runtime.shutdown_timeout(self.config.shutdown_timeout);
        }

        info!(cancelled, "Expiration scheduler shut down");
        cancelled
    }
}

impl Drop for ExpirationScheduler {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.get_mut().take() {
            runtime.shutdown_background();
            debug!("Expiration scheduler dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;

    fn scheduler() -> ExpirationScheduler {
        ExpirationScheduler::new(SchedulerConfig::default().with_worker_threads(2)).unwrap()
    }

    #[test]
    fn test_callback_runs_once_after_delay() {
        let scheduler = scheduler();
        let runs = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&runs);
        scheduler
            .schedule(Duration::from_millis(20), move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        assert_eq!(runs.load(Ordering::SeqCst), 0);
        thread::sleep(Duration::from_millis(200));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.pending_tasks(), 0);
        assert_eq!(scheduler.stats().fired, 1);
    }

    #[test]
    fn test_callback_receives_own_handle() {
        let scheduler = scheduler();
        let (tx, rx) = mpsc::channel();

        let handle = scheduler
            .schedule(Duration::from_millis(1), move |h| tx.send(h).unwrap())
            .unwrap();

        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), handle);
    }

    #[test]
    fn test_handles_are_unique() {
        let scheduler = scheduler();
        let a = scheduler.schedule(Duration::from_secs(60), |_| {}).unwrap();
        let b = scheduler.schedule(Duration::from_secs(60), |_| {}).unwrap();
        assert_ne!(a, b);
        assert!(b.id() > a.id());
    }

    #[test]
    fn test_cancel_pending_task() {
        let scheduler = scheduler();
        let runs = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&runs);
        let handle = scheduler
            .schedule(Duration::from_millis(50), move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        assert!(scheduler.cancel(handle));
        assert_eq!(scheduler.pending_tasks(), 0);

        thread::sleep(Duration::from_millis(150));
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        // Second cancel is a no-op
        assert!(!scheduler.cancel(handle));
        assert_eq!(scheduler.stats().cancelled, 1);
    }

    #[test]
    fn test_cancel_running_task_returns_false() {
        let scheduler = scheduler();
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let (done_tx, done_rx) = mpsc::channel();

        let handle = scheduler
            .schedule(Duration::from_millis(1), move |_| {
                started_tx.send(()).unwrap();
                release_rx.recv().unwrap();
                done_tx.send(()).unwrap();
            })
            .unwrap();

        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(!scheduler.cancel(handle));

        release_tx.send(()).unwrap();
        done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    }

    #[test]
    fn test_cancel_unknown_handle() {
        let scheduler = scheduler();
        assert!(!scheduler.cancel(EvictionHandle(9999)));
    }

    #[test]
    fn test_saturation() {
        let scheduler = ExpirationScheduler::new(
            SchedulerConfig::default()
                .with_worker_threads(1)
                .with_max_pending_tasks(2),
        )
        .unwrap();

        let first = scheduler.schedule(Duration::from_secs(60), |_| {}).unwrap();
        scheduler.schedule(Duration::from_secs(60), |_| {}).unwrap();

        let err = scheduler.schedule(Duration::from_secs(60), |_| {}).unwrap_err();
        assert_eq!(
            err,
            SchedulingError::Saturated {
                pending: 2,
                capacity: 2
            }
        );
        assert_eq!(scheduler.stats().rejected, 1);

        // Cancelling frees a slot
        assert!(scheduler.cancel(first));
        assert!(scheduler.schedule(Duration::from_secs(60), |_| {}).is_ok());
    }

    #[test]
    fn test_finished_tasks_free_capacity() {
        let scheduler = ExpirationScheduler::new(
            SchedulerConfig::default()
                .with_worker_threads(1)
                .with_max_pending_tasks(1),
        )
        .unwrap();

        scheduler.schedule(Duration::from_millis(5), |_| {}).unwrap();
        thread::sleep(Duration::from_millis(100));
        assert!(scheduler.schedule(Duration::from_millis(5), |_| {}).is_ok());
    }

    #[test]
    fn test_shutdown_cancels_and_rejects() {
        let scheduler = scheduler();
        let runs = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let counter = Arc::clone(&runs);
            scheduler
                .schedule(Duration::from_millis(100), move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
        }

        assert_eq!(scheduler.shutdown(), 3);
        assert!(scheduler.is_shut_down());
        assert_eq!(scheduler.pending_tasks(), 0);
        assert_eq!(
            scheduler.schedule(Duration::from_millis(1), |_| {}),
            Err(SchedulingError::ShutDown)
        );

        thread::sleep(Duration::from_millis(200));
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        // Idempotent
        assert_eq!(scheduler.shutdown(), 0);
    }

    #[test]
    fn test_panicking_callback_releases_slot() {
        let scheduler = scheduler();

        scheduler
            .schedule(Duration::from_millis(1), |_| panic!("boom"))
            .unwrap();

        thread::sleep(Duration::from_millis(150));
        let stats = scheduler.stats();
        assert_eq!(stats.panicked, 1);
        assert_eq!(stats.fired, 0);
        assert_eq!(stats.pending, 0);
    }

    #[test]
    fn test_drop_with_pending_tasks() {
        let scheduler = scheduler();
        for _ in 0..10 {
            scheduler.schedule(Duration::from_secs(60), |_| {}).unwrap();
        }
        drop(scheduler);
    }
}
