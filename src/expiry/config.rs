//! Scheduler configuration.

use std::thread;
use std::time::Duration;

/// Default cap on eviction tasks that may be waiting at the same time.
pub const DEFAULT_MAX_PENDING_TASKS: usize = 1_000_000;

/// Default time `shutdown` waits for callbacks that are already running.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration for an [`ExpirationScheduler`](super::ExpirationScheduler).
///
/// Fields can be overridden with struct update syntax or the `with_*` setters:
///
/// ```
/// use ttlmap::expiry::SchedulerConfig;
/// use std::time::Duration;
///
/// let config = SchedulerConfig {
///     worker_threads: 2,
///     ..Default::default()
/// }
/// .with_shutdown_timeout(Duration::from_millis(500));
///
/// assert_eq!(config.worker_threads, 2);
/// ```
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Worker threads driving timers and callbacks (default: available parallelism)
    pub worker_threads: usize,

    /// Maximum number of scheduled tasks that have not yet finished (default: 1,000,000)
    pub max_pending_tasks: usize,

    /// How long `shutdown` waits for running callbacks (default: 5s)
    pub shutdown_timeout: Duration,

    /// Name given to the worker threads
    pub thread_name: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_threads: thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            max_pending_tasks: DEFAULT_MAX_PENDING_TASKS,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            thread_name: "ttlmap-expiry".to_string(),
        }
    }
}

impl SchedulerConfig {
    /// Sets the number of worker threads.
    pub fn with_worker_threads(mut self, worker_threads: usize) -> Self {
        self.worker_threads = worker_threads;
        self
    }

    /// Sets the cap on unfinished tasks.
    pub fn with_max_pending_tasks(mut self, max_pending_tasks: usize) -> Self {
        self.max_pending_tasks = max_pending_tasks;
        self
    }

    /// Sets how long `shutdown` waits for running callbacks.
    pub fn with_shutdown_timeout(mut self, shutdown_timeout: Duration) -> Self {
        self.shutdown_timeout = shutdown_timeout;
        self
    }

    /// Sets the worker thread name.
    pub fn with_thread_name(mut self, thread_name: impl Into<String>) -> Self {
        self.thread_name = thread_name.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SchedulerConfig::default();
        assert!(config.worker_threads >= 1);
        assert_eq!(config.max_pending_tasks, DEFAULT_MAX_PENDING_TASKS);
        assert_eq!(config.shutdown_timeout, DEFAULT_SHUTDOWN_TIMEOUT);
        assert_eq!(config.thread_name, "ttlmap-expiry");
    }

    #[test]
    fn test_setters() {
        let config = SchedulerConfig::default()
            .with_worker_threads(3)
            .with_max_pending_tasks(10)
            .with_thread_name("evictor");
        assert_eq!(config.worker_threads, 3);
        assert_eq!(config.max_pending_tasks, 10);
        assert_eq!(config.thread_name, "evictor");
    }
}
