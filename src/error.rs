//! Error types for the expiring map and its scheduler.

use thiserror::Error;

/// Errors returned by [`ExpirableMap`](crate::ExpirableMap) operations.
#[derive(Debug, Error)]
pub enum ExpiryError {
    /// The caller passed an argument the map cannot accept (e.g. a zero TTL).
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// The value was stored but its eviction could not be scheduled.
    #[error("eviction could not be scheduled: {0}")]
    Scheduling(#[from] SchedulingError),
}

/// Reasons the scheduler refused a new task.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchedulingError {
    /// Too many tasks are already waiting to fire
    #[error("scheduler saturated: {pending} tasks pending (capacity: {capacity})")]
    Saturated { pending: usize, capacity: usize },

    /// The scheduler has been shut down
    #[error("scheduler is shut down")]
    ShutDown,
}

/// Errors raised while constructing a scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The timer runtime could not be started
    #[error("failed to start scheduler runtime: {0}")]
    Runtime(#[from] std::io::Error),
}

/// Result type for map operations.
pub type Result<T> = std::result::Result<T, ExpiryError>;
