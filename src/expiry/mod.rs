//! Expiration Scheduler Module
//!
//! This module runs the one-shot timers that evict entries from an
//! [`ExpirableMap`](crate::map::ExpirableMap).
//!
//! ## Design
//!
//! The scheduler owns a small Tokio runtime. Every call to
//! [`ExpirationScheduler::schedule`] spawns one task that:
//! 1. Sleeps for the requested delay
//! 2. Claims its slot (`Pending -> Running`) unless it was cancelled first
//! 3. Runs the callback exactly once
//! 4. Releases its slot in the task registry
//!
//! Cancellation races with step 2 on a single atomic, so `cancel` returning
//! `true` means the callback will never run, and `false` means it already
//! started (or never existed).
//!
//! ```text
//!   schedule() ──> Pending ──(delay elapsed)──> Running ──> Finished
//!                     │
//!                     └──(cancel)──> Cancelled
//! ```
//!
//! ## Backpressure
//!
//! The number of unfinished tasks is bounded by
//! [`SchedulerConfig::max_pending_tasks`]. Past that, `schedule` fails with
//! [`SchedulingError::Saturated`](crate::SchedulingError::Saturated) instead
//! of dropping the timer.

pub mod config;
pub mod scheduler;

pub use config::SchedulerConfig;
pub use scheduler::{EvictionHandle, ExpirationScheduler, SchedulerStats};
