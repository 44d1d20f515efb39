//! # ttlmap - A Concurrent Map With Per-Entry Expiry
//!
//! ttlmap is an in-process key-value map where every entry carries its own
//! time-to-live. When the TTL elapses, a background timer removes the entry.
//! Foreground writes and background timers are coordinated so that a timer
//! belonging to an overwritten or removed value can never delete a newer one.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                            ExpirableMap                                 │
//! │                                                                         │
//! │  ┌──────────────────────────────┐   ┌──────────────────────────────┐    │
//! │  │        ShardedStore          │   │      PendingEvictions        │    │
//! │  │  ┌────────┐ ┌────────┐       │   │  ┌────────┐ ┌────────┐       │    │
//! │  │  │Shard 0 │ │Shard 1 │ ...   │   │  │Shard 0 │ │Shard 1 │ ...   │    │
//! │  │  │RwLock  │ │RwLock  │       │   │  │Mutex   │ │Mutex   │       │    │
//! │  │  └────────┘ └────────┘       │   │  └────────┘ └────────┘       │    │
//! │  └──────────────────────────────┘   └──────────────────────────────┘    │
//! │                                               ▲                         │
//! │                                               │ evict(key, handle)      │
//! │                     ┌─────────────────────────┴───────────────────────┐ │
//! │                     │           ExpirationScheduler                   │ │
//! │                     │      (Owned Tokio Runtime, One Task per TTL)    │ │
//! │                     └─────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```
//! use ttlmap::ExpirableMap;
//! use std::time::Duration;
//!
//! let map = ExpirableMap::new().unwrap();
//!
//! map.put("session", "token123", Duration::from_secs(3600)).unwrap();
//! assert_eq!(map.get(&"session"), Some("token123"));
//!
//! assert_eq!(map.remove(&"session"), Some("token123"));
//! assert_eq!(map.remove(&"session"), None);
//! ```
//!
//! ## Sharing a Scheduler
//!
//! ```
//! use ttlmap::{ExpirableMap, ExpirationScheduler, SchedulerConfig};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let scheduler = Arc::new(ExpirationScheduler::new(SchedulerConfig::default()).unwrap());
//! let users = ExpirableMap::with_scheduler(Arc::clone(&scheduler));
//! let tokens = ExpirableMap::with_scheduler(Arc::clone(&scheduler));
//!
//! users.put(1u64, "ariz".to_string(), Duration::from_secs(60)).unwrap();
//! tokens.put("abc", 1u64, Duration::from_secs(60)).unwrap();
//! assert_eq!(scheduler.pending_tasks(), 2);
//! ```
//!
//! ## Module Overview
//!
//! - [`storage`]: The sharded key-value table and the [`EntryStore`] trait
//! - [`expiry`]: The one-shot timer scheduler
//! - [`map`]: The expiring map built from the two
//! - [`error`]: Error types
//!
//! ## Design Highlights
//!
//! ### Ownership Check on Fire
//!
//! Cancelling a timer is best-effort: it may already be running. So each key
//! records the handle of the only timer allowed to evict it, and a firing
//! timer re-reads that record under the key's lock before deleting anything.
//!
//! ### No Silent Drops
//!
//! If the scheduler is saturated or shut down, `put` returns an error instead
//! of storing a value that would never expire unnoticed.

pub mod error;
pub mod expiry;
pub mod map;
pub mod storage;

// Re-export commonly used types for convenience
pub use error::{ExpiryError, Result, SchedulerError, SchedulingError};
pub use expiry::{EvictionHandle, ExpirationScheduler, SchedulerConfig, SchedulerStats};
pub use map::{ExpirableMap, MapStats};
pub use storage::{EntryStore, ShardedStore};

/// Version of ttlmap
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
