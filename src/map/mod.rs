//! Expirable Map Module
//!
//! The public face of the crate: [`ExpirableMap`] composes an
//! [`EntryStore`](crate::storage::EntryStore) with an
//! [`ExpirationScheduler`](crate::expiry::ExpirationScheduler).
//!
//! ## Per-Key State Machine
//!
//! ```text
//!            put                      put (cancels H, schedules H')
//!  ABSENT ─────────> PRESENT(H) ──────────────────────> PRESENT(H')
//!    ▲                  │  │
//!    │   remove /       │  │ evict(G), G != H
//!    │   remove_if /    │  └──────> PRESENT(H)   (no-op)
//!    │   evict(H)       │
//!    └──────────────────┘
//! ```
//!
//! `insert` lands in `PRESENT(no pending)`: the value is kept until it is
//! removed or replaced.

pub mod expirable;

pub use expirable::{ExpirableMap, MapStats};
