//! Storage Module
//!
//! This module provides the key-value table that backs an
//! [`ExpirableMap`](crate::map::ExpirableMap).
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      ShardedStore                           │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐           │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │...64    │           │
//! │  │ RwLock  │ │ RwLock  │ │ RwLock  │ │ shards  │           │
//! │  └─────────┘ └─────────┘ └─────────┘ └─────────┘           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The store knows nothing about time. Expiry is layered on top of it by the
//! map, which talks to it only through the [`EntryStore`] trait.
//!
//! ## Example
//!
//! ```
//! use ttlmap::storage::{EntryStore, ShardedStore};
//!
//! let store = ShardedStore::new();
//! assert_eq!(store.put("name", "Ariz"), None);
//! assert_eq!(store.get(&"name"), Some("Ariz"));
//! assert!(store.remove_if(&"name", &"Ariz"));
//! assert!(store.is_empty());
//! ```

pub mod engine;

pub use engine::{shard_for, EntryStore, ShardedStore, DEFAULT_SHARDS};
