//! Expiring Map
//!
//! [`ExpirableMap`] stores values in an [`EntryStore`] and schedules one
//! eviction task per key on an [`ExpirationScheduler`].
//!
//! ## Ownership Check
//!
//! Each key has at most one *current* eviction handle, kept in a sharded
//! pending-evictions table. A firing task removes the entry only if its own
//! handle is still the current one for that key. The table is read when the
//! task fires, never captured when it is scheduled:
//!
//! ```text
//!  put(k, v1, 10ms) ──> pending[k] = H1
//!  put(k, v2, 10s)  ──> cancel(H1) (may be too late: H1 already running)
//!                       pending[k] = H2
//!  H1 fires         ──> pending[k] == H2 != H1  ──> no-op, v2 survives
//! ```
//!
//! ## Locking
//!
//! Every mutation of a key (put, insert, remove, conditional remove, eviction) holds
//! that key's pending shard mutex across its store update, so the store slot
//! and the pending slot always change together. Lock order is pending shard,
//! then store shard. Reads go to the store only.

use crate::error::{ExpiryError, Result, SchedulerError};
use crate::expiry::{EvictionHandle, ExpirationScheduler, SchedulerConfig};
use crate::storage::{shard_for, EntryStore, ShardedStore, DEFAULT_SHARDS};
use parking_lot::{Mutex, MutexGuard};
use std::collections::HashMap;
use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Point-in-time map statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MapStats {
    /// Successful `put` calls (including ones whose scheduling failed)
    pub puts: u64,
    /// Explicit removals that removed an entry
    pub removes: u64,
    /// Entries removed by their own eviction timer
    pub evictions: u64,
    /// Timers that fired after being superseded and left the entry alone
    pub stale_evictions: u64,
    /// `put` calls whose eviction could not be scheduled
    pub scheduling_failures: u64,
}

#[derive(Debug, Default)]
struct Counters {
    puts: AtomicU64,
    removes: AtomicU64,
    evictions: AtomicU64,
    stale_evictions: AtomicU64,
    scheduling_failures: AtomicU64,
}

type PendingShard<K> = Mutex<HashMap<K, EvictionHandle>>;

/// State reachable from eviction tasks.
struct Inner<K, V, S> {
    store: S,
    pending: Vec<PendingShard<K>>,
    counters: Counters,
    _values: PhantomData<fn() -> V>,
}

impl<K, V, S> Inner<K, V, S>
where
    K: Hash + Eq,
    S: EntryStore<K, V>,
{
    #[inline]
    fn lock_pending(&self, key: &K) -> MutexGuard<'_, HashMap<K, EvictionHandle>> {
        self.pending[shard_for(key, self.pending.len())].lock()
    }

    /// Called by the scheduler when the task `firing` is due for `key`.
    fn evict(&self, key: &K, firing: EvictionHandle) {
        let mut pending = self.lock_pending(key);

        if pending.get(key) != Some(&firing) {
            self.counters.stale_evictions.fetch_add(1, Ordering::Relaxed);
            trace!(handle = %firing, "Superseded eviction ignored");
            return;
        }

        pending.remove(key);
        self.store.remove(key);
        self.counters.evictions.fetch_add(1, Ordering::Relaxed);
        debug!(handle = %firing, "Entry expired");
    }
}

/// A concurrent key-value map whose entries expire after a per-entry TTL.
///
/// # Example
///
/// ```
/// use ttlmap::ExpirableMap;
/// use std::thread::sleep;
/// use std::time::Duration;
///
/// let map = ExpirableMap::new().unwrap();
///
/// map.put("Still", "Alive", Duration::from_secs(3)).unwrap();
/// map.put("Gonna", "Die", Duration::from_millis(10)).unwrap();
///
/// sleep(Duration::from_millis(200));
///
/// assert_eq!(map.get(&"Still"), Some("Alive"));
/// assert_eq!(map.get(&"Gonna"), None);
/// ```
pub struct ExpirableMap<K, V, S = ShardedStore<K, V>> {
    inner: Arc<Inner<K, V, S>>,
    scheduler: Arc<ExpirationScheduler>,
}

impl<K, V, S> std::fmt::Debug for ExpirableMap<K, V, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpirableMap")
            .field("pending_shards", &self.inner.pending.len())
            .field("scheduler", &self.scheduler)
            .finish()
    }
}

impl<K, V> ExpirableMap<K, V, ShardedStore<K, V>>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + PartialEq + Send + Sync + 'static,
{
    /// Creates a map with a default [`ShardedStore`] and its own scheduler.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError`] if the scheduler's worker threads cannot start.
    pub fn new() -> std::result::Result<Self, SchedulerError> {
        let scheduler = ExpirationScheduler::new(SchedulerConfig::default())?;
        Ok(Self::with_scheduler(Arc::new(scheduler)))
    }

    /// Creates a map with a default [`ShardedStore`] on a shared scheduler.
    pub fn with_scheduler(scheduler: Arc<ExpirationScheduler>) -> Self {
        Self::with_store(ShardedStore::new(), scheduler)
    }
}

impl<K, V, S> ExpirableMap<K, V, S>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
    S: EntryStore<K, V> + 'static,
{
    /// Creates a map over a caller-supplied store.
    pub fn with_store(store: S, scheduler: Arc<ExpirationScheduler>) -> Self {
        let pending = (0..DEFAULT_SHARDS)
            .map(|_| Mutex::new(HashMap::new()))
            .collect();

        Self {
            inner: Arc::new(Inner {
                store,
                pending,
                counters: Counters::default(),
                _values: PhantomData,
            }),
            scheduler,
        }
    }

    /// Associates `value` with `key` for `ttl`, replacing any previous value
    /// and its pending eviction.
    ///
    /// Returns the previous value, if any.
    ///
    /// # Errors
    ///
    /// - [`ExpiryError::InvalidArgument`] if `ttl` is zero; nothing is changed.
    /// - [`ExpiryError::Scheduling`] if the eviction could not be scheduled.
    ///   The new value *is* stored in that case, but nothing will evict it.
    pub fn put(&self, key: K, value: V, ttl: Duration) -> Result<Option<V>> {
        if ttl.is_zero() {
            return Err(ExpiryError::InvalidArgument("ttl must be greater than zero"));
        }

        // Clone before touching any state: a panicking `Clone` must leave the
        // previous value and its timer in place.
        let store_key = key.clone();
        let task_key = key.clone();

        let mut pending = self.inner.lock_pending(&key);

        if let Some(previous) = pending.remove(&key) {
            // A lost race here is fine: the running task will fail the ownership check.
            let cancelled = self.scheduler.cancel(previous);
            trace!(handle = %previous, cancelled, "Replaced pending eviction");
        }

        let previous = self.inner.store.put(store_key, value);
        self.inner.counters.puts.fetch_add(1, Ordering::Relaxed);

        let weak: Weak<Inner<K, V, S>> = Arc::downgrade(&self.inner);
        let scheduled = self.scheduler.schedule(ttl, move |handle| {
            if let Some(inner) = weak.upgrade() {
                inner.evict(&task_key, handle);
            }
        });

        match scheduled {
            Ok(handle) => {
                pending.insert(key, handle);
                Ok(previous)
            }
            Err(e) => {
                self.inner
                    .counters
                    .scheduling_failures
                    .fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "Value stored without a scheduled eviction");
                Err(e.into())
            }
        }
    }

    /// Like [`put`](Self::put), with the TTL given in milliseconds.
    pub fn put_millis(&self, key: K, value: V, ttl_millis: u64) -> Result<Option<V>> {
        self.put(key, value, Duration::from_millis(ttl_millis))
    }

    /// Associates `value` with `key` without an expiry.
    ///
    /// Any pending eviction for `key` is cancelled first, so an earlier
    /// timer can never remove the inserted value. Returns the previous value.
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        let mut pending = self.inner.lock_pending(&key);

        if let Some(handle) = pending.remove(&key) {
            let cancelled = self.scheduler.cancel(handle);
            trace!(%handle, cancelled, "Cleared pending eviction for persistent insert");
        }

        let previous = self.inner.store.put(key, value);
        self.inner.counters.puts.fetch_add(1, Ordering::Relaxed);

        previous
    }

    /// Returns the value for `key`, if present.
    pub fn get(&self, key: &K) -> Option<V> {
        self.inner.store.get(key)
    }

    /// Returns `true` if `key` has a value.
    pub fn contains_key(&self, key: &K) -> bool {
        self.inner.store.contains_key(key)
    }

    /// Removes `key` and cancels its pending eviction.
    ///
    /// Returns the removed value. A missing key yields `None`.
    pub fn remove(&self, key: &K) -> Option<V> {
        let mut pending = self.inner.lock_pending(key);

        let removed = self.inner.store.remove(key);
        if let Some(handle) = pending.remove(key) {
            let cancelled = self.scheduler.cancel(handle);
            trace!(%handle, cancelled, "Cancelled pending eviction on remove");
        }

        if removed.is_some() {
            self.inner.counters.removes.fetch_add(1, Ordering::Relaxed);
        }

        removed
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.inner.store.len()
    }

    /// Returns `true` if the map holds no entries.
    pub fn is_empty(&self) -> bool {
        self.inner.store.is_empty()
    }

    /// Returns the number of keys with a scheduled eviction.
    pub fn pending_evictions(&self) -> usize {
        self.inner.pending.iter().map(|shard| shard.lock().len()).sum()
    }

    /// Returns the scheduler this map uses.
    pub fn scheduler(&self) -> &Arc<ExpirationScheduler> {
        &self.scheduler
    }

    /// Returns map statistics.
    pub fn stats(&self) -> MapStats {
        let c = &self.inner.counters;
        MapStats {
            puts: c.puts.load(Ordering::Relaxed),
            removes: c.removes.load(Ordering::Relaxed),
            evictions: c.evictions.load(Ordering::Relaxed),
            stale_evictions: c.stale_evictions.load(Ordering::Relaxed),
            scheduling_failures: c.scheduling_failures.load(Ordering::Relaxed),
        }
    }
}

impl<K, V, S> ExpirableMap<K, V, S>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: PartialEq + Send + Sync + 'static,
    S: EntryStore<K, V> + 'static,
{
    /// Removes `key` only if its current value equals `expected`, cancelling
    /// its pending eviction in that case.
    ///
    /// Returns `true` iff the entry was removed. If `expected`'s `PartialEq`
    /// panics, the panic propagates and the map is left unchanged.
    pub fn remove_if(&self, key: &K, expected: &V) -> bool {
        let mut pending = self.inner.lock_pending(key);

        if !self.inner.store.remove_if(key, expected) {
            return false;
        }

        if let Some(handle) = pending.remove(key) {
            let cancelled = self.scheduler.cancel(handle);
            trace!(%handle, cancelled, "Cancelled pending eviction on conditional remove");
        }
        self.inner.counters.removes.fetch_add(1, Ordering::Relaxed);

        true
    }
}

impl<K, V, S> Drop for ExpirableMap<K, V, S> {
    fn drop(&mut self) {
        // Give the scheduler capacity back; fired tasks would be no-ops anyway.
        let mut cancelled = 0usize;
        for shard in &self.inner.pending {
            for (_, handle) in shard.lock().drain() {
                if self.scheduler.cancel(handle) {
                    cancelled += 1;
                }
            }
        }

        if cancelled > 0 {
            debug!(cancelled, "Cancelled pending evictions of dropped map");
        }
    }
}
