//! Thread-Safe Sharded Entry Store
//!
//! This module implements the plain key-value table used underneath the
//! expiring map. It is a concurrent `HashMap` split into independently locked
//! shards.
//!
//! ## Design Decisions
//!
//! 1. **Sharded Locks**: Instead of one big lock, we use multiple shards to reduce contention.
//! 2. **RwLock**: Multiple concurrent readers per shard, exclusive writers.
//! 3. **Capability Trait**: The map only needs `get/put/remove/remove_if`, so that is
//!    all [`EntryStore`] exposes. Bulk operations that could bypass eviction
//!    bookkeeping simply do not exist on the trait.
//!
//! ## Concurrency Model
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      ShardedStore                           │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐           │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │ Shard N │           │
//! │  │ RwLock  │ │ RwLock  │ │ RwLock  │ │ RwLock  │           │
//! │  │ HashMap │ │ HashMap │ │ HashMap │ │ HashMap │           │
//! │  └─────────┘ └─────────┘ └─────────┘ └─────────┘           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Keys are distributed across shards using a hash function.
//! This allows multiple threads to read/write different keys concurrently.

use parking_lot::{RwLock, RwLockUpgradableReadGuard};
use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Default number of shards.
/// More shards = less lock contention, but more memory overhead.
pub const DEFAULT_SHARDS: usize = 64;

/// Maps a key onto one of `shards` buckets.
///
/// The store and the map's pending-eviction table both route keys through
/// this function, so a key lands on the same index in both.
#[inline]
pub fn shard_for<K: Hash + ?Sized>(key: &K, shards: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() as usize) % shards
}

/// The operations an expiring map needs from its backing table.
///
/// Every method must be safe to call from any number of threads at once.
/// A missing key is never an error: lookups and removals report it as `None`
/// or `false`.
pub trait EntryStore<K, V>: Send + Sync {
    /// Returns a clone of the value stored under `key`.
    fn get(&self, key: &K) -> Option<V>;

    /// Stores `value` under `key`, returning the value it replaced.
    fn put(&self, key: K, value: V) -> Option<V>;

    /// Removes `key`, returning the value it held.
    fn remove(&self, key: &K) -> Option<V>;

    /// Removes `key` only if its current value equals `expected`.
    ///
    /// Returns `true` iff an entry was removed.
    fn remove_if(&self, key: &K, expected: &V) -> bool;

    /// Returns `true` if `key` currently has a value.
    fn contains_key(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Returns the number of stored entries.
    fn len(&self) -> usize;

    /// Returns `true` if the store holds no entries.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A single shard containing a portion of the key-value pairs.
#[derive(Debug)]
struct Shard<K, V> {
    data: RwLock<HashMap<K, V>>,
}

impl<K, V> Shard<K, V> {
    fn new() -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
        }
    }
}

/// The default [`EntryStore`]: a hash map split into [`DEFAULT_SHARDS`]
/// independently locked shards.
///
/// # Example
///
/// ```
/// use ttlmap::storage::{EntryStore, ShardedStore};
///
/// let store = ShardedStore::with_shards(8);
/// store.put(1u32, "one");
/// assert_eq!(store.put(1, "uno"), Some("one"));
/// assert_eq!(store.remove(&1), Some("uno"));
/// assert_eq!(store.remove(&1), None);
/// ```
pub struct ShardedStore<K, V> {
    shards: Vec<Shard<K, V>>,

    /// Number of live entries, kept exact under the shard write locks
    key_count: AtomicUsize,
}

impl<K, V> std::fmt::Debug for ShardedStore<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardedStore")
            .field("shards", &self.shards.len())
            .field("key_count", &self.key_count.load(Ordering::Relaxed))
            .finish()
    }
}

impl<K, V> Default for ShardedStore<K, V> {
    fn default() -> Self {
        Self::with_shards(DEFAULT_SHARDS)
    }
}

impl<K, V> ShardedStore<K, V> {
    /// Creates a store with [`DEFAULT_SHARDS`] shards.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store with `shards` shards (at least one).
    pub fn with_shards(shards: usize) -> Self {
        let shards = (0..shards.max(1)).map(|_| Shard::new()).collect();

        Self {
            shards,
            key_count: AtomicUsize::new(0),
        }
    }

    /// Returns the number of shards.
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }
}

impl<K: Hash, V> ShardedStore<K, V> {
    /// Gets the shard for a given key.
    #[inline]
    fn get_shard(&self, key: &K) -> &Shard<K, V> {
        &self.shards[shard_for(key, self.shards.len())]
    }
}

impl<K, V> EntryStore<K, V> for ShardedStore<K, V>
where
    K: Hash + Eq + Send + Sync,
    V: Clone + PartialEq + Send + Sync,
{
    fn get(&self, key: &K) -> Option<V> {
        let data = self.get_shard(key).data.read();
        data.get(key).cloned()
    }

    fn put(&self, key: K, value: V) -> Option<V> {
        let mut data = self.get_shard(&key).data.write();

        let previous = data.insert(key, value);
        if previous.is_none() {
            self.key_count.fetch_add(1, Ordering::Relaxed);
        }

        previous
    }

    fn remove(&self, key: &K) -> Option<V> {
        let mut data = self.get_shard(key).data.write();

        let removed = data.remove(key);
        if removed.is_some() {
            self.key_count.fetch_sub(1, Ordering::Relaxed);
        }

        removed
    }

    fn remove_if(&self, key: &K, expected: &V) -> bool {
        // Compare while readers of other keys keep going; the comparison may
        // panic inside user code and nothing is mutated before it returns.
        let data = self.get_shard(key).data.upgradable_read();
        if !data.get(key).map(|v| v == expected).unwrap_or(false) {
            return false;
        }

        let mut data = RwLockUpgradableReadGuard::upgrade(data);
        data.remove(key);
        self.key_count.fetch_sub(1, Ordering::Relaxed);

        true
    }

    fn contains_key(&self, key: &K) -> bool {
        self.get_shard(key).data.read().contains_key(key)
    }

    fn len(&self) -> usize {
        self.key_count.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_put_and_get() {
        let store = ShardedStore::new();
        assert_eq!(store.put("name".to_string(), "Ariz".to_string()), None);
        assert_eq!(store.get(&"name".to_string()), Some("Ariz".to_string()));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_get_nonexistent() {
        let store: ShardedStore<String, String> = ShardedStore::new();
        assert_eq!(store.get(&"missing".to_string()), None);
        assert!(!store.contains_key(&"missing".to_string()));
    }

    #[test]
    fn test_put_returns_previous() {
        let store = ShardedStore::new();
        store.put(1, "a");
        assert_eq!(store.put(1, "b"), Some("a"));
        assert_eq!(store.get(&1), Some("b"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_remove() {
        let store = ShardedStore::new();
        store.put(1, 10);
        assert_eq!(store.remove(&1), Some(10));
        assert_eq!(store.remove(&1), None);
        assert!(store.is_empty());
    }

    #[test]
    fn test_remove_if() {
        let store = ShardedStore::new();
        store.put("k", 1);

        assert!(!store.remove_if(&"k", &2));
        assert_eq!(store.get(&"k"), Some(1));

        assert!(store.remove_if(&"k", &1));
        assert_eq!(store.get(&"k"), None);
        assert!(!store.remove_if(&"k", &1));
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn test_single_shard() {
        let store = ShardedStore::with_shards(0);
        assert_eq!(store.shard_count(), 1);
        for i in 0..100 {
            store.put(i, i * 2);
        }
        assert_eq!(store.len(), 100);
        assert_eq!(store.get(&42), Some(84));
    }

    #[test]
    fn test_shard_for_is_stable() {
        for shards in [1, 7, 64] {
            let first = shard_for(&"stable-key", shards);
            assert!(first < shards);
            assert_eq!(first, shard_for(&"stable-key", shards));
        }
    }

    #[test]
    fn test_remove_if_comparison_does_not_block_readers() {
        use std::sync::mpsc;
        use std::time::{Duration, Instant};

        #[derive(Debug, Clone)]
        struct Slow(u32);

        impl PartialEq for Slow {
            fn eq(&self, other: &Self) -> bool {
                thread::sleep(Duration::from_millis(500));
                self.0 == other.0
            }
        }

        // One shard, so both keys share a lock
        let store = Arc::new(ShardedStore::with_shards(1));
        store.put("a", Slow(1));
        store.put("b", Slow(2));

        let (started_tx, started_rx) = mpsc::channel();
        let remover = {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                started_tx.send(()).unwrap();
                store.remove_if(&"a", &Slow(99))
            })
        };

        started_rx.recv().unwrap();
        thread::sleep(Duration::from_millis(50));

        let started = Instant::now();
        let value = store.get(&"b").map(|v| v.0);
        assert!(started.elapsed() < Duration::from_millis(250));
        assert_eq!(value, Some(2));

        assert!(!remover.join().unwrap());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_concurrent_access() {
        let store = Arc::new(ShardedStore::new());
        let mut handles = vec![];

        // Spawn multiple writers
        for i in 0..10 {
            let store = Arc::clone(&store);
            handles.push(thread::spawn(move || {
                for j in 0..100 {
                    let key = format!("key-{}-{}", i, j);
                    store.put(key.clone(), j);
                    assert_eq!(store.get(&key), Some(j));
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.len(), 1000);
    }
}
