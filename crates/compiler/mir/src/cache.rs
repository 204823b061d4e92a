//! # Compute-once caches
//!
//! Descriptors, signatures and snippets are computed at most once per key and
//! then shared read-only between concurrent compilations. The map is a sharded
//! `DashMap`; each entry is a `OnceLock`, so a shard lock is only held to
//! insert an empty cell and never while computing a value.

use std::fmt;
use std::hash::{BuildHasherDefault, Hash};
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use rustc_hash::FxHasher;

type Cells<K, V> = DashMap<K, Arc<OnceLock<V>>, BuildHasherDefault<FxHasher>>;

/// A concurrent map whose values are computed once per key
pub struct OnceCache<K, V> {
    entries: Cells<K, V>,
}

impl<K: Eq + Hash, V> Default for OnceCache<K, V> {
    fn default() -> Self {
        Self {
            entries: DashMap::default(),
        }
    }
}

impl<K: Eq + Hash + fmt::Debug, V: fmt::Debug> fmt::Debug for OnceCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OnceCache")
            .field("entries", &self.entries)
            .finish()
    }
}

impl<K: Eq + Hash + Clone, V: Clone> OnceCache<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached value for `key`, computing it with `init` if no other
    /// caller has done so.
    ///
    /// Concurrent callers for the same key block until the first one finishes
    /// and all observe the same value. `init` must not request the same key.
    pub fn get_or_init(&self, key: K, init: impl FnOnce() -> V) -> V {
        let cell = self.cell(key);
        cell.get_or_init(init).clone()
    }

    /// Returns the value for `key` if it has been computed
    pub fn get(&self, key: &K) -> Option<V> {
        self.entries
            .get(key)
            .and_then(|cell| cell.value().get().cloned())
    }

    /// Number of keys with a computed value
    pub fn len(&self) -> usize {
        self.entries
            .iter()
            .filter(|cell| cell.value().get().is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn cell(&self, key: K) -> Arc<OnceLock<V>> {
        if let Some(cell) = self.entries.get(&key) {
            return Arc::clone(cell.value());
        }
        let cell = self.entries.entry(key).or_default();
        Arc::clone(cell.value())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn test_value_is_computed_once() {
        let cache: OnceCache<u32, String> = OnceCache::new();
        let calls = AtomicUsize::new(0);
        let compute = || {
            calls.fetch_add(1, Ordering::SeqCst);
            "point".to_string()
        };

        assert_eq!(cache.get_or_init(1, compute), "point");
        assert_eq!(cache.get_or_init(1, || unreachable!()), "point");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&2), None);
    }

    #[test]
    fn test_concurrent_initialization() {
        let cache: OnceCache<u32, usize> = OnceCache::new();
        let calls = AtomicUsize::new(0);

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    let value = cache.get_or_init(7, || {
                        calls.fetch_add(1, Ordering::SeqCst);
                        42
                    });
                    assert_eq!(value, 42);
                });
            }
        });

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
