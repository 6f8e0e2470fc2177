//! Owned in-memory cache with TTL eviction.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::debug;

/// Bounded map whose entries expire `ttl` after insertion.
///
/// Expired entries are dropped lazily on access and on insert. When the map
/// is full after purging, the oldest entry is evicted.
pub struct TtlCache<K, V> {
    ttl: Duration,
    max_entries: usize,
    entries: Mutex<HashMap<K, (V, Instant)>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            ttl,
            max_entries: max_entries.max(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let mut map = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        match map.get(key) {
            Some((value, inserted)) if inserted.elapsed() < self.ttl => Some(value.clone()),
            Some(_) => {
                map.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, key: K, value: V) {
        let mut map = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        self.make_room(&mut map, &key);
        map.insert(key, (value, Instant::now()));
    }

    /// Return the live value for `key`, creating it with `make` if absent.
    pub fn get_or_insert_with(&self, key: K, make: impl FnOnce() -> V) -> V {
        let mut map = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some((value, inserted)) = map.get(&key) {
            if inserted.elapsed() < self.ttl {
                return value.clone();
            }
        }
        self.make_room(&mut map, &key);
        let value = make();
        map.insert(key, (value.clone(), Instant::now()));
        value
    }

    /// Drop every expired entry, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let mut map = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let before = map.len();
        let ttl = self.ttl;
        map.retain(|_, (_, inserted)| inserted.elapsed() < ttl);
        before - map.len()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn make_room(&self, map: &mut HashMap<K, (V, Instant)>, incoming: &K) {
        if map.contains_key(incoming) || map.len() < self.max_entries {
            return;
        }
        let ttl = self.ttl;
        map.retain(|_, (_, inserted)| inserted.elapsed() < ttl);
        if map.len() >= self.max_entries {
            let oldest = map
                .iter()
                .min_by_key(|(_, (_, inserted))| *inserted)
                .map(|(k, _)| k.clone());
            if let Some(key) = oldest {
                map.remove(&key);
                debug!(entries = map.len(), "Cache full, evicted oldest entry");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let cache = TtlCache::new(Duration::from_secs(60), 10);
        cache.insert("a".to_string(), 1);
        assert_eq!(cache.get(&"a".to_string()), Some(1));
        assert_eq!(cache.get(&"b".to_string()), None);
    }

    #[test]
    fn test_expired_entries_vanish() {
        let cache = TtlCache::new(Duration::ZERO, 10);
        cache.insert(1u32, "x");
        assert_eq!(cache.get(&1), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_get_or_insert_reuses_live_value() {
        let cache = TtlCache::new(Duration::from_secs(60), 10);
        let first = cache.get_or_insert_with("k", || 7);
        let second = cache.get_or_insert_with("k", || 99);
        assert_eq!(first, 7);
        assert_eq!(second, 7);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let cache = TtlCache::new(Duration::from_secs(60), 2);
        cache.insert(1, 'a');
        std::thread::sleep(Duration::from_millis(2));
        cache.insert(2, 'b');
        cache.insert(3, 'c');
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&1), None);
        assert_eq!(cache.get(&3), Some('c'));
    }

    #[test]
    fn test_purge_expired() {
        let cache = TtlCache::new(Duration::ZERO, 10);
        cache.insert(1, ());
        cache.insert(2, ());
        assert_eq!(cache.purge_expired(), 2);
    }
}
