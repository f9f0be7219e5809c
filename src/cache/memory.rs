// Quran Core - Download and caching engine for Quran apps
// Copyright (C) 2025 Quran Core contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


//! Count-limited in-memory cache

use crate::error::{QuranError, Result};
use crate::sync::lock;
use lru::LruCache;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::Mutex;

/// Thread-safe LRU cache bounded by item count
pub struct Cache<K: Hash + Eq, V> {
    entries: Mutex<LruCache<K, V>>,
}

impl<K: Hash + Eq, V: Clone> Cache<K, V> {
    pub fn new(count_limit: usize) -> Result<Self> {
        let limit = NonZeroUsize::new(count_limit).ok_or_else(|| {
            QuranError::InvalidConfiguration("cache count limit must be at least 1".to_string())
        })?;
        Ok(Self {
            entries: Mutex::new(LruCache::new(limit)),
        })
    }

    /// Cached value, marking it most recently used
    pub fn object(&self, key: &K) -> Option<V> {
        lock(&self.entries).get(key).cloned()
    }

    /// Insert a value, evicting the least recently used one when full
    pub fn set_object(&self, key: K, value: V) {
        lock(&self.entries).put(key, value);
    }

    pub fn remove_object(&self, key: &K) -> Option<V> {
        lock(&self.entries).pop(key)
    }

    pub fn remove_all(&self) {
        lock(&self.entries).clear();
    }

    pub fn contains(&self, key: &K) -> bool {
        lock(&self.entries).contains(key)
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.entries).is_empty()
    }

    pub fn count_limit(&self) -> usize {
        lock(&self.entries).cap().get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_limit_rejected() {
        assert!(matches!(
            Cache::<u32, String>::new(0),
            Err(QuranError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let cache = Cache::new(2).unwrap();
        cache.set_object(1, "one");
        cache.set_object(2, "two");

        // Touch 1 so that 2 becomes the eviction candidate
        assert_eq!(cache.object(&1), Some("one"));
        cache.set_object(3, "three");

        assert!(cache.contains(&1));
        assert!(!cache.contains(&2));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_remove() {
        let cache = Cache::new(4).unwrap();
        cache.set_object("a", 1);
        cache.set_object("b", 2);

        assert_eq!(cache.remove_object(&"a"), Some(1));
        assert_eq!(cache.object(&"a"), None);

        cache.remove_all();
        assert!(cache.is_empty());
        assert_eq!(cache.count_limit(), 4);
    }
}
