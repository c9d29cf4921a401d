//! Keyed map container

use std::collections::HashMap;
use std::hash::Hash;

use crate::RwScalarBox;

/// A `HashMap` behind a reader/writer lock
///
/// Lookups and iteration take the shared lock; mutations take the exclusive
/// lock. `take_key` reads and deletes in one critical section.
#[derive(Debug)]
pub struct MapBox<K, V> {
    inner: RwScalarBox<HashMap<K, V>>,
}

impl<K, V> Default for MapBox<K, V> {
    fn default() -> Self {
        Self {
            inner: RwScalarBox::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash, V> MapBox<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite `key`
    pub fn set_key(&self, key: K, value: V) {
        self.inner.with(|m| {
            m.insert(key, value);
        });
    }

    pub fn has_key(&self, key: &K) -> bool {
        self.inner.read_with(|m| m.contains_key(key))
    }

    /// Remove `key` and return its value, if present
    pub fn take_key(&self, key: &K) -> Option<V> {
        self.inner.with(|m| m.remove(key))
    }

    /// Remove `key`, reporting whether it was present
    pub fn delete_key(&self, key: &K) -> bool {
        self.inner.with(|m| m.remove(key).is_some())
    }

    /// Visit every entry under the shared lock
    ///
    /// The callback must not call back into this map with a mutating method.
    pub fn each(&self, mut f: impl FnMut(&K, &V)) {
        self.inner.read_with(|m| {
            for (k, v) in m {
                f(k, v);
            }
        });
    }

    pub fn len(&self) -> usize {
        self.inner.read_with(HashMap::len)
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read_with(HashMap::is_empty)
    }

    pub fn clear(&self) {
        self.inner.with(HashMap::clear);
    }
}

impl<K: Eq + Hash, V: Clone> MapBox<K, V> {
    /// Clone the value stored at `key`
    pub fn get_key(&self, key: &K) -> Option<V> {
        self.inner.read_with(|m| m.get(key).cloned())
    }
}

impl<K: Eq + Hash + Clone, V: Clone> MapBox<K, V> {
    /// Copy the whole map out so it can be used without the lock
    pub fn snapshot(&self) -> HashMap<K, V> {
        self.inner.get()
    }
}
