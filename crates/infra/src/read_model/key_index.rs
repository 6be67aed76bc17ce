use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, RwLock};

/// Key/value index from a natural key (invoice number, phone, ...) to an
/// aggregate id.
///
/// Indexes can always be rebuilt from the event streams; they are never the
/// source of truth.
pub trait KeyIndex<K, V>: Send + Sync {
    fn get(&self, key: &K) -> Option<V>;
    fn upsert(&self, key: K, value: V);
    /// Insert only when the key is free. Returns the existing value otherwise.
    fn insert_if_absent(&self, key: K, value: V) -> Result<(), V>;
    fn remove(&self, key: &K) -> Option<V>;
    fn values(&self) -> Vec<V>;
}

impl<K, V, S> KeyIndex<K, V> for Arc<S>
where
    S: KeyIndex<K, V> + ?Sized,
{
    fn get(&self, key: &K) -> Option<V> {
        (**self).get(key)
    }

    fn upsert(&self, key: K, value: V) {
        (**self).upsert(key, value)
    }

    fn insert_if_absent(&self, key: K, value: V) -> Result<(), V> {
        (**self).insert_if_absent(key, value)
    }

    fn remove(&self, key: &K) -> Option<V> {
        (**self).remove(key)
    }

    fn values(&self) -> Vec<V> {
        (**self).values()
    }
}

#[derive(Debug)]
pub struct InMemoryKeyIndex<K, V> {
    inner: RwLock<HashMap<K, V>>,
}

impl<K, V> InMemoryKeyIndex<K, V> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }
}

impl<K, V> Default for InMemoryKeyIndex<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> KeyIndex<K, V> for InMemoryKeyIndex<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn get(&self, key: &K) -> Option<V> {
        let map = self.inner.read().ok()?;
        map.get(key).cloned()
    }

    fn upsert(&self, key: K, value: V) {
        if let Ok(mut map) = self.inner.write() {
            map.insert(key, value);
        }
    }

    fn insert_if_absent(&self, key: K, value: V) -> Result<(), V> {
        let Ok(mut map) = self.inner.write() else {
            return Err(value);
        };
        match map.get(&key) {
            Some(existing) => Err(existing.clone()),
            None => {
                map.insert(key, value);
                Ok(())
            }
        }
    }

    fn remove(&self, key: &K) -> Option<V> {
        self.inner.write().ok()?.remove(key)
    }

    fn values(&self) -> Vec<V> {
        match self.inner.read() {
            Ok(map) => map.values().cloned().collect(),
            Err(_) => vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_if_absent_keeps_first_value() {
        let index = InMemoryKeyIndex::new();
        assert_eq!(index.insert_if_absent("INV-1".to_string(), 1), Ok(()));
        assert_eq!(index.insert_if_absent("INV-1".to_string(), 2), Err(1));
        assert_eq!(index.get(&"INV-1".to_string()), Some(1));
    }

    #[test]
    fn remove_frees_the_key() {
        let index = InMemoryKeyIndex::new();
        index.upsert(7u32, "a");
        assert_eq!(index.remove(&7), Some("a"));
        assert!(index.values().is_empty());
    }
}
