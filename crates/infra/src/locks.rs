//! Per-key mutual exclusion for read-modify-write sequences.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use crate::error::{EngineError, EngineResult};

/// A registry of one mutex per key.
///
/// [`KeyedLocks::with_locked`] takes every requested key in ascending order,
/// so two callers locking overlapping key sets (a transfer between A and B
/// and one between B and A) cannot deadlock.
#[derive(Debug)]
pub struct KeyedLocks<K> {
    slots: Mutex<HashMap<K, Arc<Mutex<()>>>>,
}

impl<K> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }
}

impl<K> KeyedLocks<K>
where
    K: Clone + Eq + Hash + Ord + core::fmt::Debug,
{
    pub fn new() -> Self {
        Self::default()
    }

    fn slots_for(&self, keys: &[K]) -> EngineResult<Vec<Arc<Mutex<()>>>> {
        let mut slots = self
            .slots
            .lock()
            .map_err(|_| EngineError::Lock("lock registry".to_string()))?;
        Ok(keys
            .iter()
            .map(|k| Arc::clone(slots.entry(k.clone()).or_default()))
            .collect())
    }

    /// Run `f` while holding the locks of all `keys`.
    pub fn with_locked<R>(
        &self,
        keys: impl IntoIterator<Item = K>,
        f: impl FnOnce() -> R,
    ) -> EngineResult<R> {
        let mut keys: Vec<K> = keys.into_iter().collect();
        keys.sort();
        keys.dedup();

        let slots = self.slots_for(&keys)?;
        let mut guards = Vec::with_capacity(slots.len());
        for (key, slot) in keys.iter().zip(&slots) {
            guards.push(
                slot.lock()
                    .map_err(|_| EngineError::Lock(format!("{key:?}")))?,
            );
        }

        let out = f();
        drop(guards);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::thread;

    #[test]
    fn duplicate_keys_do_not_self_deadlock() {
        let locks = KeyedLocks::new();
        let out = locks.with_locked(vec![3, 1, 3], || 42).unwrap();
        assert_eq!(out, 42);
    }

    #[test]
    fn overlapping_key_sets_serialize() {
        let locks = Arc::new(KeyedLocks::new());
        let counter = Arc::new(AtomicI64::new(0));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let locks = Arc::clone(&locks);
                let counter = Arc::clone(&counter);
                thread::spawn(move || {
                    let keys = if i % 2 == 0 { vec!["a", "b"] } else { vec!["b", "a"] };
                    for _ in 0..100 {
                        locks
                            .with_locked(keys.clone(), || {
                                // Non-atomic read-modify-write guarded by the lock.
                                let v = counter.load(Ordering::Relaxed);
                                counter.store(v + 1, Ordering::Relaxed);
                            })
                            .unwrap();
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(counter.load(Ordering::Relaxed), 800);
    }
}
