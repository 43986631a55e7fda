//! Per-key async locks.
//!
//! Mutations on the same notification (or friend request) are serialized in
//! arrival order; mutations on different keys run concurrently. Entries are
//! dropped from the map once nobody holds or waits on them.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

pub(crate) struct KeyedLocks<K> {
    slots: Arc<Mutex<HashMap<K, Arc<AsyncMutex<()>>>>>,
}

impl<K> KeyedLocks<K>
where
    K: Eq + Hash + Ord + Clone,
{
    pub(crate) fn new() -> Self {
        Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Wait for exclusive access to `key`. tokio's mutex is fair, so waiters
    /// are served in the order they called this.
    pub(crate) async fn lock(&self, key: K) -> KeyGuard<K> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(slots.entry(key.clone()).or_default())
        };
        let guard = slot.lock_owned().await;
        KeyGuard {
            key: Some(key),
            guard: Some(guard),
            slots: Arc::clone(&self.slots),
        }
    }

    /// Lock several keys. Keys are taken in sorted order so two callers with
    /// overlapping sets cannot deadlock.
    pub(crate) async fn lock_many(&self, mut keys: Vec<K>) -> Vec<KeyGuard<K>> {
        keys.sort();
        keys.dedup();
        let mut guards = Vec::with_capacity(keys.len());
        for key in keys {
            guards.push(self.lock(key).await);
        }
        guards
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

pub(crate) struct KeyGuard<K: Eq + Hash> {
    key: Option<K>,
    guard: Option<OwnedMutexGuard<()>>,
    slots: Arc<Mutex<HashMap<K, Arc<AsyncMutex<()>>>>>,
}

impl<K: Eq + Hash> Drop for KeyGuard<K> {
    fn drop(&mut self) {
        // Release first so the strong count below reflects waiters only.
        drop(self.guard.take());
        let Some(key) = self.key.take() else {
            return;
        };
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        // One reference is the map's own; anything more is a waiter.
        if slots.get(&key).is_some_and(|slot| Arc::strong_count(slot) == 1) {
            slots.remove(&key);
        }
    }
}
