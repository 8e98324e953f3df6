//! Per-key async mutual exclusion.
//!
//! Registries use this to make get-or-create atomic per key without holding
//! their map lock across the (slow) create step; the pipeline uses it to
//! open at most one PR per issue workspace. Entries are dropped once no
//! task holds or waits on them.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

/// A table of lazily created async locks, one per key.
#[derive(Debug)]
pub(crate) struct KeyedLocks<K> {
    locks: Mutex<HashMap<K, Arc<tokio::sync::Mutex<()>>>>,
}

impl<K> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    /// Runs `f` while holding the lock for `key`.
    pub(crate) async fn run<T, F>(&self, key: &K, f: F) -> T
    where
        F: Future<Output = T>,
    {
        let lock = self.acquire_handle(key);
        let out = {
            let _held = lock.lock().await;
            f.await
        };
        self.release_handle(key, &lock);
        out
    }

    fn acquire_handle(&self, key: &K) -> Arc<tokio::sync::Mutex<()>> {
        match self.locks.lock() {
            Ok(mut locks) => Arc::clone(locks.entry(key.clone()).or_default()),
            // Poisoned table: fall back to an unshared lock.
            Err(_) => Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    fn release_handle(&self, key: &K, lock: &Arc<tokio::sync::Mutex<()>>) {
        let Ok(mut locks) = self.locks.lock() else {
            return;
        };
        // Table + our handle; anyone else still waiting keeps the entry alive.
        if locks.get(key).is_some_and(|l| Arc::ptr_eq(l, lock)) && Arc::strong_count(lock) <= 2 {
            locks.remove(key);
        }
    }

    /// Number of keys with a live lock entry.
    #[cfg(test)]
    pub(crate) fn active(&self) -> usize {
        self.locks.lock().map(|l| l.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_key_is_serialized() {
        let locks = Arc::new(KeyedLocks::<u32>::default());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let locks = Arc::clone(&locks);
            let inside = Arc::clone(&inside);
            let max_inside = Arc::clone(&max_inside);
            tasks.push(tokio::spawn(async move {
                locks
                    .run(&1, async {
                        let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        max_inside.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        inside.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await;
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
        assert_eq!(locks.active(), 0);
    }

    #[tokio::test]
    async fn test_entries_are_released() {
        let locks = KeyedLocks::<&str>::default();
        let value = locks.run(&"a", async { 5 }).await;
        assert_eq!(value, 5);
        assert_eq!(locks.active(), 0);
    }
}
