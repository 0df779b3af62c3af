use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// One async mutex per key. Waiters on the same key are served in arrival
/// order (tokio mutexes are fair); different keys never wait on each other.
pub struct KeyedLocks<K> {
    slots: Mutex<HashMap<K, Arc<AsyncMutex<()>>>>,
}

impl<K> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self { slots: Mutex::new(HashMap::new()) }
    }
}

impl<K> KeyedLocks<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, key: &K) -> KeyGuard {
        let slot = self.with_slots(|slots| {
            Self::prune_idle(slots);
            Arc::clone(slots.entry(key.clone()).or_insert_with(|| Arc::new(AsyncMutex::new(()))))
        });
        KeyGuard { _guard: slot.lock_owned().await }
    }

    /// Removes entries nobody holds or waits on.
    pub fn prune(&self) -> usize {
        self.with_slots(Self::prune_idle)
    }

    pub fn len(&self) -> usize {
        self.with_slots(|slots| slots.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn prune_idle(slots: &mut HashMap<K, Arc<AsyncMutex<()>>>) -> usize {
        let before = slots.len();
        slots.retain(|_, slot| Arc::strong_count(slot) > 1);
        before - slots.len()
    }

    fn with_slots<T>(&self, apply: impl FnOnce(&mut HashMap<K, Arc<AsyncMutex<()>>>) -> T) -> T {
        match self.slots.lock() {
            Ok(mut slots) => apply(&mut slots),
            Err(poisoned) => apply(&mut poisoned.into_inner()),
        }
    }
}

/// Held for the whole turn; dropping it admits the next waiter for the key.
pub struct KeyGuard {
    _guard: OwnedMutexGuard<()>,
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::sync::Mutex;

    use super::KeyedLocks;

    #[tokio::test]
    async fn same_key_runs_in_arrival_order() {
        let locks = Arc::new(KeyedLocks::<String>::new());
        let order = Arc::new(Mutex::new(Vec::new()));

        let first = locks.acquire(&"acme/tg-1".to_string()).await;
        let mut handles = Vec::new();
        for index in 0..3 {
            let locks = Arc::clone(&locks);
            let order = Arc::clone(&order);
            handles.push(tokio::spawn(async move {
                let _guard = locks.acquire(&"acme/tg-1".to_string()).await;
                order.lock().await.push(index);
            }));
            // Let each task enqueue before the next one is spawned.
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        drop(first);
        for handle in handles {
            handle.await.expect("task");
        }

        assert_eq!(*order.lock().await, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn distinct_keys_do_not_block_each_other() {
        let locks = KeyedLocks::<&'static str>::new();
        let _held = locks.acquire(&"acme/tg-1").await;
        let other =
            tokio::time::timeout(Duration::from_millis(50), locks.acquire(&"acme/wa-1")).await;
        assert!(other.is_ok());
    }

    #[tokio::test]
    async fn idle_entries_are_pruned() {
        let locks = KeyedLocks::<&'static str>::new();
        {
            let _a = locks.acquire(&"a").await;
            let _b = locks.acquire(&"b").await;
            assert_eq!(locks.len(), 2);
            assert_eq!(locks.prune(), 0);
        }
        assert_eq!(locks.prune(), 2);
        assert!(locks.is_empty());
    }
}
