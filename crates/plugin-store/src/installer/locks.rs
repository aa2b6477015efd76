use crate::error::{StoreError, StoreResult};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type LockTable = Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>;

/// One lock per plugin key; lifecycle calls on the same key never overlap.
#[derive(Debug, Default)]
pub struct InstallLocks {
    locks: LockTable,
}

/// Held for the duration of one lifecycle call. Dropping the last guard of a key
/// removes its entry from the table.
pub struct PluginLockGuard {
    key: String,
    table: LockTable,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for PluginLockGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = match self.table.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        // Entries are cloned under the table lock, so a count of one means nobody
        // else is about to take this mutex.
        let idle = locks
            .get(&self.key)
            .map(|lock| Arc::strong_count(lock) == 1)
            .unwrap_or(false);
        if idle {
            locks.remove(&self.key);
        }
    }
}

impl InstallLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lock for `key` without waiting; a held lock means another request is
    /// already working on this plugin.
    pub fn try_acquire(&self, key: &str) -> StoreResult<PluginLockGuard> {
        let lock = {
            let mut locks = match self.locks.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            locks
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };

        match lock.try_lock_owned() {
            Ok(guard) => Ok(PluginLockGuard {
                key: key.to_string(),
                table: self.locks.clone(),
                guard: Some(guard),
            }),
            Err(_) => {
                log::warn!("Plugin {} is busy, rejecting concurrent operation", key);
                Err(StoreError::InstallInProgress {
                    key: key.to_string(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracked(locks: &InstallLocks) -> usize {
        locks.locks.lock().unwrap().len()
    }

    #[test]
    fn second_acquire_on_same_key_is_rejected() {
        let locks = InstallLocks::new();
        let first = locks.try_acquire("Demo").unwrap();
        assert!(matches!(
            locks.try_acquire("Demo"),
            Err(StoreError::InstallInProgress { .. })
        ));
        // other keys are independent
        assert!(locks.try_acquire("Other").is_ok());

        drop(first);
        assert!(locks.try_acquire("Demo").is_ok());
    }

    #[test]
    fn finished_keys_leave_the_table() {
        let locks = InstallLocks::new();
        let demo = locks.try_acquire("Demo").unwrap();
        let other = locks.try_acquire("Other").unwrap();
        assert_eq!(tracked(&locks), 2);

        drop(demo);
        assert_eq!(tracked(&locks), 1);
        drop(other);
        assert_eq!(tracked(&locks), 0);
    }

    #[test]
    fn rejected_attempt_does_not_evict_the_holder() {
        let locks = InstallLocks::new();
        let held = locks.try_acquire("Demo").unwrap();
        assert!(locks.try_acquire("Demo").is_err());
        assert_eq!(tracked(&locks), 1);
        assert!(locks.try_acquire("Demo").is_err());
        drop(held);
        assert_eq!(tracked(&locks), 0);
    }
}
