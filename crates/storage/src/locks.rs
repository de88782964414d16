//! Per-key build serialisation.
//!
//! Concurrent requests for the same artifact take the same lock; whoever gets
//! it second re-checks the cache and finds the first one's output. Entries are
//! dropped from the registry as soon as nobody holds or waits on them. A
//! waiter cancelled right after being handed the lock can leave one behind;
//! those are pruned on the next [`lock`](KeyedLocks::lock).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type Registry = Arc<Mutex<HashMap<PathBuf, Arc<AsyncMutex<()>>>>>;

#[derive(Clone, Default)]
pub struct KeyedLocks {
    registry: Registry,
}

/// Held for as long as the caller is working on `key`.
pub struct KeyGuard {
    key: PathBuf,
    registry: Registry,
    guard: Option<OwnedMutexGuard<()>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no one else holds `key`, then hold it.
    pub async fn lock(&self, key: impl AsRef<Path>) -> KeyGuard {
        let key = key.as_ref().to_path_buf();
        let mutex = {
            let mut map = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
            // New references are only handed out under this lock, so a count
            // of one can't go up behind our back.
            map.retain(|_, mutex| Arc::strong_count(mutex) > 1);
            map.entry(key.clone()).or_default().clone()
        };
        let guard = mutex.lock_owned().await;
        KeyGuard { key, registry: self.registry.clone(), guard: Some(guard) }
    }

    /// Number of keys currently held or waited on.
    pub fn len(&self) -> usize {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyGuard {
    pub fn key(&self) -> &Path {
        &self.key
    }
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut map = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        // Only the registry's own reference left: nobody is waiting.
        if map.get(&self.key).is_some_and(|mutex| Arc::strong_count(mutex) == 1) {
            map.remove(&self.key);
        }
    }
}
