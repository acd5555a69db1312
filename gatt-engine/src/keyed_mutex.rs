//! Named mutual-exclusion locks
//!
//! A [`KeyedMutex`] hands out one fair async mutex per name. Holding the
//! [`LockHandle`] for a name excludes every other caller of that name;
//! dropping it wakes the next waiter in arrival order.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::trace;

/// Registry of named locks, created lazily on first use
#[derive(Debug, Default)]
pub struct KeyedMutex {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl KeyedMutex {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, name: &str) -> Arc<Mutex<()>> {
        if let Some(lock) = self.locks.get(name) {
            return Arc::clone(&lock);
        }
        // the map guard must not live across the await in `acquire`
        Arc::clone(&self.locks.entry(name.to_string()).or_default())
    }

    /// Wait until no one else holds `name`, then take it.
    ///
    /// Waiters are served in FIFO order. Not reentrant: acquiring a name the
    /// caller already holds never completes.
    pub async fn acquire(&self, name: &str) -> LockHandle {
        let lock = self.lock_for(name);
        trace!(lock = name, "Waiting for lock");
        let guard = lock.lock_owned().await;
        trace!(lock = name, "Lock acquired");

        LockHandle {
            name: name.to_string(),
            _guard: guard,
        }
    }

    /// Take `name` only if it is free right now
    pub fn try_acquire(&self, name: &str) -> Option<LockHandle> {
        let guard = self.lock_for(name).try_lock_owned().ok()?;
        Some(LockHandle {
            name: name.to_string(),
            _guard: guard,
        })
    }

    /// Whether someone currently holds `name`
    pub fn is_locked(&self, name: &str) -> bool {
        self.locks
            .get(name)
            .is_some_and(|lock| lock.try_lock().is_err())
    }

    /// Number of names ever acquired
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Exclusive ownership of a named lock, released on drop
#[derive(Debug)]
pub struct LockHandle {
    name: String,
    _guard: OwnedMutexGuard<()>,
}

impl LockHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Release the lock now instead of at end of scope
    pub fn release(self) {
        trace!(lock = %self.name, "Lock released");
    }
}
