//! Per-identifier mutual exclusion.
//!
//! Ingestion reads a log's head and then prepends to it; two such sequences
//! on the same source must not interleave. [`KeyedLocks`] hands out one
//! async mutex per identifier and forgets it once nobody holds or waits on it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::OwnedMutexGuard;

/// One identifier's lock and the number of holders and waiters using it.
#[derive(Default)]
struct Slot {
    mutex: Arc<tokio::sync::Mutex<()>>,
    users: usize,
}

type LockMap = HashMap<String, Slot>;

/// A set of async locks keyed by source identifier.
#[derive(Clone, Default)]
pub struct KeyedLocks {
    inner: Arc<Mutex<LockMap>>,
}

/// A registered holder or waiter of one identifier.
///
/// Dropping it, whether after the lock was released or while still
/// waiting, forgets the identifier once no other user remains.
struct Claim {
    key: String,
    map: Arc<Mutex<LockMap>>,
}

/// Held lock for one identifier. Dropping it releases the lock.
pub struct KeyGuard {
    // Fields drop in order: release the lock, then give up the claim.
    _guard: OwnedMutexGuard<()>,
    _claim: Claim,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`.
    ///
    /// Cancelling the returned future before it resolves leaves no entry behind.
    pub async fn lock(&self, key: &str) -> KeyGuard {
        let (mutex, claim) = {
            let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            let slot = map.entry(key.to_string()).or_default();
            slot.users += 1;
            let claim = Claim {
                key: key.to_string(),
                map: Arc::clone(&self.inner),
            };
            (Arc::clone(&slot.mutex), claim)
        };
        let guard = mutex.lock_owned().await;

        KeyGuard {
            _guard: guard,
            _claim: claim,
        }
    }

    /// Number of identifiers currently locked or awaited.
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for Claim {
    fn drop(&mut self) {
        let mut map = self.map.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(slot) = map.get_mut(&self.key) {
            slot.users = slot.users.saturating_sub(1);
            if slot.users == 0 {
                map.remove(&self.key);
            }
        }
    }
}
