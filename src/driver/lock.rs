//! Per-Key Lock Registry
//!
//! Mutual exclusion scoped to a single key, without keeping a lock alive for
//! every key a long-running process has ever touched. A registry-wide gate
//! lets whole-store operations such as flush exclude every keyed operation.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

use crate::context::Context;
use crate::error::Result;

type LockMap = DashMap<String, Arc<Mutex<()>>>;

// == Key Locks ==
/// Registry mapping key -> async mutex.
///
/// Entries are created on first access and removed when the last holder
/// releases. Lookup and removal both run under the map's shard lock, so a
/// waiter always shares the holder's mutex; two live mutexes never exist for
/// one key.
///
/// Every key guard also holds the gate shared; [`KeyLocks::exclusive`] holds
/// it alone.
#[derive(Debug, Clone, Default)]
pub struct KeyLocks {
    locks: Arc<LockMap>,
    gate: Arc<RwLock<()>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    // == Acquire ==
    /// Waits for exclusive access to `key`, giving up if `ctx` is cancelled.
    ///
    /// # Arguments
    /// * `ctx` - Cancellation and deadline for the wait
    /// * `key` - The key to lock
    ///
    /// # Returns
    /// - `Ok(KeyGuard)` holding the key until dropped
    /// - `Err(Cancelled | DeadlineExceeded)` if `ctx` ends the wait first
    pub async fn acquire(&self, ctx: &Context, key: &str) -> Result<KeyGuard> {
        // Lock order is gate, then key.
        let shared = ctx
            .run(async { Ok(self.gate.clone().read_owned().await) })
            .await?;

        let mutex = self
            .locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        // A registry handle is built before waiting so an abandoned wait
        // still gets its entry cleaned up on drop.
        let mut guard = KeyGuard {
            key: key.to_string(),
            locks: self.locks.clone(),
            mutex: Some(mutex.clone()),
            held: None,
            _shared: shared,
        };

        let held = ctx.run(async { Ok(mutex.lock_owned().await) }).await?;
        guard.mutex = None;
        guard.held = Some(held);
        Ok(guard)
    }

    // == Exclusive ==
    /// Waits until no key is held and blocks new keyed operations until the
    /// returned guard is dropped.
    pub async fn exclusive(&self, ctx: &Context) -> Result<OwnedRwLockWriteGuard<()>> {
        ctx.run(async { Ok(self.gate.clone().write_owned().await) })
            .await
    }

    /// Number of keys with a live lock entry.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

// == Key Guard ==
/// Exclusive access to one key; released on drop.
#[derive(Debug)]
pub struct KeyGuard {
    key: String,
    locks: Arc<LockMap>,
    // Handle kept while waiting, so the count in `drop` is right even when
    // acquisition was abandoned.
    mutex: Option<Arc<Mutex<()>>>,
    held: Option<OwnedMutexGuard<()>>,
    // Declared last so the gate is released after the key.
    _shared: OwnedRwLockReadGuard<()>,
}

impl KeyGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        // The registry holds one reference and this guard holds another;
        // anything above two is a caller still waiting on the same mutex.
        self.locks
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) <= 2);
        // `held` is released after the entry is gone, when fields drop.
    }
}
