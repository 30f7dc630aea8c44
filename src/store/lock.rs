//! Per-session mutual exclusion.
//!
//! Every mutation of a session funnels through [`SessionLocks::with_lock`].
//! Waiters on the same session queue FIFO on a fair mutex; operations on
//! different sessions proceed in parallel. A registry entry is removed once
//! its last waiter departs, so idle sessions hold no memory.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::types::SessionId;

struct LockEntry {
    mutex: Mutex<()>,
    waiters: AtomicUsize,
}

/// Registry of per-session locks. This is the sole concurrency boundary in
/// the store; the log and cache are only mutated while a session's lock is
/// held.
#[derive(Default)]
pub struct SessionLocks {
    entries: DashMap<SessionId, Arc<LockEntry>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` while holding this session's lock. Acquisition order is the
    /// order in which callers arrive at the lock.
    pub async fn with_lock<T, F, Fut>(&self, session_id: &SessionId, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        // The waiter count is bumped while the map shard is still locked,
        // so a concurrent departure cannot delete the entry under us.
        let entry = {
            let slot = self
                .entries
                .entry(session_id.clone())
                .or_insert_with(|| {
                    Arc::new(LockEntry {
                        mutex: Mutex::new(()),
                        waiters: AtomicUsize::new(0),
                    })
                });
            slot.waiters.fetch_add(1, Ordering::SeqCst);
            Arc::clone(slot.value())
        };

        let _waiter = WaiterGuard {
            locks: self,
            session_id,
            entry: Arc::clone(&entry),
        };
        let _guard = entry.mutex.lock().await;
        f().await
    }

    /// Number of sessions currently locked or waited on.
    pub fn active(&self) -> usize {
        self.entries.len()
    }
}

/// Departs the lock queue on drop, covering early cancellation as well as
/// the normal path.
struct WaiterGuard<'a> {
    locks: &'a SessionLocks,
    session_id: &'a SessionId,
    entry: Arc<LockEntry>,
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        if self.entry.waiters.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.locks
                .entries
                .remove_if(self.session_id, |_, entry| {
                    entry.waiters.load(Ordering::SeqCst) == 0
                });
        }
    }
}
