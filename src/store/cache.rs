//! Fingerprint-validated LRU cache of built tree indices.
//!
//! The cache never serves a tree whose stored fingerprint differs from the
//! log's current one. The fingerprint is taken before the log is read, so a
//! write racing a rebuild can only make the stored entry look stale early,
//! never let it validate against data it does not contain.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use super::StoreResult;
use super::log::{LogFingerprint, MessageLog};
use crate::tree::TreeIndex;
use crate::types::SessionId;

struct CacheSlot {
    fingerprint: LogFingerprint,
    tree: Arc<TreeIndex>,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<SessionId, CacheSlot>,
    /// Most recently used first.
    order: Vec<SessionId>,
}

/// Bounded cache of [`TreeIndex`] values keyed by session.
pub struct TreeCache {
    log: Arc<dyn MessageLog>,
    capacity: usize,
    state: Mutex<CacheState>,
}

impl TreeCache {
    pub fn new(log: Arc<dyn MessageLog>, capacity: usize) -> Self {
        Self {
            log,
            capacity: capacity.max(1),
            state: Mutex::new(CacheState::default()),
        }
    }

    /// Current tree for the session, rebuilt from the log when the cached
    /// fingerprint no longer matches.
    pub async fn get(&self, session_id: &SessionId) -> StoreResult<Arc<TreeIndex>> {
        let fingerprint = self.log.fingerprint(session_id).await?;

        {
            let mut state = self.state.lock().await;
            if let Some(slot) = state.entries.get(session_id)
                && slot.fingerprint == fingerprint
            {
                let tree = Arc::clone(&slot.tree);
                touch(&mut state.order, session_id);
                return Ok(tree);
            }
        }

        // Rebuild outside the cache lock; reads of other sessions keep
        // hitting while this one rebuilds.
        let records = self.log.read_all(session_id).await?;
        let tree = Arc::new(TreeIndex::build(records));
        tracing::debug!(session = %session_id, messages = tree.len(), "Rebuilt tree index");

        let mut state = self.state.lock().await;
        state.entries.insert(
            session_id.clone(),
            CacheSlot {
                fingerprint,
                tree: Arc::clone(&tree),
            },
        );
        touch(&mut state.order, session_id);
        while state.order.len() > self.capacity {
            if let Some(evicted) = state.order.pop() {
                state.entries.remove(&evicted);
                tracing::debug!(session = %evicted, "Evicted tree cache entry");
            }
        }

        Ok(tree)
    }

    /// Drop the session's entry; the next `get` rebuilds. Called by every
    /// mutation before its session lock is released.
    pub async fn invalidate(&self, session_id: &SessionId) {
        let mut state = self.state.lock().await;
        state.entries.remove(session_id);
        state.order.retain(|id| id != session_id);
        tracing::debug!(session = %session_id, "Invalidated tree cache entry");
    }

    /// Number of cached sessions.
    pub async fn size(&self) -> usize {
        self.state.lock().await.entries.len()
    }
}

fn touch(order: &mut Vec<SessionId>, session_id: &SessionId) {
    order.retain(|id| id != session_id);
    order.insert(0, session_id.clone());
}
