//! Session store.
//!
//! [`ChatStore`] ties the pieces together: a [`MessageLog`] backend for
//! persistence, a [`SessionLocks`] registry serializing writers per session,
//! and a [`TreeCache`] serving tree indexes to the read path. Mutations
//! follow one discipline: acquire the session lock, mutate the log, update
//! the metadata sidecar, invalidate the cached tree, release. Reads never
//! take the lock.

pub mod cache;
pub mod lock;
pub mod log;
pub mod meta;

pub use cache::TreeCache;
pub use lock::SessionLocks;
pub use log::{
    JsonlConfig, JsonlConfigBuilder, JsonlLog, LogFingerprint, MemoryLog, MessageLog, SyncMode,
};
pub use meta::SessionMeta;

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::{ChatMessage, MessageId, MessagePart, Role, SessionId};
use crate::view::{self, AnchorStrategy, ChatView, ViewRequest};

/// Errors that can occur during store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Storage backend error
    #[error("Storage error: {message}")]
    Storage { message: String },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

// ============================================================================
// Configuration
// ============================================================================

/// Predicate deciding which tools keep their outputs when a view strips
/// tool results. Receives the tool name.
pub type ToolOutputKeep = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Tools whose outputs are small previews the UI always wants inline.
pub const TOOL_OUTPUT_ALLOWLIST: [&str; 3] =
    ["generateImage", "generateVideo", "requestUserInput"];

const DEFAULT_CACHE_CAPACITY: usize = 50;
const DEFAULT_CHAIN_DEPTH_LIMIT: usize = 10_000;

/// Configuration for a [`ChatStore`].
#[derive(Clone)]
pub struct StoreConfig {
    /// Number of sessions whose tree index stays cached.
    pub cache_capacity: usize,
    /// Upper bound on parent-chain walks; bounds corrupt or cyclic logs.
    pub chain_depth_limit: usize,
    /// Which tool outputs survive stripping in assembled views.
    pub tool_output_keep: ToolOutputKeep,
}

impl StoreConfig {
    pub fn builder() -> StoreConfigBuilder {
        StoreConfigBuilder::default()
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            chain_depth_limit: DEFAULT_CHAIN_DEPTH_LIMIT,
            tool_output_keep: Arc::new(|tool| TOOL_OUTPUT_ALLOWLIST.contains(&tool)),
        }
    }
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("cache_capacity", &self.cache_capacity)
            .field("chain_depth_limit", &self.chain_depth_limit)
            .finish_non_exhaustive()
    }
}

/// Builder for StoreConfig.
#[derive(Default)]
pub struct StoreConfigBuilder {
    cache_capacity: Option<usize>,
    chain_depth_limit: Option<usize>,
    tool_output_keep: Option<ToolOutputKeep>,
}

impl StoreConfigBuilder {
    pub fn cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = Some(capacity);
        self
    }

    pub fn chain_depth_limit(mut self, limit: usize) -> Self {
        self.chain_depth_limit = Some(limit);
        self
    }

    pub fn tool_output_keep(mut self, keep: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        self.tool_output_keep = Some(Arc::new(keep));
        self
    }

    pub fn build(self) -> StoreConfig {
        let default = StoreConfig::default();
        StoreConfig {
            cache_capacity: self.cache_capacity.unwrap_or(default.cache_capacity),
            chain_depth_limit: self.chain_depth_limit.unwrap_or(default.chain_depth_limit),
            tool_output_keep: self.tool_output_keep.unwrap_or(default.tool_output_keep),
        }
    }
}

// ============================================================================
// Results
// ============================================================================

/// Outcome of a subtree deletion.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubtreeDeletion {
    /// Messages removed, the root of the subtree included.
    pub deleted_count: usize,
    /// Parent of the deleted root; where the UI should land afterwards.
    pub parent_id: Option<MessageId>,
}

/// One row of a session listing: the id plus its metadata sidecar, when
/// one exists.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub session_id: SessionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<SessionMeta>,
}

impl SessionInfo {
    fn sort_key(&self) -> (bool, Option<DateTime<Utc>>) {
        (
            self.meta.as_ref().is_some_and(|m| m.pinned),
            self.meta.as_ref().map(|m| m.updated_at),
        )
    }
}

// ============================================================================
// Store
// ============================================================================

/// Branching conversation store over a pluggable log backend.
pub struct ChatStore {
    log: Arc<dyn MessageLog>,
    locks: SessionLocks,
    cache: TreeCache,
    config: StoreConfig,
}

impl ChatStore {
    /// Create a store over an arbitrary log backend.
    pub fn new(log: Arc<dyn MessageLog>, config: StoreConfig) -> Self {
        let cache = TreeCache::new(Arc::clone(&log), config.cache_capacity);
        Self {
            log,
            locks: SessionLocks::new(),
            cache,
            config,
        }
    }

    /// In-memory store, primarily for tests and ephemeral sessions.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryLog::new()), StoreConfig::default())
    }

    /// JSONL-backed store rooted at the configured base directory.
    pub async fn jsonl(config: JsonlConfig) -> StoreResult<Self> {
        let log = JsonlLog::new(config).await?;
        Ok(Self::new(Arc::new(log), StoreConfig::default()))
    }

    /// Backend name for diagnostics.
    pub fn backend_name(&self) -> &str {
        self.log.name()
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Append a message snapshot to a session's log.
    pub async fn append(&self, session_id: &SessionId, message: ChatMessage) -> StoreResult<()> {
        self.locks
            .with_lock(session_id, || async move {
                self.log.append(session_id, &message).await?;
                self.edit_meta(session_id, |meta| meta.message_count += 1)
                    .await?;
                self.cache.invalidate(session_id).await;
                tracing::debug!(
                    session = %session_id,
                    message = %message.id,
                    "Appended message"
                );
                Ok(())
            })
            .await
    }

    /// Replace the parts of an existing message, keeping its identity,
    /// parent, role, kind and timestamp. Returns false when the message
    /// does not exist.
    pub async fn replace_parts(
        &self,
        session_id: &SessionId,
        message_id: &MessageId,
        parts: Vec<MessagePart>,
    ) -> StoreResult<bool> {
        self.locks
            .with_lock(session_id, || async move {
                let records = self.log.read_all(session_id).await?;
                // The last snapshot of an id is the current one.
                let Some(current) = records.iter().rev().find(|r| r.id == *message_id) else {
                    return Ok(false);
                };
                let mut updated = current.clone();
                updated.parts = parts;
                self.log.replace(session_id, &updated).await?;
                self.edit_meta(session_id, |_| {}).await?;
                self.cache.invalidate(session_id).await;
                Ok(true)
            })
            .await
    }

    /// Merge a metadata delta into an existing message. Null values remove
    /// keys. Returns false when the message does not exist.
    pub async fn patch_metadata(
        &self,
        session_id: &SessionId,
        message_id: &MessageId,
        delta: Map<String, Value>,
    ) -> StoreResult<bool> {
        self.locks
            .with_lock(session_id, || async move {
                let records = self.log.read_all(session_id).await?;
                let Some(current) = records.iter().rev().find(|r| r.id == *message_id) else {
                    return Ok(false);
                };
                let mut updated = current.clone();
                updated.merge_metadata(&delta);
                self.log.replace(session_id, &updated).await?;
                self.edit_meta(session_id, |_| {}).await?;
                self.cache.invalidate(session_id).await;
                Ok(true)
            })
            .await
    }

    /// Delete a message and all of its descendants. Returns the number of
    /// removed messages and the former parent, or `None` when the message
    /// does not exist.
    pub async fn delete_subtree(
        &self,
        session_id: &SessionId,
        message_id: &MessageId,
    ) -> StoreResult<Option<SubtreeDeletion>> {
        self.locks
            .with_lock(session_id, || async move {
                let tree = self.cache.get(session_id).await?;
                let Some(target) = tree.get(message_id) else {
                    return Ok(None);
                };
                let parent_id = target.parent_message_id.clone();

                let mut doomed: HashSet<MessageId> = HashSet::new();
                let mut queue = vec![message_id.clone()];
                while let Some(id) = queue.pop() {
                    if !doomed.insert(id.clone()) {
                        continue;
                    }
                    queue.extend(tree.children(Some(&id)).iter().cloned());
                }

                let records = self.log.read_all(session_id).await?;
                let kept: Vec<ChatMessage> = records
                    .into_iter()
                    .filter(|r| !doomed.contains(&r.id))
                    .collect();
                self.log.rewrite(session_id, kept).await?;

                let deleted_count = doomed.len();
                self.edit_meta(session_id, |meta| {
                    meta.message_count = meta.message_count.saturating_sub(deleted_count as u64);
                })
                .await?;
                self.cache.invalidate(session_id).await;
                tracing::debug!(
                    session = %session_id,
                    root = %message_id,
                    deleted = deleted_count,
                    "Deleted subtree"
                );
                Ok(Some(SubtreeDeletion {
                    deleted_count,
                    parent_id,
                }))
            })
            .await
    }

    /// Delete a session's log and metadata. Returns whether a log existed.
    pub async fn delete_session(&self, session_id: &SessionId) -> StoreResult<bool> {
        self.locks
            .with_lock(session_id, || async move {
                let existed = self.log.remove(session_id).await?;
                self.cache.invalidate(session_id).await;
                if existed {
                    tracing::debug!(session = %session_id, "Deleted session");
                }
                Ok(existed)
            })
            .await
    }

    // ========================================================================
    // Session metadata
    // ========================================================================

    /// Read a session's metadata sidecar.
    pub async fn meta(&self, session_id: &SessionId) -> StoreResult<Option<SessionMeta>> {
        self.log.read_meta(session_id).await
    }

    /// Apply an edit to a session's metadata and persist it. Creates the
    /// sidecar when missing.
    pub async fn update_meta<F>(&self, session_id: &SessionId, f: F) -> StoreResult<SessionMeta>
    where
        F: FnOnce(&mut SessionMeta),
    {
        self.locks
            .with_lock(session_id, || async move { self.edit_meta(session_id, f).await })
            .await
    }

    pub async fn set_title(
        &self,
        session_id: &SessionId,
        title: impl Into<String>,
    ) -> StoreResult<SessionMeta> {
        let title = title.into();
        self.update_meta(session_id, |meta| meta.title = Some(title))
            .await
    }

    pub async fn set_pinned(
        &self,
        session_id: &SessionId,
        pinned: bool,
    ) -> StoreResult<SessionMeta> {
        self.update_meta(session_id, |meta| meta.pinned = pinned).await
    }

    /// Record the error shown at the bottom of the session's transcript.
    pub async fn set_last_error(
        &self,
        session_id: &SessionId,
        error: impl Into<String>,
    ) -> StoreResult<SessionMeta> {
        let error = error.into();
        self.update_meta(session_id, |meta| meta.last_error = Some(error))
            .await
    }

    pub async fn clear_last_error(&self, session_id: &SessionId) -> StoreResult<SessionMeta> {
        self.update_meta(session_id, |meta| meta.last_error = None)
            .await
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Every session the backend knows of, pinned sessions first, then by
    /// most recent update. Sessions without a metadata sidecar sort last.
    pub async fn list_sessions(&self) -> StoreResult<Vec<SessionInfo>> {
        let ids = self.log.list_sessions().await?;
        let mut sessions = Vec::with_capacity(ids.len());
        for session_id in ids {
            let meta = self.log.read_meta(&session_id).await?;
            sessions.push(SessionInfo { session_id, meta });
        }
        sessions.sort_by(|a, b| {
            b.sort_key()
                .cmp(&a.sort_key())
                .then_with(|| a.session_id.cmp(&b.session_id))
        });
        Ok(sessions)
    }

    /// Assemble a branch view. Never fails on missing anchors or sessions;
    /// those degrade to an empty view.
    pub async fn view(&self, request: ViewRequest) -> StoreResult<ChatView> {
        let tree = self.cache.get(&request.session_id).await?;
        let meta = self.log.read_meta(&request.session_id).await?;
        Ok(view::assemble(&tree, meta.as_ref(), &request, &self.config))
    }

    /// Renderable chain ending at `leaf_id`, trimmed to the last `limit`
    /// messages, with tool outputs stripped and subagent turns removed.
    /// This is what gets replayed to the model.
    pub async fn context_messages(
        &self,
        session_id: &SessionId,
        leaf_id: &MessageId,
        limit: usize,
    ) -> StoreResult<Vec<ChatMessage>> {
        let request = ViewRequest::new(session_id.clone())
            .with_anchor(leaf_id.clone(), AnchorStrategy::Exact)
            .with_limit(limit);
        let view = self.view(request).await?;
        Ok(view
            .messages
            .unwrap_or_default()
            .into_iter()
            .filter(|m| m.role != Role::Subagent)
            .collect())
    }

    async fn edit_meta<F>(&self, session_id: &SessionId, f: F) -> StoreResult<SessionMeta>
    where
        F: FnOnce(&mut SessionMeta),
    {
        let mut meta = self.log.read_meta(session_id).await?.unwrap_or_default();
        f(&mut meta);
        meta.touch();
        self.log.write_meta(session_id, &meta).await?;
        Ok(meta)
    }
}
