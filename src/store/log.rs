//! Append-only JSONL message logs.
//!
//! One log file per session, one full message snapshot per line. Replace
//! and delete rewrite the whole file through a temp-file rename; reads are
//! whole-file and skip malformed lines instead of failing the session.
//!
//! # File Structure
//!
//! ```text
//! {base_dir}/
//! ├── {session}.jsonl       # message records, one per line
//! └── {session}.meta.json   # session metadata sidecar
//! ```

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use tokio::sync::RwLock;

use super::meta::SessionMeta;
use super::{StoreError, StoreResult};
use crate::types::{ChatMessage, SessionId};

// ============================================================================
// Configuration
// ============================================================================

/// Sync mode for file operations.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SyncMode {
    /// No explicit sync (OS buffering only).
    #[default]
    None,
    /// Sync after every write (safest, slowest).
    OnWrite,
}

/// Configuration for JSONL-backed logs.
#[derive(Clone, Debug)]
pub struct JsonlConfig {
    /// Directory holding the per-session files.
    pub base_dir: PathBuf,
    /// File sync mode for durability.
    pub sync_mode: SyncMode,
}

impl Default for JsonlConfig {
    fn default() -> Self {
        Self {
            base_dir: directories::ProjectDirs::from("ai", "junyeong", "chat-store")
                .map(|dirs| dirs.data_dir().join("sessions"))
                .unwrap_or_else(|| PathBuf::from(".chat-store").join("sessions")),
            sync_mode: SyncMode::default(),
        }
    }
}

impl JsonlConfig {
    pub fn builder() -> JsonlConfigBuilder {
        JsonlConfigBuilder::default()
    }
}

/// Builder for JsonlConfig.
#[derive(Default)]
pub struct JsonlConfigBuilder {
    base_dir: Option<PathBuf>,
    sync_mode: Option<SyncMode>,
}

impl JsonlConfigBuilder {
    pub fn base_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(path.into());
        self
    }

    pub fn sync_mode(mut self, mode: SyncMode) -> Self {
        self.sync_mode = Some(mode);
        self
    }

    pub fn build(self) -> JsonlConfig {
        let default = JsonlConfig::default();
        JsonlConfig {
            base_dir: self.base_dir.unwrap_or(default.base_dir),
            sync_mode: self.sync_mode.unwrap_or(default.sync_mode),
        }
    }
}

// ============================================================================
// Log fingerprints
// ============================================================================

/// Cheap modification signature of a session's log, used by the tree cache
/// to decide whether a cached index is still current.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LogFingerprint {
    /// No log exists for the session.
    Absent,
    /// File size and modification time.
    File { len: u64, modified: SystemTime },
    /// Monotonic counter for non-file backends.
    Generation(u64),
}

// ============================================================================
// Log trait
// ============================================================================

/// Storage backend for per-session message logs plus the metadata sidecar.
///
/// Implementations are not independently thread-safe with respect to each
/// other's mutations; callers serialize writes per session through the
/// session lock registry.
#[async_trait::async_trait]
pub trait MessageLog: Send + Sync {
    /// Backend name for diagnostics.
    fn name(&self) -> &str;

    /// Append one record to the session's log.
    async fn append(&self, session_id: &SessionId, message: &ChatMessage) -> StoreResult<()>;

    /// Overwrite the last record whose id matches, or append if absent.
    /// The last occurrence is the one a rebuilt tree resolves, so earlier
    /// shadowed snapshots are left untouched.
    async fn replace(&self, session_id: &SessionId, message: &ChatMessage) -> StoreResult<()>;

    /// Every record in file order. A missing log is an empty session.
    async fn read_all(&self, session_id: &SessionId) -> StoreResult<Vec<ChatMessage>>;

    /// Atomically replace the whole log with `messages`.
    async fn rewrite(&self, session_id: &SessionId, messages: Vec<ChatMessage>) -> StoreResult<()>;

    /// Current modification signature of the session's log.
    async fn fingerprint(&self, session_id: &SessionId) -> StoreResult<LogFingerprint>;

    /// Delete the log and its sidecar. Returns whether a log existed.
    async fn remove(&self, session_id: &SessionId) -> StoreResult<bool>;

    /// Read the session metadata sidecar, if any.
    async fn read_meta(&self, session_id: &SessionId) -> StoreResult<Option<SessionMeta>>;

    /// Write the session metadata sidecar.
    async fn write_meta(&self, session_id: &SessionId, meta: &SessionMeta) -> StoreResult<()>;

    /// Ids of every session the backend holds a log for, in unspecified
    /// order.
    async fn list_sessions(&self) -> StoreResult<Vec<SessionId>>;
}

// ============================================================================
// File Operations (blocking, run via spawn_blocking)
// ============================================================================

fn read_records_sync(path: &Path) -> StoreResult<Vec<ChatMessage>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let file = std::fs::File::open(path).map_err(|e| StoreError::Storage {
        message: format!("Failed to open {}: {}", path.display(), e),
    })?;

    let reader = BufReader::with_capacity(64 * 1024, file);
    let mut records = Vec::with_capacity(128);

    for (line_num, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| StoreError::Storage {
            message: format!("Read error at line {}: {}", line_num + 1, e),
        })?;

        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<ChatMessage>(&line) {
            Ok(record) => records.push(record),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    line = line_num + 1,
                    error = %e,
                    "Skipping malformed log record"
                );
            }
        }
    }

    Ok(records)
}

fn append_records_sync(path: &Path, records: &[ChatMessage], sync: bool) -> StoreResult<()> {
    if records.is_empty() {
        return Ok(());
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| StoreError::Storage {
            message: format!("Failed to create directory {}: {}", parent.display(), e),
        })?;
    }

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| StoreError::Storage {
            message: format!("Failed to open {} for writing: {}", path.display(), e),
        })?;

    let mut writer = std::io::BufWriter::with_capacity(64 * 1024, file);

    for record in records {
        serde_json::to_writer(&mut writer, record)?;
        writeln!(writer).map_err(|e| StoreError::Storage {
            message: format!("Write failed: {}", e),
        })?;
    }

    writer.flush().map_err(|e| StoreError::Storage {
        message: format!("Flush failed: {}", e),
    })?;

    if sync {
        writer
            .into_inner()
            .map_err(|e| StoreError::Storage {
                message: format!("Buffer error: {}", e.error()),
            })?
            .sync_all()
            .map_err(|e| StoreError::Storage {
                message: format!("Sync failed: {}", e),
            })?;
    }

    Ok(())
}

/// Whole-file rewrite through a temp file so a crash mid-write never leaves
/// a half-written log behind.
fn rewrite_records_sync(path: &Path, records: &[ChatMessage], sync: bool) -> StoreResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| StoreError::Storage {
            message: format!("Failed to create directory {}: {}", parent.display(), e),
        })?;
    }

    let tmp_path = path.with_extension("jsonl.tmp");
    let file = std::fs::File::create(&tmp_path).map_err(|e| StoreError::Storage {
        message: format!("Failed to create {}: {}", tmp_path.display(), e),
    })?;

    let mut writer = std::io::BufWriter::with_capacity(64 * 1024, file);
    for record in records {
        serde_json::to_writer(&mut writer, record)?;
        writeln!(writer).map_err(|e| StoreError::Storage {
            message: format!("Write failed: {}", e),
        })?;
    }

    writer.flush().map_err(|e| StoreError::Storage {
        message: format!("Flush failed: {}", e),
    })?;

    if sync {
        writer
            .into_inner()
            .map_err(|e| StoreError::Storage {
                message: format!("Buffer error: {}", e.error()),
            })?
            .sync_all()
            .map_err(|e| StoreError::Storage {
                message: format!("Sync failed: {}", e),
            })?;
    }

    std::fs::rename(&tmp_path, path).map_err(|e| StoreError::Storage {
        message: format!(
            "Failed to move {} into place: {}",
            tmp_path.display(),
            e
        ),
    })?;

    Ok(())
}

fn replace_record_sync(path: &Path, message: &ChatMessage, sync: bool) -> StoreResult<()> {
    let mut records = read_records_sync(path)?;
    match records.iter().rposition(|r| r.id == message.id) {
        Some(pos) => {
            records[pos] = message.clone();
            rewrite_records_sync(path, &records, sync)
        }
        None => append_records_sync(path, std::slice::from_ref(message), sync),
    }
}

/// Session ids recovered from log file stems. An id that was sanitized for
/// the filesystem lists in its sanitized form.
fn list_sessions_sync(base_dir: &Path) -> StoreResult<Vec<SessionId>> {
    if !base_dir.exists() {
        return Ok(Vec::new());
    }

    let entries = std::fs::read_dir(base_dir).map_err(|e| StoreError::Storage {
        message: format!("Failed to read {}: {}", base_dir.display(), e),
    })?;

    let mut ids = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| StoreError::Storage {
            message: format!("Failed to read directory entry: {}", e),
        })?;
        let path = entry.path();
        if !path.is_file() || path.extension().and_then(|s| s.to_str()) != Some("jsonl") {
            continue;
        }
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            ids.push(SessionId::from_string(stem));
        }
    }

    Ok(ids)
}

async fn remove_file_if_exists(path: &Path) -> StoreResult<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(StoreError::Storage {
            message: format!("Failed to delete {}: {}", path.display(), e),
        }),
    }
}

// ============================================================================
// JSONL Log Implementation
// ============================================================================

pub struct JsonlLog {
    config: JsonlConfig,
}

impl JsonlLog {
    pub async fn new(config: JsonlConfig) -> StoreResult<Self> {
        tokio::fs::create_dir_all(&config.base_dir)
            .await
            .map_err(|e| StoreError::Storage {
                message: format!(
                    "Failed to create base directory {}: {}",
                    config.base_dir.display(),
                    e
                ),
            })?;
        Ok(Self { config })
    }

    pub async fn default_config() -> StoreResult<Self> {
        Self::new(JsonlConfig::default()).await
    }

    fn log_path(&self, session_id: &SessionId) -> PathBuf {
        self.config
            .base_dir
            .join(format!("{}.jsonl", session_id.file_stem()))
    }

    fn meta_path(&self, session_id: &SessionId) -> PathBuf {
        self.config
            .base_dir
            .join(format!("{}.meta.json", session_id.file_stem()))
    }
}

#[async_trait::async_trait]
impl MessageLog for JsonlLog {
    fn name(&self) -> &str {
        "jsonl"
    }

    async fn append(&self, session_id: &SessionId, message: &ChatMessage) -> StoreResult<()> {
        let path = self.log_path(session_id);
        let record = message.clone();
        let sync = self.config.sync_mode == SyncMode::OnWrite;
        tokio::task::spawn_blocking(move || append_records_sync(&path, &[record], sync))
            .await
            .map_err(|e| StoreError::Storage {
                message: format!("Task join error: {}", e),
            })?
    }

    async fn replace(&self, session_id: &SessionId, message: &ChatMessage) -> StoreResult<()> {
        let path = self.log_path(session_id);
        let record = message.clone();
        let sync = self.config.sync_mode == SyncMode::OnWrite;
        tokio::task::spawn_blocking(move || replace_record_sync(&path, &record, sync))
            .await
            .map_err(|e| StoreError::Storage {
                message: format!("Task join error: {}", e),
            })?
    }

    async fn read_all(&self, session_id: &SessionId) -> StoreResult<Vec<ChatMessage>> {
        let path = self.log_path(session_id);
        tokio::task::spawn_blocking(move || read_records_sync(&path))
            .await
            .map_err(|e| StoreError::Storage {
                message: format!("Task join error: {}", e),
            })?
    }

    async fn rewrite(&self, session_id: &SessionId, messages: Vec<ChatMessage>) -> StoreResult<()> {
        let path = self.log_path(session_id);
        let sync = self.config.sync_mode == SyncMode::OnWrite;
        tokio::task::spawn_blocking(move || rewrite_records_sync(&path, &messages, sync))
            .await
            .map_err(|e| StoreError::Storage {
                message: format!("Task join error: {}", e),
            })?
    }

    async fn fingerprint(&self, session_id: &SessionId) -> StoreResult<LogFingerprint> {
        let path = self.log_path(session_id);
        let metadata = match tokio::fs::metadata(&path).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(LogFingerprint::Absent);
            }
            Err(e) => {
                return Err(StoreError::Storage {
                    message: format!("Failed to stat {}: {}", path.display(), e),
                });
            }
        };
        let modified = metadata.modified().map_err(|e| StoreError::Storage {
            message: format!("Failed to read mtime of {}: {}", path.display(), e),
        })?;
        Ok(LogFingerprint::File {
            len: metadata.len(),
            modified,
        })
    }

    async fn remove(&self, session_id: &SessionId) -> StoreResult<bool> {
        let existed = remove_file_if_exists(&self.log_path(session_id)).await?;
        remove_file_if_exists(&self.meta_path(session_id)).await?;
        Ok(existed)
    }

    async fn read_meta(&self, session_id: &SessionId) -> StoreResult<Option<SessionMeta>> {
        let path = self.meta_path(session_id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(StoreError::Storage {
                    message: format!("Failed to read {}: {}", path.display(), e),
                });
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(meta) => Ok(Some(meta)),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Discarding malformed session metadata"
                );
                Ok(None)
            }
        }
    }

    async fn write_meta(&self, session_id: &SessionId, meta: &SessionMeta) -> StoreResult<()> {
        let path = self.meta_path(session_id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::Storage {
                    message: format!("Failed to create directory {}: {}", parent.display(), e),
                })?;
        }

        let tmp_path = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec(meta)?;
        tokio::fs::write(&tmp_path, bytes)
            .await
            .map_err(|e| StoreError::Storage {
                message: format!("Failed to write {}: {}", tmp_path.display(), e),
            })?;
        tokio::fs::rename(&tmp_path, &path)
            .await
            .map_err(|e| StoreError::Storage {
                message: format!("Failed to move {} into place: {}", tmp_path.display(), e),
            })
    }

    async fn list_sessions(&self) -> StoreResult<Vec<SessionId>> {
        let base_dir = self.config.base_dir.clone();
        tokio::task::spawn_blocking(move || list_sessions_sync(&base_dir))
            .await
            .map_err(|e| StoreError::Storage {
                message: format!("Task join error: {}", e),
            })?
    }
}

// ============================================================================
// In-Memory Log Implementation
// ============================================================================

#[derive(Clone, Debug, Default)]
struct MemorySession {
    records: Vec<ChatMessage>,
    meta: Option<SessionMeta>,
    generation: u64,
}

/// In-memory backend for tests and ephemeral sessions. Fingerprints are a
/// per-session generation counter bumped on every record mutation.
#[derive(Default)]
pub struct MemoryLog {
    sessions: Arc<RwLock<HashMap<SessionId, MemorySession>>>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl MessageLog for MemoryLog {
    fn name(&self) -> &str {
        "memory"
    }

    async fn append(&self, session_id: &SessionId, message: &ChatMessage) -> StoreResult<()> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.entry(session_id.clone()).or_default();
        session.records.push(message.clone());
        session.generation += 1;
        Ok(())
    }

    async fn replace(&self, session_id: &SessionId, message: &ChatMessage) -> StoreResult<()> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.entry(session_id.clone()).or_default();
        match session.records.iter().rposition(|r| r.id == message.id) {
            Some(pos) => session.records[pos] = message.clone(),
            None => session.records.push(message.clone()),
        }
        session.generation += 1;
        Ok(())
    }

    async fn read_all(&self, session_id: &SessionId) -> StoreResult<Vec<ChatMessage>> {
        let sessions = self.sessions.read().await;
        Ok(sessions
            .get(session_id)
            .map(|s| s.records.clone())
            .unwrap_or_default())
    }

    async fn rewrite(&self, session_id: &SessionId, messages: Vec<ChatMessage>) -> StoreResult<()> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.entry(session_id.clone()).or_default();
        session.records = messages;
        session.generation += 1;
        Ok(())
    }

    async fn fingerprint(&self, session_id: &SessionId) -> StoreResult<LogFingerprint> {
        let sessions = self.sessions.read().await;
        Ok(match sessions.get(session_id) {
            Some(session) => LogFingerprint::Generation(session.generation),
            None => LogFingerprint::Absent,
        })
    }

    async fn remove(&self, session_id: &SessionId) -> StoreResult<bool> {
        let mut sessions = self.sessions.write().await;
        Ok(sessions.remove(session_id).is_some())
    }

    async fn read_meta(&self, session_id: &SessionId) -> StoreResult<Option<SessionMeta>> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(session_id).and_then(|s| s.meta.clone()))
    }

    async fn write_meta(&self, session_id: &SessionId, meta: &SessionMeta) -> StoreResult<()> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.entry(session_id.clone()).or_default();
        session.meta = Some(meta.clone());
        Ok(())
    }

    async fn list_sessions(&self) -> StoreResult<Vec<SessionId>> {
        let sessions = self.sessions.read().await;
        Ok(sessions.keys().cloned().collect())
    }
}

// ============================================================================
// Tests
// ============================================================================
