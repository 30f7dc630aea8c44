//! # chat-store
//!
//! Branching conversation store for AI assistant sessions.
//!
//! Each session is an append-only JSONL log of full message snapshots.
//! Messages form a tree through parent links; editing a message appends a
//! sibling branch instead of destroying history. Reads assemble one branch
//! at a time: an anchor is resolved, its parent chain is walked, and the
//! result is filtered, windowed and decorated for the UI or for model
//! context replay.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use chat_store::{ChatMessage, ChatStore, MessagePart, SessionId, ViewRequest};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), chat_store::StoreError> {
//!     let store = ChatStore::in_memory();
//!     let session = SessionId::from("notes");
//!
//!     let question = ChatMessage::user(vec![MessagePart::text("What is 2 + 2?")]);
//!     let question_id = question.id.clone();
//!     store.append(&session, question).await?;
//!     store
//!         .append(
//!             &session,
//!             ChatMessage::assistant(vec![MessagePart::text("4")]).with_parent(question_id),
//!         )
//!         .await?;
//!
//!     let view = store.view(ViewRequest::new("notes")).await?;
//!     for message in view.messages.unwrap_or_default() {
//!         println!("{:?}: {} part(s)", message.role, message.parts.len());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Branching
//!
//! Appending a second child under the same parent creates a branch. Views
//! follow the rightmost (most recent) branch by default; anchoring at any
//! message shows the branch it belongs to, and sibling navigation tells the
//! UI where the alternatives are.
//!
//! ```rust,no_run
//! use chat_store::{AnchorStrategy, ChatMessage, ChatStore, MessagePart, SessionId, ViewRequest};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), chat_store::StoreError> {
//!     let store = ChatStore::in_memory();
//!     let session = SessionId::from("notes");
//!
//!     let question = ChatMessage::user(vec![MessagePart::text("Tell me a joke")]);
//!     let question_id = question.id.clone();
//!     store.append(&session, question).await?;
//!
//!     let first = ChatMessage::assistant(vec![MessagePart::text("…")])
//!         .with_parent(question_id.clone());
//!     let retry = ChatMessage::assistant(vec![MessagePart::text("A better one.")])
//!         .with_parent(question_id.clone());
//!     let retry_id = retry.id.clone();
//!     store.append(&session, first).await?;
//!     store.append(&session, retry).await?;
//!
//!     let view = store
//!         .view(
//!             ViewRequest::new(session.clone())
//!                 .with_anchor(retry_id, AnchorStrategy::Exact)
//!                 .with_sibling_nav(),
//!         )
//!         .await?;
//!     for nav in view.sibling_nav.unwrap_or_default() {
//!         println!("{} of {}", nav.sibling_index, nav.sibling_total);
//!     }
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod store;
pub mod tree;
pub mod types;
pub mod view;

// Re-exports for convenience
pub use store::{
    ChatStore, JsonlConfig, JsonlConfigBuilder, JsonlLog, LogFingerprint, MemoryLog, MessageLog,
    SessionInfo, SessionLocks, SessionMeta, StoreConfig, StoreConfigBuilder, StoreError,
    StoreResult, SubtreeDeletion, SyncMode, TOOL_OUTPUT_ALLOWLIST, ToolOutputKeep, TreeCache,
};
pub use tree::TreeIndex;
pub use tree::navigator::{
    SiblingNav, chain_from_leaf, is_renderable, latest_leaf_in_subtree, rightmost_renderable_leaf,
    sibling_nav,
};
pub use types::{
    ChatMessage, MessageId, MessageKind, MessagePart, Role, SessionId, TOOL_TYPE_PREFIX,
};
pub use view::{AnchorStrategy, ChatView, PageInfo, ViewAnchor, ViewCursor, ViewRequest};
