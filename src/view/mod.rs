//! Branch view assembly.
//!
//! The single read path: resolve an anchor, walk its chain, filter to
//! renderable messages, window the result, and attach the optional extras
//! (message bodies, sibling navigation, pagination cursor). Every not-found
//! case degrades to an empty view; this path must stay safe to poll
//! speculatively while writes happen elsewhere.

use serde::{Deserialize, Serialize};

use crate::store::meta::SessionMeta;
use crate::store::{StoreConfig, ToolOutputKeep};
use crate::tree::TreeIndex;
use crate::tree::navigator::{self, SiblingNav, is_renderable};
use crate::types::{ChatMessage, MessageId, SessionId};

/// How an explicit anchor id is interpreted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnchorStrategy {
    /// Use the anchor message itself.
    #[default]
    #[serde(rename = "self")]
    Exact,
    /// Re-resolve to the latest renderable leaf of the anchor's subtree.
    #[serde(rename = "latestLeafInSubtree")]
    LatestLeaf,
}

/// Explicit view anchor.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewAnchor {
    pub message_id: MessageId,
    #[serde(default)]
    pub strategy: AnchorStrategy,
}

/// Pagination cursor: the page ends just above this message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewCursor {
    pub before_message_id: MessageId,
}

fn default_true() -> bool {
    true
}

/// Parameters of one view call.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewRequest {
    pub session_id: SessionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor: Option<ViewAnchor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<ViewCursor>,
    #[serde(default = "default_true")]
    pub include_messages: bool,
    #[serde(default)]
    pub include_sibling_nav: bool,
    /// When false, bulky tool outputs are stripped from returned parts.
    #[serde(default)]
    pub include_tool_output: bool,
}

impl ViewRequest {
    pub fn new(session_id: impl Into<SessionId>) -> Self {
        Self {
            session_id: session_id.into(),
            anchor: None,
            limit: None,
            cursor: None,
            include_messages: true,
            include_sibling_nav: false,
            include_tool_output: false,
        }
    }

    /// Anchor the view at a message
    pub fn with_anchor(
        mut self,
        message_id: impl Into<MessageId>,
        strategy: AnchorStrategy,
    ) -> Self {
        self.anchor = Some(ViewAnchor {
            message_id: message_id.into(),
            strategy,
        });
        self
    }

    /// Window the branch to its last `limit` renderable messages
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Continue paging above a previously returned cursor
    pub fn with_cursor(mut self, before_message_id: impl Into<MessageId>) -> Self {
        self.cursor = Some(ViewCursor {
            before_message_id: before_message_id.into(),
        });
        self
    }

    /// Include sibling navigation for each returned id
    pub fn with_sibling_nav(mut self) -> Self {
        self.include_sibling_nav = true;
        self
    }

    /// Keep tool outputs in returned parts
    pub fn with_tool_output(mut self) -> Self {
        self.include_tool_output = true;
        self
    }

    /// Return ids only, no message bodies
    pub fn without_messages(mut self) -> Self {
        self.include_messages = false;
        self
    }
}

/// Pagination state of a view result.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<ViewCursor>,
    #[serde(default)]
    pub has_more: bool,
}

/// Assembled branch view.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatView {
    /// Effective anchor after strategy resolution; what the UI should treat
    /// as the selected leaf.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leaf_message_id: Option<MessageId>,
    pub branch_message_ids: Vec<MessageId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<ChatMessage>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sibling_nav: Option<Vec<SiblingNav>>,
    pub page_info: PageInfo,
}

/// Build a view over an already-loaded tree. Pure; all I/O happens in the
/// store before this is called.
pub(crate) fn assemble(
    tree: &TreeIndex,
    meta: Option<&SessionMeta>,
    request: &ViewRequest,
    config: &StoreConfig,
) -> ChatView {
    let depth = config.chain_depth_limit;
    let error_message = meta.and_then(|m| m.last_error.clone());

    let Some(anchor_id) = resolve_anchor(tree, request, depth) else {
        return empty_view(request, error_message);
    };

    let chain = navigator::chain_from_leaf(tree, &anchor_id, depth);
    let branch: Vec<MessageId> = chain
        .into_iter()
        .filter(|id| tree.get(id).is_some_and(is_renderable))
        .collect();

    let (page, next_cursor) = match request.limit.filter(|l| *l > 0) {
        Some(limit) if branch.len() > limit => {
            let kept = branch[branch.len() - limit..].to_vec();
            let cursor = ViewCursor {
                before_message_id: kept[0].clone(),
            };
            (kept, Some(cursor))
        }
        _ => (branch, None),
    };
    let has_more = next_cursor.is_some();

    let messages = request.include_messages.then(|| {
        page.iter()
            .filter_map(|id| tree.get(id))
            .map(|message| {
                if request.include_tool_output {
                    message.clone()
                } else {
                    strip_tool_output(message, &config.tool_output_keep)
                }
            })
            .collect()
    });

    let sibling_nav = request
        .include_sibling_nav
        .then(|| navigator::sibling_nav(tree, &page));

    ChatView {
        leaf_message_id: Some(anchor_id),
        branch_message_ids: page,
        error_message,
        messages,
        sibling_nav,
        page_info: PageInfo {
            next_cursor,
            has_more,
        },
    }
}

/// Effective anchor for a request, or `None` when the view must be empty.
fn resolve_anchor(tree: &TreeIndex, request: &ViewRequest, depth: usize) -> Option<MessageId> {
    // Pagination walks toward the root: the page above a cursor is anchored
    // at the cursor message's parent.
    if let Some(cursor) = &request.cursor {
        let parent = tree
            .get(&cursor.before_message_id)?
            .parent_message_id
            .clone()?;
        return tree.contains(&parent).then_some(parent);
    }

    match &request.anchor {
        Some(anchor) => {
            if !tree.contains(&anchor.message_id) {
                return None;
            }
            if anchor.strategy == AnchorStrategy::LatestLeaf
                && let Some(leaf) = navigator::latest_leaf_in_subtree(
                    tree,
                    &anchor.message_id,
                    is_renderable,
                    depth,
                )
            {
                return Some(leaf);
            }
            // A subtree with no renderable leaf keeps the base anchor.
            Some(anchor.message_id.clone())
        }
        None => navigator::rightmost_renderable_leaf(tree, is_renderable, depth),
    }
}

fn strip_tool_output(message: &ChatMessage, keep: &ToolOutputKeep) -> ChatMessage {
    let mut stripped = message.clone();
    stripped.parts = stripped
        .parts
        .iter()
        .map(|part| match part.tool_name() {
            Some(name) if !keep(name) => part.without_output(),
            _ => part.clone(),
        })
        .collect();
    stripped
}

fn empty_view(request: &ViewRequest, error_message: Option<String>) -> ChatView {
    ChatView {
        leaf_message_id: None,
        branch_message_ids: Vec::new(),
        error_message,
        messages: request.include_messages.then(Vec::new),
        sibling_nav: request.include_sibling_nav.then(Vec::new),
        page_info: PageInfo::default(),
    }
}
