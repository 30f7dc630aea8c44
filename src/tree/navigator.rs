//! Chain walking, leaf resolution, and sibling navigation.
//!
//! Every function here is pure over a [`TreeIndex`]. Parent and descendant
//! walks carry a visited set and a depth cap so cycle corruption truncates
//! the walk instead of hanging the process.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::TreeIndex;
use crate::types::{ChatMessage, MessageId, MessageKind, Role};

/// Branch-switcher position of one message among its siblings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiblingNav {
    pub message_id: MessageId,
    /// 1-based position in the sibling order.
    pub sibling_index: usize,
    pub sibling_total: usize,
    pub prev_sibling_id: Option<MessageId>,
    pub next_sibling_id: Option<MessageId>,
}

/// Whether a message shows up in transcripts and counts as a resumable leaf.
///
/// Policy, not a tree property: compaction prompts and subagent turns are
/// hidden, compaction summaries and user turns always show, and anything
/// else needs at least one content part.
pub fn is_renderable(message: &ChatMessage) -> bool {
    match message.message_kind {
        MessageKind::CompactPrompt => return false,
        MessageKind::CompactSummary => return true,
        MessageKind::Normal => {}
    }
    match message.role {
        Role::Subagent => false,
        Role::User => true,
        Role::Assistant | Role::System => !message.parts.is_empty(),
    }
}

/// Walk parent pointers from `leaf_id` up to a root, returning the chain in
/// root-to-leaf order. A repeated id or a dangling parent truncates the walk
/// at that point; an unknown `leaf_id` yields an empty chain.
pub fn chain_from_leaf(
    tree: &TreeIndex,
    leaf_id: &MessageId,
    depth_limit: usize,
) -> Vec<MessageId> {
    if !tree.contains(leaf_id) {
        return Vec::new();
    }

    let mut chain = Vec::new();
    let mut visited = HashSet::new();
    let mut current = leaf_id.clone();
    loop {
        visited.insert(current.clone());
        chain.push(current.clone());
        if chain.len() >= depth_limit {
            break;
        }
        let Some(parent) = tree.parent_of(&current) else {
            break;
        };
        if visited.contains(parent) || !tree.contains(parent) {
            break;
        }
        current = parent.clone();
    }
    chain.reverse();
    chain
}

/// The default "continue this branch" resolution.
///
/// Follows the rightmost child at each level; if that leaf fails
/// `is_renderable`, scans every descendant of `start_id` and picks the
/// childless renderable node with the latest `(created_at, id)`. Recency
/// wins over structural proximity: the rightmost spine can end in an
/// empty assistant turn or a compaction artifact, and the live tip the
/// user last saw may sit on an older sibling branch.
pub fn latest_leaf_in_subtree<F>(
    tree: &TreeIndex,
    start_id: &MessageId,
    is_renderable: F,
    depth_limit: usize,
) -> Option<MessageId>
where
    F: Fn(&ChatMessage) -> bool,
{
    if !tree.contains(start_id) {
        return None;
    }

    // Rightmost spine first.
    let mut visited = HashSet::new();
    let mut current = start_id.clone();
    visited.insert(current.clone());
    while visited.len() < depth_limit {
        let Some(last) = tree.children(Some(&current)).last() else {
            break;
        };
        if !visited.insert(last.clone()) {
            break;
        }
        current = last.clone();
    }
    if tree.children(Some(&current)).is_empty()
        && tree.get(&current).is_some_and(&is_renderable)
    {
        return Some(current);
    }

    // Fallback: most recent renderable leaf anywhere in the subtree.
    let mut best: Option<(DateTime<Utc>, MessageId)> = None;
    let mut stack = vec![start_id.clone()];
    let mut seen = HashSet::new();
    while let Some(id) = stack.pop() {
        if !seen.insert(id.clone()) || seen.len() > depth_limit {
            continue;
        }
        let children = tree.children(Some(&id));
        if children.is_empty() {
            if let Some(message) = tree.get(&id)
                && is_renderable(message)
            {
                let key = (message.created_at, id);
                if best.as_ref().is_none_or(|b| key > *b) {
                    best = Some(key);
                }
            }
        } else {
            stack.extend(children.iter().cloned());
        }
    }
    best.map(|(_, id)| id)
}

/// Resume the most recently active top-level branch: roots are scanned last
/// to first and the first subtree with a renderable leaf wins.
pub fn rightmost_renderable_leaf<F>(
    tree: &TreeIndex,
    is_renderable: F,
    depth_limit: usize,
) -> Option<MessageId>
where
    F: Fn(&ChatMessage) -> bool,
{
    for root in tree.roots().iter().rev() {
        if let Some(leaf) = latest_leaf_in_subtree(tree, root, &is_renderable, depth_limit) {
            return Some(leaf);
        }
    }
    None
}

/// Sibling positions for every id in a chain, in chain order. Purely a UI
/// affordance for branch switchers.
pub fn sibling_nav(tree: &TreeIndex, chain: &[MessageId]) -> Vec<SiblingNav> {
    chain.iter().map(|id| sibling_nav_for(tree, id)).collect()
}

fn sibling_nav_for(tree: &TreeIndex, id: &MessageId) -> SiblingNav {
    let parent = tree.get(id).and_then(|m| m.parent_message_id.clone());
    let siblings = tree.children(parent.as_ref());
    match siblings.iter().position(|s| s == id) {
        Some(i) => SiblingNav {
            message_id: id.clone(),
            sibling_index: i + 1,
            sibling_total: siblings.len(),
            prev_sibling_id: (i > 0).then(|| siblings[i - 1].clone()),
            next_sibling_id: siblings.get(i + 1).cloned(),
        },
        // Not in any bucket (orphaned): report it as a sole sibling.
        None => SiblingNav {
            message_id: id.clone(),
            sibling_index: 1,
            sibling_total: 1,
            prev_sibling_id: None,
            next_sibling_id: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MessagePart;
    use chrono::TimeZone;

    const DEPTH: usize = 10_000;

    fn msg(id: &str, parent: Option<&str>, secs: i64) -> ChatMessage {
        let base = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let mut m = ChatMessage::user(vec![MessagePart::text(id)])
            .with_id(id)
            .with_created_at(base + chrono::Duration::seconds(secs));
        if let Some(p) = parent {
            m = m.with_parent(p);
        }
        m
    }

    fn assistant(id: &str, parent: &str, secs: i64, parts: Vec<MessagePart>) -> ChatMessage {
        let base = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        ChatMessage::assistant(parts)
            .with_id(id)
            .with_parent(parent)
            .with_created_at(base + chrono::Duration::seconds(secs))
    }

    fn ids(chain: &[MessageId]) -> Vec<&str> {
        chain.iter().map(MessageId::as_str).collect()
    }

    #[test]
    fn test_chain_from_leaf_root_to_leaf_order() {
        let tree = TreeIndex::build(vec![
            msg("r", None, 0),
            msg("m1", Some("r"), 1),
            msg("m2", Some("m1"), 2),
        ]);
        let chain = chain_from_leaf(&tree, &"m2".into(), DEPTH);
        assert_eq!(ids(&chain), vec!["r", "m1", "m2"]);
    }

    #[test]
    fn test_chain_from_unknown_leaf_is_empty() {
        let tree = TreeIndex::build(vec![msg("r", None, 0)]);
        assert!(chain_from_leaf(&tree, &"nope".into(), DEPTH).is_empty());
    }

    #[test]
    fn test_chain_truncates_on_cycle() {
        // Mutual parents only happen under corruption; the walk must stop.
        let tree = TreeIndex::build(vec![msg("a", Some("b"), 0), msg("b", Some("a"), 1)]);
        let chain = chain_from_leaf(&tree, &"a".into(), DEPTH);
        assert_eq!(ids(&chain), vec!["b", "a"]);
    }

    #[test]
    fn test_chain_respects_depth_limit() {
        let mut records = vec![msg("n0", None, 0)];
        for i in 1..50 {
            records.push(msg(&format!("n{i}"), Some(&format!("n{}", i - 1)), i));
        }
        let tree = TreeIndex::build(records);
        let chain = chain_from_leaf(&tree, &"n49".into(), 10);
        assert_eq!(chain.len(), 10);
    }

    #[test]
    fn test_latest_leaf_follows_rightmost_spine() {
        let tree = TreeIndex::build(vec![
            msg("u1", None, 0),
            assistant("a1", "u1", 1, vec![MessagePart::text("old")]),
            assistant("a2", "u1", 2, vec![MessagePart::text("new")]),
            msg("u2", Some("a2"), 3),
        ]);
        let leaf = latest_leaf_in_subtree(&tree, &"u1".into(), is_renderable, DEPTH);
        assert_eq!(leaf, Some("u2".into()));
    }

    #[test]
    fn test_latest_leaf_skips_empty_assistant_turn() {
        // a2 is rightmost but has no parts; a1 is the live tip.
        let tree = TreeIndex::build(vec![
            msg("u1", None, 0),
            assistant("a1", "u1", 1, vec![MessagePart::text("answer")]),
            assistant("a2", "u1", 2, vec![]),
        ]);
        let leaf = latest_leaf_in_subtree(&tree, &"u1".into(), is_renderable, DEPTH);
        assert_eq!(leaf, Some("a1".into()));
    }

    #[test]
    fn test_latest_leaf_fallback_prefers_recency_over_proximity() {
        // Rightmost spine ends in a compaction prompt; the renderable
        // sibling branch wins even though it is structurally deeper away.
        let tree = TreeIndex::build(vec![
            msg("root", None, 0),
            msg("a", Some("root"), 1),
            assistant("c", "a", 2, vec![MessagePart::text("kept")]),
            assistant("b", "a", 3, vec![MessagePart::text("hidden")])
                .with_kind(MessageKind::CompactPrompt),
        ]);
        let leaf = latest_leaf_in_subtree(&tree, &"a".into(), is_renderable, DEPTH);
        assert_eq!(leaf, Some("c".into()));
    }

    #[test]
    fn test_latest_leaf_none_when_nothing_renderable() {
        let tree = TreeIndex::build(vec![
            msg("u1", None, 0),
            assistant("a1", "u1", 1, vec![]),
        ]);
        assert_eq!(
            latest_leaf_in_subtree(&tree, &"a1".into(), is_renderable, DEPTH),
            None
        );
        assert_eq!(
            latest_leaf_in_subtree(&tree, &"missing".into(), is_renderable, DEPTH),
            None
        );
    }

    #[test]
    fn test_rightmost_renderable_leaf_scans_roots_backwards() {
        let tree = TreeIndex::build(vec![
            msg("r1", None, 0),
            assistant("r1a", "r1", 1, vec![MessagePart::text("first tree")]),
            msg("r2", None, 5),
            assistant("r2a", "r2", 6, vec![MessagePart::text("second tree")]),
        ]);
        // Both trees have live tips; the later root wins.
        let leaf = rightmost_renderable_leaf(&tree, is_renderable, DEPTH);
        assert_eq!(leaf, Some("r2a".into()));
    }

    #[test]
    fn test_rightmost_renderable_leaf_falls_back_to_earlier_root() {
        let empty_root = ChatMessage::assistant(vec![])
            .with_id("r2")
            .with_created_at(Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 5).unwrap());
        let tree = TreeIndex::build(vec![
            msg("r1", None, 0),
            assistant("r1a", "r1", 1, vec![MessagePart::text("live")]),
            empty_root,
        ]);
        let leaf = rightmost_renderable_leaf(&tree, is_renderable, DEPTH);
        assert_eq!(leaf, Some("r1a".into()));
    }

    #[test]
    fn test_sibling_nav_positions() {
        let tree = TreeIndex::build(vec![
            msg("u1", None, 0),
            assistant("a1", "u1", 1, vec![MessagePart::text("one")]),
            assistant("a2", "u1", 2, vec![MessagePart::text("two")]),
        ]);
        let nav = sibling_nav(&tree, &["u1".into(), "a1".into()]);
        assert_eq!(nav[0].sibling_index, 1);
        assert_eq!(nav[0].sibling_total, 1);

        assert_eq!(nav[1].sibling_index, 1);
        assert_eq!(nav[1].sibling_total, 2);
        assert_eq!(nav[1].prev_sibling_id, None);
        assert_eq!(nav[1].next_sibling_id, Some("a2".into()));

        let nav2 = sibling_nav(&tree, &["a2".into()]);
        assert_eq!(nav2[0].sibling_index, 2);
        assert_eq!(nav2[0].prev_sibling_id, Some("a1".into()));
        assert_eq!(nav2[0].next_sibling_id, None);
    }

    #[test]
    fn test_renderable_ladder() {
        let compact_prompt = msg("p", None, 0).with_kind(MessageKind::CompactPrompt);
        assert!(!is_renderable(&compact_prompt));

        let summary = ChatMessage::assistant(vec![]).with_kind(MessageKind::CompactSummary);
        assert!(is_renderable(&summary));

        let sub = ChatMessage::subagent(vec![MessagePart::text("internal")]);
        assert!(!is_renderable(&sub));

        let user_empty = ChatMessage::user(vec![]);
        assert!(is_renderable(&user_empty));

        let assistant_empty = ChatMessage::assistant(vec![]);
        assert!(!is_renderable(&assistant_empty));

        let assistant_full = ChatMessage::assistant(vec![MessagePart::text("hi")]);
        assert!(is_renderable(&assistant_full));
    }
}
