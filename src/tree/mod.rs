//! Derived tree index over a session's message log.
//!
//! Built fresh from log records, never persisted. The log is the source of
//! truth; this index only makes parent/child navigation cheap.

pub mod navigator;

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::types::{ChatMessage, MessageId};

pub use navigator::SiblingNav;

/// Indexed view of one session's message tree.
///
/// `children_of` is keyed by parent id with `None` as the synthetic root
/// bucket; every bucket is ordered by `(created_at, id)` ascending, which is
/// the sibling order everywhere in the crate.
#[derive(Debug, Default)]
pub struct TreeIndex {
    by_id: HashMap<MessageId, ChatMessage>,
    children_of: HashMap<Option<MessageId>, Vec<MessageId>>,
    root_ids: Vec<MessageId>,
}

impl TreeIndex {
    /// Build the index from raw log records.
    ///
    /// Duplicate ids collapse to the last occurrence in log order (replace
    /// writes a full snapshot, so the latest line is the current state).
    /// Messages whose parent id resolves to nothing stay addressable via
    /// [`get`](Self::get) but are excluded from every child bucket, so the
    /// navigable structure remains a forest.
    pub fn build(records: Vec<ChatMessage>) -> Self {
        let mut by_id: HashMap<MessageId, ChatMessage> = HashMap::with_capacity(records.len());
        for record in records {
            by_id.insert(record.id.clone(), record);
        }

        let mut ordered: Vec<(DateTime<Utc>, MessageId, Option<MessageId>)> = by_id
            .values()
            .map(|m| (m.created_at, m.id.clone(), m.parent_message_id.clone()))
            .collect();
        ordered.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));

        let mut children_of: HashMap<Option<MessageId>, Vec<MessageId>> = HashMap::new();
        for (_, id, parent) in ordered {
            if let Some(parent_id) = &parent
                && !by_id.contains_key(parent_id)
            {
                // Orphaned edge; the record stays resolvable by id only.
                continue;
            }
            children_of.entry(parent).or_default().push(id);
        }
        let root_ids = children_of.get(&None).cloned().unwrap_or_default();

        Self {
            by_id,
            children_of,
            root_ids,
        }
    }

    pub fn get(&self, id: &MessageId) -> Option<&ChatMessage> {
        self.by_id.get(id)
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.by_id.contains_key(id)
    }

    /// Ordered children of a node, or of the synthetic root when `None`.
    pub fn children(&self, parent: Option<&MessageId>) -> &[MessageId] {
        self.children_of
            .get(&parent.cloned())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Root messages in sibling order.
    pub fn roots(&self) -> &[MessageId] {
        &self.root_ids
    }

    /// Parent id of a message, if the message exists and has one.
    pub fn parent_of(&self, id: &MessageId) -> Option<&MessageId> {
        self.by_id.get(id)?.parent_message_id.as_ref()
    }

    /// Number of distinct messages (orphans included).
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MessagePart;
    use chrono::TimeZone;

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

    fn ids(slice: &[MessageId]) -> Vec<&str> {
        slice.iter().map(MessageId::as_str).collect()
    }

    #[test]
    fn test_build_empty() {
        let tree = TreeIndex::build(vec![]);
        assert!(tree.is_empty());
        assert!(tree.roots().is_empty());
    }

    #[test]
    fn test_last_occurrence_wins() {
        let first = msg("m1", None, 0);
        let mut second = msg("m1", None, 0);
        second.parts = vec![MessagePart::text("edited")];

        let tree = TreeIndex::build(vec![first, second]);
        assert_eq!(tree.len(), 1);
        let kept = tree.get(&"m1".into()).unwrap();
        assert_eq!(kept.parts[0], MessagePart::text("edited"));
    }

    #[test]
    fn test_rewritten_parent_moves_the_node() {
        let tree = TreeIndex::build(vec![
            msg("a", None, 0),
            msg("b", None, 1),
            msg("c", Some("a"), 2),
            msg("c", Some("b"), 2),
        ]);
        assert!(tree.children(Some(&"a".into())).is_empty());
        assert_eq!(ids(tree.children(Some(&"b".into()))), vec!["c"]);
    }

    #[test]
    fn test_sibling_order_created_at_then_id() {
        let tree = TreeIndex::build(vec![
            msg("z", Some("root"), 5),
            msg("root", None, 0),
            msg("b", Some("root"), 3),
            msg("a", Some("root"), 3),
        ]);
        assert_eq!(ids(tree.children(Some(&"root".into()))), vec!["a", "b", "z"]);
    }

    #[test]
    fn test_root_order() {
        let tree = TreeIndex::build(vec![msg("r2", None, 7), msg("r1", None, 2)]);
        assert_eq!(ids(tree.roots()), vec!["r1", "r2"]);
    }

    #[test]
    fn test_orphan_excluded_but_addressable() {
        let tree = TreeIndex::build(vec![msg("root", None, 0), msg("lost", Some("gone"), 1)]);
        assert!(tree.get(&"lost".into()).is_some());
        assert_eq!(ids(tree.roots()), vec!["root"]);
        assert!(tree.children(Some(&"gone".into())).is_empty());
        for bucket in tree.children_of.values() {
            assert!(!bucket.contains(&"lost".into()));
        }
    }

    #[test]
    fn test_children_of_unknown_id_is_empty() {
        let tree = TreeIndex::build(vec![msg("root", None, 0)]);
        assert!(tree.children(Some(&"nope".into())).is_empty());
    }

    #[test]
    fn test_rebuild_is_deterministic() {
        let records = vec![
            msg("root", None, 0),
            msg("b", Some("root"), 2),
            msg("a", Some("root"), 1),
            msg("a1", Some("a"), 3),
            msg("a", Some("root"), 1),
        ];
        let one = TreeIndex::build(records.clone());
        let two = TreeIndex::build(records);

        assert_eq!(one.len(), two.len());
        assert_eq!(ids(one.roots()), ids(two.roots()));
        for id in ["root", "a", "b", "a1"] {
            assert_eq!(
                ids(one.children(Some(&id.into()))),
                ids(two.children(Some(&id.into())))
            );
        }
    }
}
