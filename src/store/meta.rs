//! Per-session metadata sidecar.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Small record stored next to a session's message log: title, pin state,
/// last error, counters. Not part of the tree; every update goes through
/// read-modify-merge-write under the session lock.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub pinned: bool,
    /// Error text from the last failed turn; shown in views until cleared.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default)]
    pub message_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionMeta {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            title: None,
            pinned: false,
            last_error: None,
            message_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the session title
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

impl Default for SessionMeta {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_shape() {
        let meta = SessionMeta::new().with_title("Trip planning");
        let value = serde_json::to_value(&meta).unwrap();
        assert_eq!(value["title"], json!("Trip planning"));
        assert_eq!(value["pinned"], json!(false));
        assert_eq!(value["messageCount"], json!(0));
        assert!(value.get("lastError").is_none());
    }

    #[test]
    fn test_partial_record_fills_defaults() {
        let raw = json!({
            "createdAt": "2024-05-01T10:00:00Z",
            "updatedAt": "2024-05-01T10:00:00Z",
        });
        let meta: SessionMeta = serde_json::from_value(raw).unwrap();
        assert_eq!(meta.title, None);
        assert!(!meta.pinned);
        assert_eq!(meta.message_count, 0);
    }
}
