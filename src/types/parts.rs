//! Opaque message content segments.
//!
//! The store treats part payloads as application-defined JSON. The only
//! structure it ever inspects is the thin tool-part surface (`type`,
//! `toolCallId`, `output`) used when a view strips bulky tool results.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Tool part `type` values carry the tool name after this prefix.
pub const TOOL_TYPE_PREFIX: &str = "tool-";

/// One ordered content segment of a message. Wraps the raw JSON payload;
/// the tree and view layers never interpret it beyond the tool surface.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessagePart(pub Value);

impl MessagePart {
    /// Create a plain text part.
    pub fn text(content: impl Into<String>) -> Self {
        Self(json!({ "type": "text", "text": content.into() }))
    }

    /// Create a tool part with call input and output payloads.
    pub fn tool(
        name: impl AsRef<str>,
        call_id: impl Into<String>,
        input: Value,
        output: Value,
    ) -> Self {
        Self(json!({
            "type": format!("{TOOL_TYPE_PREFIX}{}", name.as_ref()),
            "toolCallId": call_id.into(),
            "state": "output-available",
            "input": input,
            "output": output,
        }))
    }

    /// The part's `type` member, if present.
    pub fn part_type(&self) -> Option<&str> {
        self.0.get("type").and_then(Value::as_str)
    }

    /// Tool name for `tool-*` parts, `None` otherwise.
    pub fn tool_name(&self) -> Option<&str> {
        self.part_type()
            .and_then(|t| t.strip_prefix(TOOL_TYPE_PREFIX))
    }

    pub fn is_tool(&self) -> bool {
        self.tool_name().is_some()
    }

    /// Copy of this part with the tool `output` member removed. Non-tool
    /// parts and parts without an output come back unchanged.
    pub fn without_output(&self) -> Self {
        if !self.is_tool() {
            return self.clone();
        }
        let mut value = self.0.clone();
        if let Some(obj) = value.as_object_mut() {
            obj.remove("output");
        }
        Self(value)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }
}

impl From<Value> for MessagePart {
    fn from(value: Value) -> Self {
        Self(value)
    }
}
