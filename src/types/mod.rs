//! Core types: identifiers, messages, and content parts.

mod ids;
mod message;
mod parts;

pub use ids::{MessageId, SessionId};
pub use message::{ChatMessage, MessageKind, Role};
pub use parts::{MessagePart, TOOL_TYPE_PREFIX};
