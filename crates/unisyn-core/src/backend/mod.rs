//! Outbound language-model calls.

pub mod openrouter;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::InvokeError;
use crate::history::{HistoryEntry, Role};

pub use openrouter::OpenRouterBackend;

/// One entry of the uniform message list sent to every backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User.as_str().into(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant.as_str().into(),
            content: content.into(),
        }
    }
}

impl ChatMessage {
    /// Like `From<&HistoryEntry>`, but an assistant reply with a label is
    /// prefixed `[label] ` so readers can tell which model wrote it.
    pub fn tagged(entry: &HistoryEntry) -> Self {
        match (entry.role, entry.model_label.as_deref()) {
            (Role::Assistant, Some(label)) => Self {
                role: entry.role.as_str().into(),
                content: format!("[{label}] {}", entry.content),
            },
            _ => Self::from(entry),
        }
    }
}

impl From<&HistoryEntry> for ChatMessage {
    fn from(entry: &HistoryEntry) -> Self {
        Self {
            role: entry.role.as_str().into(),
            content: entry.content.clone(),
        }
    }
}

/// Sampling parameters for one call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InvokeParams {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for InvokeParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 200,
        }
    }
}

/// A language-model provider reachable by provider-qualified model id.
///
/// Implementations make exactly one attempt; retry policy is not their concern.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    async fn complete(
        &self,
        backend_id: &str,
        messages: &[ChatMessage],
        params: InvokeParams,
    ) -> Result<String, InvokeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(role: Role, content: &str, label: Option<&str>) -> HistoryEntry {
        HistoryEntry {
            role,
            content: content.into(),
            model_label: label.map(String::from),
        }
    }

    #[test]
    fn test_tagged_prefixes_labelled_replies() {
        let msg = ChatMessage::tagged(&entry(Role::Assistant, "Paris.", Some("Grok-3")));
        assert_eq!(msg, ChatMessage::assistant("[Grok-3] Paris."));
    }

    #[test]
    fn test_tagged_leaves_user_and_unlabelled_entries() {
        let user = entry(Role::User, "Capital of France?", None);
        assert_eq!(ChatMessage::tagged(&user), ChatMessage::user("Capital of France?"));
        let bare = entry(Role::Assistant, "Paris.", None);
        assert_eq!(ChatMessage::tagged(&bare), ChatMessage::assistant("Paris."));
    }

    #[test]
    fn test_plain_conversion_drops_label() {
        let msg = ChatMessage::from(&entry(Role::Assistant, "Paris.", Some("Grok-3")));
        assert_eq!(msg.content, "Paris.");
        assert_eq!(serde_json::to_value(&msg).unwrap(), serde_json::json!({"role": "assistant", "content": "Paris."}));
    }
}
