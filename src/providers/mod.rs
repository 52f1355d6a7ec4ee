//! Chat-completion providers
//!
//! Providers stream [`ChatDelta`]s: content fragments, tool-call fragments
//! keyed by index, and the finish reason.

mod openai;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::Result;
use crate::conversation::ConversationMessage;
use crate::tools::ToolSchema;

pub use openai::{OpenAiChat, sse_deltas};

/// One streaming completion request
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    /// Conversation window, system message first
    pub messages: Vec<ConversationMessage>,
    /// Tools offered to the model; empty disables tool calling
    pub tools: Vec<ToolSchema>,
}

/// A fragment of a tool call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolCallDelta {
    /// Position of the call within the response
    pub index: u32,
    /// Call id, usually only on the first fragment
    pub id: Option<String>,
    /// Function name fragment
    pub name: Option<String>,
    /// Arguments JSON fragment
    pub arguments: Option<String>,
}

/// One streamed update
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatDelta {
    /// Text fragment
    pub content: Option<String>,
    /// Tool-call fragments
    pub tool_calls: Vec<ToolCallDelta>,
    /// Set on the final delta of a choice
    pub finish_reason: Option<String>,
}

impl ChatDelta {
    /// A plain text delta
    #[must_use]
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::default()
        }
    }
}

/// Stream of completion deltas
pub type ChatStream = BoxStream<'static, Result<ChatDelta>>;

/// A streaming chat-completion backend
#[async_trait]
pub trait ChatCompletion: Send + Sync {
    /// Start a streaming completion
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Completion`] if the request is rejected
    async fn stream_chat(&self, request: ChatRequest) -> Result<ChatStream>;
}
