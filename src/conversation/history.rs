//! Conversation history
//!
//! An append-only log whose first entry is the fixed system message. The
//! provider only ever sees a time-limited window of it.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Speaker of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A tool invocation requested by the model
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(into = "WireToolCall")]
pub struct ToolCallRequest {
    /// Id tying the call to its result
    pub id: String,
    /// Name of the registered tool
    pub function_name: String,
    /// Arguments as a JSON document
    pub arguments_json: String,
}

#[derive(Serialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunction,
}

#[derive(Serialize)]
struct WireFunction {
    name: String,
    arguments: String,
}

impl From<ToolCallRequest> for WireToolCall {
    fn from(call: ToolCallRequest) -> Self {
        Self {
            id: call.id,
            kind: "function",
            function: WireFunction {
                name: call.function_name,
                arguments: call.arguments_json,
            },
        }
    }
}

/// One message in the conversation, serialized in chat-completion format
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversationMessage {
    pub role: Role,
    /// Absent for assistant messages that only carry tool calls
    pub content: Option<String>,
    #[serde(skip)]
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallRequest>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ConversationMessage {
    fn plain(role: Role, content: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            timestamp: at,
            tool_calls: None,
            tool_call_id: None,
            name: None,
        }
    }

    #[must_use]
    pub fn system(content: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self::plain(Role::System, content, at)
    }

    #[must_use]
    pub fn user(content: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self::plain(Role::User, content, at)
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self::plain(Role::Assistant, content, at)
    }

    /// Assistant turn that only requests tool calls
    #[must_use]
    pub fn assistant_tool_calls(calls: Vec<ToolCallRequest>, at: DateTime<Utc>) -> Self {
        Self {
            role: Role::Assistant,
            content: None,
            timestamp: at,
            tool_calls: Some(calls),
            tool_call_id: None,
            name: None,
        }
    }

    /// Result of one tool call
    #[must_use]
    pub fn tool_result(
        call: &ToolCallRequest,
        content: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            role: Role::Tool,
            content: Some(content.into()),
            timestamp: at,
            tool_calls: None,
            tool_call_id: Some(call.id.clone()),
            name: Some(call.function_name.clone()),
        }
    }
}

/// Append-only conversation log
#[derive(Debug, Clone)]
pub struct ConversationLog {
    messages: Vec<ConversationMessage>,
    window: Duration,
}

impl ConversationLog {
    /// Start a log with its system message
    #[must_use]
    pub fn new(system_prompt: &str, window: Duration, now: DateTime<Utc>) -> Self {
        Self {
            messages: vec![ConversationMessage::system(system_prompt, now)],
            window,
        }
    }

    /// Append a message
    pub fn push(&mut self, message: ConversationMessage) {
        self.messages.push(message);
    }

    /// Every message ever appended
    #[must_use]
    pub fn messages(&self) -> &[ConversationMessage] {
        &self.messages
    }

    /// Number of messages including the system message
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Always false: the system message is never removed
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// The system message plus everything newer than `now - window`
    ///
    /// Tool results whose requesting assistant message has aged out are
    /// dropped too; providers reject orphaned tool messages.
    #[must_use]
    pub fn window_at(&self, now: DateTime<Utc>) -> Vec<ConversationMessage> {
        let Some((system, rest)) = self.messages.split_first() else {
            return Vec::new();
        };

        let cutoff = chrono::Duration::from_std(self.window)
            .ok()
            .and_then(|window| now.checked_sub_signed(window));

        std::iter::once(system)
            .chain(
                rest.iter()
                    .filter(|m| cutoff.is_none_or(|cutoff| m.timestamp > cutoff))
                    .skip_while(|m| m.role == Role::Tool),
            )
            .cloned()
            .collect()
    }
}
