//! Server-side conversation handling

mod engine;
mod history;
mod tool_calls;

pub use engine::{ConversationEngine, EngineSettings, NullSink, ReplySink, TurnOutcome};
pub use history::{ConversationLog, ConversationMessage, Role, ToolCallRequest};
pub use tool_calls::ToolCallAccumulator;
