//! Assembly of streamed tool calls
//!
//! Providers send a tool call in fragments that share an index. Fragments are
//! concatenated in arrival order and only turned into requests once the
//! stream is over.

use std::collections::BTreeMap;

use super::history::ToolCallRequest;
use crate::providers::ToolCallDelta;

/// In-progress tool call being assembled from streaming events
#[derive(Debug, Default, Clone)]
struct PendingToolCall {
    id: String,
    name: String,
    arguments: String,
}

/// Collects tool-call fragments by index
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    calls: BTreeMap<u32, PendingToolCall>,
}

impl ToolCallAccumulator {
    /// Create an empty accumulator
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one fragment
    pub fn push(&mut self, delta: &ToolCallDelta) {
        let pending = self.calls.entry(delta.index).or_default();

        if let Some(id) = delta.id.as_deref().filter(|id| !id.is_empty()) {
            if pending.id.is_empty() {
                pending.id = id.to_string();
            }
        }
        if let Some(name) = &delta.name {
            pending.name.push_str(name);
        }
        if let Some(arguments) = &delta.arguments {
            pending.arguments.push_str(arguments);
        }
    }

    /// Whether any fragment has arrived
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Finalize into requests, ordered by index
    ///
    /// Calls without a name or with arguments that are not valid JSON are
    /// logged and skipped.
    #[must_use]
    pub fn finish(self) -> Vec<ToolCallRequest> {
        self.calls
            .into_iter()
            .filter_map(|(index, pending)| {
                if pending.name.is_empty() {
                    tracing::warn!(index, "skipping tool call without a name");
                    return None;
                }

                if let Err(e) = serde_json::from_str::<serde_json::Value>(&pending.arguments) {
                    tracing::warn!(
                        index,
                        tool = %pending.name,
                        arguments = %pending.arguments,
                        error = %e,
                        "skipping tool call with malformed arguments"
                    );
                    return None;
                }

                let id = if pending.id.is_empty() {
                    format!("call_{}", uuid::Uuid::new_v4().simple())
                } else {
                    pending.id
                };

                Some(ToolCallRequest {
                    id,
                    function_name: pending.name,
                    arguments_json: pending.arguments,
                })
            })
            .collect()
    }
}
