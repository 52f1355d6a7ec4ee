//! Tool registry
//!
//! Maps tool names to handlers and exposes their schemas to the
//! chat-completion provider. Built once at startup and shared read-only.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::{Error, Result};

/// Name, description and JSON Schema of a tool
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDefinition {
    /// Function name the model calls
    pub name: String,
    /// What the tool does, shown to the model
    pub description: String,
    /// JSON Schema object describing the arguments
    pub parameters: serde_json::Value,
}

/// Tool entry in a chat-completion request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSchema {
    /// Always `"function"`
    #[serde(rename = "type")]
    pub kind: &'static str,
    /// The function definition
    pub function: ToolDefinition,
}

/// A callable tool
#[async_trait]
pub trait Tool: Send + Sync {
    /// Static definition of the tool
    fn definition(&self) -> ToolDefinition;

    /// Run the tool with parsed arguments
    ///
    /// # Errors
    ///
    /// Returns [`Error::Tool`] if the tool cannot produce a result
    async fn execute(&self, args: serde_json::Value) -> Result<serde_json::Value>;
}

struct RegisteredTool {
    definition: ToolDefinition,
    handler: Arc<dyn Tool>,
}

/// Registered tools, in registration order
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<RegisteredTool>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool
    ///
    /// # Errors
    ///
    /// Returns error if a tool with the same name is already registered
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<()> {
        let definition = tool.definition();
        if self.index.contains_key(&definition.name) {
            return Err(Error::Tool(format!(
                "tool already registered: {}",
                definition.name
            )));
        }

        tracing::debug!(tool = %definition.name, "tool registered");
        self.index.insert(definition.name.clone(), self.tools.len());
        self.tools.push(RegisteredTool {
            definition,
            handler: tool,
        });
        Ok(())
    }

    /// Schemas for every registered tool
    #[must_use]
    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.tools
            .iter()
            .map(|t| ToolSchema {
                kind: "function",
                function: t.definition.clone(),
            })
            .collect()
    }

    /// Names of registered tools
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.iter().map(|t| t.definition.name.as_str())
    }

    /// Number of registered tools
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether no tools are registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Execute a tool by name
    ///
    /// # Errors
    ///
    /// Returns error if the tool is unknown or fails
    pub async fn execute(&self, name: &str, args: serde_json::Value) -> Result<serde_json::Value> {
        let tool = self
            .index
            .get(name)
            .and_then(|&i| self.tools.get(i))
            .ok_or_else(|| Error::Tool(format!("function {name} not found")))?;

        tracing::info!(tool = name, "executing tool");
        tool.handler.execute(args).await
    }
}
