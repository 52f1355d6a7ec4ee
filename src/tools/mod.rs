//! Tools the assistant can call during a conversation

mod registry;
mod weather;

pub use registry::{Tool, ToolDefinition, ToolRegistry, ToolSchema};
pub use weather::{WeatherReport, WeatherTool};
