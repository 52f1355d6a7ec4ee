//! Wakeline - wake-word voice assistant
//!
//! Two halves share this crate:
//! - A listening client: wake word recognition, microphone capture, silence
//!   detection and a streaming WebSocket transport
//! - A conversation server: chunk ingestion, speech-to-text, a time-windowed
//!   history and streamed chat completions with tool calls
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────── client ────────────────────────┐
//! │  WakeWordRecognizer → ClientOrchestrator ← SilenceDetector │
//! │                AudioCaptureSession → ChunkTransport      │
//! └───────────────────────────┬─────────────────────────────┘
//!                             │ /ws (binary chunks up, JSON down)
//! ┌───────────────────────────▼─────────────────────────────┐
//! │  IngestionBuffer → ConversationEngine → SpeechToText     │
//! │                    ConversationEngine ⇄ ChatCompletion   │
//! │                                       ⇄ ToolRegistry     │
//! └──────────────────────── server ─────────────────────────┘
//! ```

pub mod api;
pub mod client;
pub mod config;
pub mod conversation;
pub mod error;
pub mod protocol;
pub mod providers;
pub mod tools;
pub mod voice;

pub use config::Config;
pub use error::{CaptureError, Error, Result};
