//! Conversation engine
//!
//! Runs one turn per utterance: transcribe, stream a reply, and give the model
//! one round of tool calls. Turns on the same engine are serialized by the
//! lock around the log.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use serde_json::json;
use tokio::sync::{mpsc, Mutex};

use super::history::{ConversationLog, ConversationMessage, ToolCallRequest};
use super::tool_calls::ToolCallAccumulator;
use crate::config::{DEFAULT_HISTORY_WINDOW, DEFAULT_SYSTEM_PROMPT, ServerConfig};
use crate::protocol::ServerMessage;
use crate::providers::{ChatCompletion, ChatRequest};
use crate::tools::{ToolRegistry, ToolSchema};
use crate::voice::SpeechToText;
use crate::{Error, Result};

/// Destination for the frames of a turn
#[async_trait]
pub trait ReplySink: Send + Sync {
    /// Send one frame; false once the receiver is gone
    async fn emit(&self, message: ServerMessage) -> bool;

    /// Whether the receiver has gone away
    fn is_closed(&self) -> bool;
}

#[async_trait]
impl ReplySink for mpsc::Sender<ServerMessage> {
    async fn emit(&self, message: ServerMessage) -> bool {
        self.send(message).await.is_ok()
    }

    fn is_closed(&self) -> bool {
        mpsc::Sender::is_closed(self)
    }
}

/// Discards every frame (REST turns return the outcome instead)
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

#[async_trait]
impl ReplySink for NullSink {
    async fn emit(&self, _message: ServerMessage) -> bool {
        true
    }

    fn is_closed(&self) -> bool {
        false
    }
}

/// Engine tuning
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Fixed system message
    pub system_prompt: String,
    /// How far back the provider sees
    pub window: Duration,
    /// Deadline for each provider call
    pub provider_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            window: DEFAULT_HISTORY_WINDOW,
            provider_timeout: Duration::from_secs(60),
        }
    }
}

impl From<&ServerConfig> for EngineSettings {
    fn from(config: &ServerConfig) -> Self {
        Self {
            system_prompt: config.system_prompt.clone(),
            window: config.history_window,
            provider_timeout: config.provider_timeout,
        }
    }
}

/// Result of a successful turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnOutcome {
    /// What the user said
    pub transcription: String,
    /// Full assistant reply text
    pub response: String,
}

struct RoundOutput {
    text: String,
    tool_calls: Vec<ToolCallRequest>,
}

/// Conversation state and turn processing for one speaker
pub struct ConversationEngine {
    stt: Arc<dyn SpeechToText>,
    chat: Arc<dyn ChatCompletion>,
    tools: Arc<ToolRegistry>,
    settings: EngineSettings,
    log: Mutex<ConversationLog>,
}

impl ConversationEngine {
    /// Create an engine with a fresh log
    #[must_use]
    pub fn new(
        stt: Arc<dyn SpeechToText>,
        chat: Arc<dyn ChatCompletion>,
        tools: Arc<ToolRegistry>,
        settings: EngineSettings,
    ) -> Self {
        let log = ConversationLog::new(&settings.system_prompt, settings.window, Utc::now());
        Self {
            stt,
            chat,
            tools,
            settings,
            log: Mutex::new(log),
        }
    }

    /// Run a turn, then report failure (if any) and completion to `sink`
    pub async fn handle_utterance(&self, audio: &[u8], mime_type: &str, sink: &dyn ReplySink) {
        match self.process_utterance(audio, mime_type, sink).await {
            Ok(outcome) => {
                tracing::info!(
                    transcription = %outcome.transcription,
                    response_chars = outcome.response.chars().count(),
                    "turn complete"
                );
            }
            Err(e) => {
                tracing::error!(error = %e, "turn failed");
                sink.emit(ServerMessage::error(e.to_string())).await;
            }
        }
        sink.emit(ServerMessage::Done).await;
    }

    /// Run one turn
    ///
    /// History written before a failure is kept.
    ///
    /// # Errors
    ///
    /// Returns error if transcription or completion fails
    pub async fn process_utterance(
        &self,
        audio: &[u8],
        mime_type: &str,
        sink: &dyn ReplySink,
    ) -> Result<TurnOutcome> {
        let mut log = self.log.lock().await;

        tracing::debug!(audio_bytes = audio.len(), "processing utterance");

        let transcription = self
            .within_deadline(Error::Transcription, self.stt.transcribe(audio, mime_type))
            .await?;

        sink.emit(ServerMessage::Transcription {
            text: transcription.clone(),
        })
        .await;
        log.push(ConversationMessage::user(&transcription, Utc::now()));

        let first = self.stream_round(&log, self.tools.schemas(), sink).await?;

        let response = if first.tool_calls.is_empty() {
            log.push(ConversationMessage::assistant(&first.text, Utc::now()));
            first.text
        } else {
            log.push(ConversationMessage::assistant_tool_calls(
                first.tool_calls.clone(),
                Utc::now(),
            ));

            for call in &first.tool_calls {
                let result = self.run_tool(call).await;
                log.push(ConversationMessage::tool_result(call, result, Utc::now()));
            }

            let follow_up = self.stream_round(&log, Vec::new(), sink).await?;
            if !follow_up.tool_calls.is_empty() {
                tracing::warn!(
                    count = follow_up.tool_calls.len(),
                    "ignoring tool calls in follow-up round"
                );
            }
            log.push(ConversationMessage::assistant(&follow_up.text, Utc::now()));
            first.text + &follow_up.text
        };

        Ok(TurnOutcome {
            transcription,
            response,
        })
    }

    /// Stream one completion, forwarding text as it arrives
    async fn stream_round(
        &self,
        log: &ConversationLog,
        tools: Vec<ToolSchema>,
        sink: &dyn ReplySink,
    ) -> Result<RoundOutput> {
        let request = ChatRequest {
            messages: log.window_at(Utc::now()),
            tools,
        };

        let mut stream = self
            .within_deadline(Error::Completion, self.chat.stream_chat(request))
            .await?;

        let mut text = String::new();
        let mut tool_calls = ToolCallAccumulator::new();

        loop {
            let next = tokio::time::timeout(self.settings.provider_timeout, stream.next())
                .await
                .map_err(|_| Error::Completion("completion stream stalled".to_string()))?;
            let Some(delta) = next else {
                break;
            };
            let delta = delta?;

            if let Some(content) = delta.content.filter(|c| !c.is_empty()) {
                if sink.is_closed() {
                    tracing::debug!("client gone, abandoning stream");
                    return Err(Error::Completion("client disconnected".to_string()));
                }
                text.push_str(&content);
                sink.emit(ServerMessage::Response { text: content }).await;
            }

            for fragment in &delta.tool_calls {
                tool_calls.push(fragment);
            }
        }

        Ok(RoundOutput {
            text,
            tool_calls: tool_calls.finish(),
        })
    }

    /// Execute a tool call; failures become a JSON error payload
    async fn run_tool(&self, call: &ToolCallRequest) -> String {
        let args = match serde_json::from_str(&call.arguments_json) {
            Ok(args) => args,
            Err(e) => return json!({ "error": format!("invalid arguments: {e}") }).to_string(),
        };

        let outcome = tokio::time::timeout(
            self.settings.provider_timeout,
            self.tools.execute(&call.function_name, args),
        )
        .await;

        match outcome {
            Ok(Ok(value)) => value.to_string(),
            Ok(Err(e)) => {
                tracing::warn!(tool = %call.function_name, error = %e, "tool failed");
                json!({ "error": e.to_string() }).to_string()
            }
            Err(_) => {
                tracing::warn!(tool = %call.function_name, "tool timed out");
                json!({ "error": "tool timed out" }).to_string()
            }
        }
    }

    async fn within_deadline<T>(
        &self,
        kind: fn(String) -> Error,
        call: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        let deadline = self.settings.provider_timeout;
        tokio::time::timeout(deadline, call)
            .await
            .map_err(|_| kind(format!("provider timed out after {}s", deadline.as_secs())))?
    }

    /// Snapshot of the full log
    pub async fn history(&self) -> Vec<ConversationMessage> {
        self.log.lock().await.messages().to_vec()
    }
}
