//! OpenAI-compatible chat completions over server-sent events

use std::collections::VecDeque;
use std::fmt::Display;

use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::json;

use super::{ChatCompletion, ChatDelta, ChatRequest, ChatStream, ToolCallDelta};
use crate::config::LlmConfig;
use crate::{Error, Result};

/// Chat client for `/chat/completions`
pub struct OpenAiChat {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAiChat {
    /// Create a client
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new(api_key: String, config: &LlmConfig) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config(
                "OpenAI API key required for chat completion".to_string(),
            ));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn request_body(&self, request: &ChatRequest) -> Result<serde_json::Value> {
        let mut body = json!({
            "model": self.model,
            "messages": request.messages,
            "stream": true,
        });

        if !request.tools.is_empty() {
            body["tools"] = serde_json::to_value(&request.tools)?;
            body["tool_choice"] = json!("auto");
        }

        Ok(body)
    }
}

#[async_trait]
impl ChatCompletion for OpenAiChat {
    async fn stream_chat(&self, request: ChatRequest) -> Result<ChatStream> {
        let body = self.request_body(&request)?;

        tracing::debug!(
            model = %self.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "starting chat completion"
        );

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "chat completion request failed");
                e
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "chat completion API error");
            return Err(Error::Completion(format!(
                "chat completion API error {status}: {body}"
            )));
        }

        Ok(sse_deltas(response.bytes_stream()))
    }
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    error: Option<StreamError>,
}

#[derive(Debug, Deserialize)]
struct StreamError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Option<StreamDelta>,
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    content: Option<String>,
    tool_calls: Option<Vec<StreamToolCall>>,
}

#[derive(Debug, Deserialize)]
struct StreamToolCall {
    #[serde(default)]
    index: u32,
    id: Option<String>,
    function: Option<StreamFunction>,
}

#[derive(Debug, Deserialize)]
struct StreamFunction {
    name: Option<String>,
    arguments: Option<String>,
}

struct SseState<B, E> {
    bytes: BoxStream<'static, std::result::Result<B, E>>,
    buffer: Vec<u8>,
    queued: VecDeque<Result<ChatDelta>>,
    finished: bool,
}

impl<B, E> SseState<B, E> {
    /// Parse every complete line in the buffer
    fn drain_lines(&mut self) {
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            self.handle_line(&String::from_utf8_lossy(&line));
        }
    }

    fn handle_line(&mut self, line: &str) {
        let Some(data) = line.trim().strip_prefix("data:") else {
            return;
        };
        let data = data.trim();

        if data == "[DONE]" {
            self.finished = true;
            return;
        }

        match parse_chunk(data) {
            Ok(Some(delta)) => self.queued.push_back(Ok(delta)),
            Ok(None) => {}
            Err(e) => {
                self.finished = true;
                self.queued.push_back(Err(e));
            }
        }
    }
}

/// Turn a raw SSE byte stream into completion deltas
///
/// Lines are split on raw bytes so multi-byte characters cut across network
/// chunks survive intact. The stream ends at `data: [DONE]`.
pub fn sse_deltas<S, B, E>(bytes: S) -> ChatStream
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    let state = SseState {
        bytes: bytes.boxed(),
        buffer: Vec::new(),
        queued: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.queued.pop_front() {
                return Some((item, state));
            }
            if state.finished {
                return None;
            }

            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    state.buffer.extend_from_slice(chunk.as_ref());
                    state.drain_lines();
                }
                Some(Err(e)) => {
                    state.finished = true;
                    state
                        .queued
                        .push_back(Err(Error::Completion(format!("stream error: {e}"))));
                }
                None => {
                    let rest = std::mem::take(&mut state.buffer);
                    state.handle_line(&String::from_utf8_lossy(&rest));
                    state.finished = true;
                }
            }
        }
    })
    .boxed()
}

fn parse_chunk(data: &str) -> Result<Option<ChatDelta>> {
    let chunk: StreamChunk = serde_json::from_str(data)
        .map_err(|e| Error::Completion(format!("invalid stream chunk: {e}")))?;

    if let Some(error) = chunk.error {
        return Err(Error::Completion(error.message));
    }

    let Some(choice) = chunk.choices.into_iter().next() else {
        return Ok(None);
    };

    let delta = choice.delta.unwrap_or_default();
    let tool_calls = delta
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|tc| {
            let (name, arguments) = tc
                .function
                .map_or((None, None), |f| (f.name, f.arguments));
            ToolCallDelta {
                index: tc.index,
                id: tc.id,
                name,
                arguments,
            }
        })
        .collect();

    Ok(Some(ChatDelta {
        content: delta.content,
        tool_calls,
        finish_reason: choice.finish_reason,
    }))
}
