//! Shared test utilities
//!
//! Fakes for every seam: speech-to-text, chat completion, tools, the
//! microphone, the recognition engine and the client link.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream;
use serde_json::{Value, json};
use tokio::sync::{broadcast, mpsc};

use wakeline::client::UtteranceSink;
use wakeline::conversation::EngineSettings;
use wakeline::providers::{ChatCompletion, ChatDelta, ChatRequest, ChatStream, ToolCallDelta};
use wakeline::tools::{Tool, ToolDefinition, ToolRegistry};
use wakeline::voice::{
    ChunkSink, CuePlayer, Frame, MicStream, Microphone, RecognitionEngine, RecognitionEvent,
    SAMPLE_RATE, SpeechToText,
};
use wakeline::{CaptureError, Error, Result};

/// Speech-to-text that returns a fixed transcript and records its input
pub struct FakeStt {
    transcript: std::result::Result<String, String>,
    calls: Mutex<Vec<(Vec<u8>, String)>>,
}

impl FakeStt {
    pub fn new(transcript: &str) -> Arc<Self> {
        Arc::new(Self {
            transcript: Ok(transcript.to_string()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn failing(message: &str) -> Arc<Self> {
        Arc::new(Self {
            transcript: Err(message.to_string()),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Audio and mime type of every call so far
    pub fn calls(&self) -> Vec<(Vec<u8>, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl SpeechToText for FakeStt {
    async fn transcribe(&self, audio: &[u8], mime_type: &str) -> Result<String> {
        self.calls
            .lock()
            .unwrap()
            .push((audio.to_vec(), mime_type.to_string()));
        self.transcript.clone().map_err(Error::Transcription)
    }
}

/// One scripted provider response
pub enum Round {
    Deltas(Vec<ChatDelta>),
    /// The request itself is rejected
    Fail(String),
    /// The stream opens but never yields
    Stall,
}

/// Chat provider that replays scripted rounds and records every request
#[derive(Default)]
pub struct ScriptedChat {
    rounds: Mutex<VecDeque<Round>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedChat {
    pub fn new(rounds: Vec<Round>) -> Arc<Self> {
        Arc::new(Self {
            rounds: Mutex::new(rounds.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// A provider that streams `parts` as one plain reply
    pub fn replying(parts: &[&str]) -> Arc<Self> {
        Self::new(vec![text_round(parts)])
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatCompletion for ScriptedChat {
    async fn stream_chat(&self, request: ChatRequest) -> Result<ChatStream> {
        self.requests.lock().unwrap().push(request);

        let round = self
            .rounds
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Round::Deltas(Vec::new()));

        match round {
            Round::Deltas(deltas) => Ok(Box::pin(stream::iter(deltas.into_iter().map(Ok)))),
            Round::Fail(message) => Err(Error::Completion(message)),
            Round::Stall => Ok(Box::pin(stream::pending())),
        }
    }
}

/// Plain text deltas
pub fn text_round(parts: &[&str]) -> Round {
    Round::Deltas(parts.iter().map(|p| ChatDelta::text(*p)).collect())
}

/// A tool-call fragment
pub fn tool_fragment(index: u32, id: Option<&str>, name: Option<&str>, arguments: &str) -> ChatDelta {
    ChatDelta {
        tool_calls: vec![ToolCallDelta {
            index,
            id: id.map(str::to_string),
            name: name.map(str::to_string),
            arguments: Some(arguments.to_string()),
        }],
        ..ChatDelta::default()
    }
}

/// Tool that echoes its arguments back
#[derive(Default)]
pub struct EchoTool {
    pub calls: AtomicUsize,
}

#[async_trait]
impl Tool for EchoTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "echo".to_string(),
            description: "Echo the arguments".to_string(),
            parameters: json!({"type": "object", "properties": {}}),
        }
    }

    async fn execute(&self, args: Value) -> Result<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(json!({ "echo": args }))
    }
}

/// Tool that always fails
pub struct BrokenTool;

#[async_trait]
impl Tool for BrokenTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "get_weather".to_string(),
            description: "Always fails".to_string(),
            parameters: json!({"type": "object", "properties": {"city": {"type": "string"}}}),
        }
    }

    async fn execute(&self, _args: Value) -> Result<Value> {
        Err(Error::Tool("weather service unavailable".to_string()))
    }
}

/// Weather tool with a canned forecast that records its arguments
#[derive(Default)]
pub struct StubWeather {
    args: Mutex<Vec<Value>>,
}

impl StubWeather {
    pub fn calls(&self) -> Vec<Value> {
        self.args.lock().unwrap().clone()
    }
}

#[async_trait]
impl Tool for StubWeather {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "get_weather".to_string(),
            description: "Canned weather".to_string(),
            parameters: json!({"type": "object", "properties": {"city": {"type": "string"}}}),
        }
    }

    async fn execute(&self, args: Value) -> Result<Value> {
        self.args.lock().unwrap().push(args.clone());
        Ok(json!({
            "city": args["city"],
            "temperature": 18.5,
            "condition": "clear sky",
            "humidity": 40,
            "windSpeed": 3.1,
        }))
    }
}

/// Registry holding the given tools
pub fn registry(tools: Vec<Arc<dyn Tool>>) -> Arc<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    for tool in tools {
        registry.register(tool).unwrap();
    }
    Arc::new(registry)
}

/// Engine settings with a short provider deadline
pub fn settings() -> EngineSettings {
    EngineSettings {
        provider_timeout: Duration::from_secs(5),
        ..EngineSettings::default()
    }
}

/// Microphone backed by an in-memory stream
pub struct FakeMicrophone {
    stream: MicStream,
    frames: broadcast::Sender<Frame>,
    denied: bool,
    pub acquisitions: AtomicUsize,
}

impl FakeMicrophone {
    pub fn new() -> Arc<Self> {
        let (stream, frames) = MicStream::channel(SAMPLE_RATE);
        Arc::new(Self {
            stream,
            frames,
            denied: false,
            acquisitions: AtomicUsize::new(0),
        })
    }

    /// A microphone the user refused access to
    pub fn denied() -> Arc<Self> {
        let (stream, frames) = MicStream::channel(SAMPLE_RATE);
        Arc::new(Self {
            stream,
            frames,
            denied: true,
            acquisitions: AtomicUsize::new(0),
        })
    }

    /// Push one frame to every subscriber
    pub fn push(&self, samples: &[f32]) {
        let _ = self.frames.send(Arc::from(samples));
    }
}

impl Microphone for FakeMicrophone {
    fn acquire(&self) -> Result<MicStream> {
        if self.denied {
            return Err(CaptureError::PermissionDenied.into());
        }
        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        Ok(self.stream.clone())
    }
}

/// Recognition engine driven by the test
///
/// Like a real engine, `stop` ends the session with an `End` event.
pub struct FakeEngine {
    events: mpsc::UnboundedSender<RecognitionEvent>,
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
}

impl FakeEngine {
    pub fn new(events: mpsc::UnboundedSender<RecognitionEvent>) -> Arc<Self> {
        Arc::new(Self {
            events,
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
        })
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }
}

impl RecognitionEngine for FakeEngine {
    fn start(&self) -> Result<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        let _ = self.events.send(RecognitionEvent::End);
    }
}

/// Link that records what the orchestrator asked of it
#[derive(Default)]
pub struct RecordingLink {
    pub connects: AtomicUsize,
    pub disconnects: AtomicUsize,
    pub ends: AtomicUsize,
    pub offline: std::sync::atomic::AtomicBool,
    pub session: std::sync::atomic::AtomicU64,
}

impl RecordingLink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

impl UtteranceSink for RecordingLink {
    fn connect(&self) {
        self.connects.fetch_add(1, Ordering::SeqCst);
    }

    fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }

    fn send_end_of_utterance(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::Transport("not connected".to_string()));
        }
        self.ends.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn session(&self) -> u64 {
        self.session.load(Ordering::SeqCst)
    }
}

/// Chunk sink that keeps every chunk
#[derive(Default)]
pub struct CollectingSink {
    chunks: Mutex<Vec<Vec<u8>>>,
}

impl CollectingSink {
    pub fn chunks(&self) -> Vec<Vec<u8>> {
        self.chunks.lock().unwrap().clone()
    }
}

impl ChunkSink for CollectingSink {
    fn send_chunk(&self, chunk: Vec<u8>) {
        self.chunks.lock().unwrap().push(chunk);
    }
}

/// Cue that counts plays
#[derive(Default)]
pub struct CountingCue {
    pub plays: AtomicUsize,
}

impl CuePlayer for CountingCue {
    fn play(&self) {
        self.plays.fetch_add(1, Ordering::SeqCst);
    }
}

/// Little-endian PCM16 bytes for `samples`
pub fn pcm16(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}
