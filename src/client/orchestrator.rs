//! Client state machine
//!
//! One event loop owns the [`ListeningMode`]. Wake word, silence, server and
//! user events are queued onto it and handled one at a time, so the
//! recognizer, capture session and silence detector are only ever driven
//! from here.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::transport::ChunkTransport;
use crate::config::ClientConfig;
use crate::protocol::ServerMessage;
use crate::voice::{
    AudioCaptureSession, CuePlayer, DEFAULT_SILENCE_DURATION, DEFAULT_THRESHOLD_DB,
    SilenceDetector, WakeWordRecognizer,
};
use crate::{Error, Result};

/// What the client is doing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListeningMode {
    #[default]
    Idle,
    WakeWordListening,
    Recording,
    Processing,
}

/// Inputs to the state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    StartListening,
    StopListening,
    Toggle,
    /// The recognizer heard the wake word in this transcript
    WakeWord(String),
    /// The silence detector fired
    Silence,
    /// A frame from the server
    Server(ServerMessage),
    /// Stop everything and end the loop
    Shutdown,
}

/// What the console (or any other UI) shows
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiEvent {
    WakeWord(String),
    Transcription(String),
    ResponseDelta(String),
    ReplyComplete,
    Error(String),
}

/// Where finished utterances are announced
///
/// Implemented by [`ChunkTransport`]; audio itself flows through the capture
/// session's chunk sink.
pub trait UtteranceSink: Send + Sync {
    /// Bring the link up; no-op if already up
    fn connect(&self);

    /// Take the link down
    fn disconnect(&self);

    /// Mark the end of the current utterance
    ///
    /// # Errors
    ///
    /// Returns error if the link is not open
    fn send_end_of_utterance(&self) -> Result<()>;

    /// Counter that changes whenever a new server session opens
    fn session(&self) -> u64 {
        0
    }
}

impl UtteranceSink for ChunkTransport {
    fn connect(&self) {
        Self::connect(self);
    }

    fn disconnect(&self) {
        Self::disconnect(self);
    }

    fn send_end_of_utterance(&self) -> Result<()> {
        Self::send_end_of_utterance(self)
    }

    fn session(&self) -> u64 {
        Self::session(self)
    }
}

/// Orchestrator tuning
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub silence_threshold_db: f32,
    pub silence_duration: Duration,
    /// Give up on a reply after this long without a server frame
    pub reply_timeout: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            silence_threshold_db: DEFAULT_THRESHOLD_DB,
            silence_duration: DEFAULT_SILENCE_DURATION,
            reply_timeout: Duration::from_secs(30),
        }
    }
}

impl From<&ClientConfig> for OrchestratorSettings {
    fn from(config: &ClientConfig) -> Self {
        Self {
            silence_threshold_db: config.silence_threshold_db,
            silence_duration: config.silence_duration,
            reply_timeout: config.reply_timeout,
        }
    }
}

/// Subsystems the orchestrator drives
pub struct ClientParts {
    pub recognizer: Arc<WakeWordRecognizer>,
    pub capture: Arc<AudioCaptureSession>,
    pub silence: Arc<SilenceDetector>,
    pub link: Arc<dyn UtteranceSink>,
    pub cue: Arc<dyn CuePlayer>,
}

/// Control surface of a running orchestrator
#[derive(Clone)]
pub struct OrchestratorHandle {
    events: mpsc::UnboundedSender<ClientEvent>,
    mode: watch::Receiver<ListeningMode>,
    ui: broadcast::Sender<UiEvent>,
}

impl OrchestratorHandle {
    /// Begin listening for the wake word
    pub fn start_listening(&self) {
        self.send(ClientEvent::StartListening);
    }

    /// Stop every subsystem and go idle
    pub fn stop_listening(&self) {
        self.send(ClientEvent::StopListening);
    }

    /// The listen button
    pub fn toggle(&self) {
        self.send(ClientEvent::Toggle);
    }

    /// Stop everything and end the event loop
    pub fn shutdown(&self) {
        self.send(ClientEvent::Shutdown);
    }

    /// Queue an arbitrary event
    pub fn send(&self, event: ClientEvent) {
        if self.events.send(event).is_err() {
            tracing::debug!("orchestrator stopped, event dropped");
        }
    }

    /// Current mode
    #[must_use]
    pub fn mode(&self) -> ListeningMode {
        *self.mode.borrow()
    }

    /// Watch mode changes
    #[must_use]
    pub fn watch_mode(&self) -> watch::Receiver<ListeningMode> {
        self.mode.clone()
    }

    /// Receive UI events from now on
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<UiEvent> {
        self.ui.subscribe()
    }
}

/// The client state machine
pub struct ClientOrchestrator {
    parts: ClientParts,
    settings: OrchestratorSettings,
    mode: watch::Sender<ListeningMode>,
    ui: broadcast::Sender<UiEvent>,
    reply_deadline: Option<Instant>,
    /// Timed-out turns whose frames may still arrive on `stale_session`
    stale_turns: usize,
    stale_session: u64,
}

impl ClientOrchestrator {
    /// Wire the subsystems' callbacks and start the event loop
    ///
    /// `server_events` carries decoded frames from the transport.
    #[must_use]
    pub fn spawn(
        parts: ClientParts,
        settings: OrchestratorSettings,
        mut server_events: mpsc::UnboundedReceiver<ServerMessage>,
    ) -> (OrchestratorHandle, JoinHandle<()>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (mode_tx, mode_rx) = watch::channel(ListeningMode::Idle);
        let (ui_tx, _) = broadcast::channel(64);

        let tx = events_tx.clone();
        parts.recognizer.on_wake_word(Arc::new(move |transcript| {
            let _ = tx.send(ClientEvent::WakeWord(transcript));
        }));

        let tx = events_tx.clone();
        parts.silence.on_silence(Arc::new(move || {
            let _ = tx.send(ClientEvent::Silence);
        }));
        parts
            .silence
            .configure(settings.silence_threshold_db, settings.silence_duration);

        let tx = events_tx.clone();
        tokio::spawn(async move {
            while let Some(message) = server_events.recv().await {
                if tx.send(ClientEvent::Server(message)).is_err() {
                    break;
                }
            }
        });

        let orchestrator = Self {
            parts,
            settings,
            mode: mode_tx,
            ui: ui_tx.clone(),
            reply_deadline: None,
            stale_turns: 0,
            stale_session: 0,
        };
        let task = tokio::spawn(orchestrator.run(events_rx));

        let handle = OrchestratorHandle {
            events: events_tx,
            mode: mode_rx,
            ui: ui_tx,
        };
        (handle, task)
    }

    async fn run(mut self, mut events: mpsc::UnboundedReceiver<ClientEvent>) {
        loop {
            let deadline = self.reply_deadline;
            let event = tokio::select! {
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
                () = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.on_reply_timeout();
                    continue;
                }
            };

            if event == ClientEvent::Shutdown {
                self.stop_all().await;
                break;
            }
            self.handle(event).await;
        }
        tracing::debug!("orchestrator stopped");
    }

    fn current(&self) -> ListeningMode {
        *self.mode.borrow()
    }

    fn set_mode(&self, mode: ListeningMode) {
        let previous = self.mode.send_replace(mode);
        if previous != mode {
            tracing::info!(from = ?previous, to = ?mode, "mode changed");
        }
    }

    fn notify(&self, event: UiEvent) {
        let _ = self.ui.send(event);
    }

    async fn handle(&mut self, event: ClientEvent) {
        let mode = self.current();
        tracing::trace!(?mode, ?event, "client event");

        match (mode, event) {
            (ListeningMode::Idle, ClientEvent::StartListening | ClientEvent::Toggle) => {
                self.start_listening();
            }
            (ListeningMode::WakeWordListening, ClientEvent::Toggle) => {
                self.parts.recognizer.set_enabled(false);
                self.set_mode(ListeningMode::Idle);
            }
            (ListeningMode::WakeWordListening, ClientEvent::WakeWord(transcript)) => {
                self.begin_recording(transcript).await;
            }
            (ListeningMode::Recording, ClientEvent::Silence | ClientEvent::Toggle) => {
                self.finish_recording().await;
            }
            (_, ClientEvent::StopListening) => {
                self.stop_all().await;
            }
            (_, ClientEvent::Server(message)) => self.on_server_message(message),
            (mode, event) => {
                tracing::debug!(?mode, ?event, "event ignored in current mode");
            }
        }
    }

    fn start_listening(&self) {
        self.parts.link.connect();
        self.parts.recognizer.set_enabled(true);
        self.set_mode(ListeningMode::WakeWordListening);
    }

    async fn begin_recording(&mut self, transcript: String) {
        self.notify(UiEvent::WakeWord(transcript));
        self.parts.recognizer.set_enabled(false);
        self.parts.cue.play();

        if let Err(e) = self.parts.capture.start().await {
            self.fail(e).await;
            return;
        }

        if let Some(stream) = self.parts.capture.stream().await {
            self.parts.silence.start(&stream);
        }
        self.set_mode(ListeningMode::Recording);
    }

    async fn finish_recording(&mut self) {
        self.parts.silence.stop();

        if let Err(e) = self.parts.capture.stop().await {
            self.fail(e).await;
            return;
        }

        if let Err(e) = self.parts.link.send_end_of_utterance() {
            tracing::warn!(error = %e, "utterance not delivered");
            self.notify(UiEvent::Error(e.to_string()));
            self.resume();
            return;
        }

        self.set_mode(ListeningMode::Processing);
        self.reply_deadline = Some(Instant::now() + self.settings.reply_timeout);
    }

    fn on_server_message(&mut self, message: ServerMessage) {
        if self.is_stale(&message) {
            tracing::debug!(?message, "frame from a timed-out turn dropped");
            return;
        }

        let processing = self.current() == ListeningMode::Processing;
        if processing {
            self.reply_deadline = Some(Instant::now() + self.settings.reply_timeout);
        }

        match message {
            ServerMessage::Transcription { text } => {
                tracing::info!(text = %text, "transcription");
                self.notify(UiEvent::Transcription(text));
            }
            ServerMessage::Response { text } => self.notify(UiEvent::ResponseDelta(text)),
            ServerMessage::Error { message } => {
                tracing::warn!(message = %message, "server error");
                self.notify(UiEvent::Error(message));
                if processing {
                    self.resume();
                }
            }
            ServerMessage::Done => {
                if processing {
                    self.resume();
                }
            }
        }
    }

    /// Whether the frame belongs to a turn that already timed out
    ///
    /// The server answers turns in order, so everything up to the next
    /// `done` after a timeout is the late tail of that turn. A new session
    /// means those tails will never come.
    fn is_stale(&mut self, message: &ServerMessage) -> bool {
        if self.stale_turns == 0 {
            return false;
        }
        if self.parts.link.session() != self.stale_session {
            self.stale_turns = 0;
            return false;
        }
        if message.ends_turn() {
            self.stale_turns -= 1;
        }
        true
    }

    fn on_reply_timeout(&mut self) {
        self.reply_deadline = None;
        if self.current() != ListeningMode::Processing {
            return;
        }

        tracing::warn!(
            timeout_secs = self.settings.reply_timeout.as_secs(),
            "no reply from server"
        );
        let session = self.parts.link.session();
        if session != self.stale_session {
            self.stale_turns = 0;
            self.stale_session = session;
        }
        self.stale_turns += 1;

        self.notify(UiEvent::Error("reply timed out".to_string()));
        self.resume();
    }

    /// Back to waiting for the wake word
    fn resume(&mut self) {
        self.reply_deadline = None;
        self.parts.recognizer.resume_after_recording();
        self.notify(UiEvent::ReplyComplete);
        self.set_mode(ListeningMode::WakeWordListening);
    }

    async fn stop_all(&mut self) {
        self.reply_deadline = None;
        self.stale_turns = 0;
        self.parts.silence.stop();
        if let Err(e) = self.parts.capture.stop().await {
            tracing::warn!(error = %e, "failed to stop capture");
        }
        self.parts.recognizer.set_enabled(false);
        self.parts.link.disconnect();
        self.set_mode(ListeningMode::Idle);
    }

    async fn fail(&mut self, error: Error) {
        tracing::error!(error = %error, "client error");
        self.notify(UiEvent::Error(error.to_string()));
        self.stop_all().await;
    }
}
