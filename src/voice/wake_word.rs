//! Wake word detection
//!
//! Keeps a [`RecognitionEngine`] running while enabled and watches its
//! transcripts for the configured phrase. Sessions that end without a match
//! are restarted automatically.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::recognition::{RecognitionEngine, RecognitionEvent};

/// Delay before restarting a session that ended normally
pub const RESTART_DELAY: Duration = Duration::from_millis(100);

/// Delay before restarting after a recognition error
pub const ERROR_RESTART_DELAY: Duration = Duration::from_millis(1000);

/// Callback receiving the transcript that contained the wake word
pub type WakeWordCallback = Arc<dyn Fn(String) + Send + Sync>;

#[derive(Default)]
struct RecognizerState {
    wake_word: String,
    enabled: bool,
    running: bool,
    callback: Option<WakeWordCallback>,
    pending: Option<String>,
}

/// Listens continuously for a wake phrase
///
/// Construct once per process and share the `Arc`.
pub struct WakeWordRecognizer {
    engine: Arc<dyn RecognitionEngine>,
    state: Mutex<RecognizerState>,
}

impl WakeWordRecognizer {
    /// Create a disabled recognizer over `engine`
    #[must_use]
    pub fn new(engine: Arc<dyn RecognitionEngine>, wake_word: &str) -> Arc<Self> {
        let recognizer = Arc::new(Self {
            engine,
            state: Mutex::new(RecognizerState::default()),
        });
        recognizer.set_wake_word(wake_word);
        recognizer
    }

    fn state(&self) -> MutexGuard<'_, RecognizerState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Change the phrase to listen for
    pub fn set_wake_word(&self, phrase: &str) {
        let normalized = phrase.trim().to_lowercase();
        tracing::debug!(wake_word = %normalized, "wake word set");
        self.state().wake_word = normalized;
    }

    /// The current (normalized) phrase
    #[must_use]
    pub fn wake_word(&self) -> String {
        self.state().wake_word.clone()
    }

    /// Register the wake word callback
    pub fn on_wake_word(&self, callback: WakeWordCallback) {
        self.state().callback = Some(callback);
    }

    /// Enable or disable listening
    pub fn set_enabled(self: &Arc<Self>, enabled: bool) {
        let was_enabled = {
            let mut state = self.state();
            std::mem::replace(&mut state.enabled, enabled)
        };

        if !was_enabled && enabled {
            self.start();
        } else if was_enabled && !enabled {
            self.stop();
        }
    }

    /// Whether listening is enabled
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.state().enabled
    }

    /// Whether a recognition session is running
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state().running
    }

    /// Start a session; no-op while running or disabled
    pub fn start(&self) {
        {
            let mut state = self.state();
            if state.running || !state.enabled {
                return;
            }
            state.running = true;
        }

        match self.engine.start() {
            Ok(()) => tracing::debug!("recognition started"),
            Err(e) => {
                tracing::error!(error = %e, "failed to start recognition");
                self.state().running = false;
            }
        }
    }

    /// Stop the running session; no-op when idle
    pub fn stop(&self) {
        {
            let mut state = self.state();
            if !state.running {
                return;
            }
            state.running = false;
        }

        self.engine.stop();
        tracing::debug!("recognition stopped");
    }

    /// Re-enable listening once a recording has been handled
    pub fn resume_after_recording(self: &Arc<Self>) {
        self.set_enabled(true);
        self.start();
    }

    /// Process one engine event
    pub fn handle_event(self: &Arc<Self>, event: RecognitionEvent) {
        match event {
            RecognitionEvent::Result { transcripts } => self.handle_result(&transcripts),
            RecognitionEvent::Error(error) => {
                tracing::debug!(error = %error, "recognition error");
                let enabled = {
                    let mut state = self.state();
                    state.running = false;
                    state.enabled
                };
                if enabled {
                    self.restart_after(ERROR_RESTART_DELAY);
                }
            }
            RecognitionEvent::End => {
                let (pending, enabled) = {
                    let mut state = self.state();
                    state.running = false;
                    let pending = state
                        .pending
                        .take()
                        .map(|transcript| (transcript, state.callback.clone()));
                    (pending, state.enabled)
                };

                if let Some((transcript, callback)) = pending {
                    if let Some(callback) = callback {
                        callback(transcript);
                    }
                } else if enabled {
                    self.restart_after(RESTART_DELAY);
                } else {
                    tracing::trace!("recognition ended while disabled");
                }
            }
        }
    }

    fn handle_result(self: &Arc<Self>, transcripts: &[String]) {
        let Some(last) = transcripts.last() else {
            return;
        };
        let transcript = last.to_lowercase().trim().to_string();
        tracing::debug!(transcripts = ?transcripts, "recognition result");

        let matched = {
            let state = self.state();
            state.enabled && !state.wake_word.is_empty() && transcript.contains(&state.wake_word)
        };
        if !matched {
            return;
        }

        tracing::info!(transcript = %transcript, "wake word detected");
        self.stop();
        self.set_enabled(false);
        self.state().pending = Some(transcript);
    }

    fn restart_after(self: &Arc<Self>, delay: Duration) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            this.start();
        });
    }

    /// Feed events from an engine channel until it closes
    pub fn spawn_event_pump(
        self: &Arc<Self>,
        mut events: mpsc::UnboundedReceiver<RecognitionEvent>,
    ) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                this.handle_event(event);
            }
            tracing::debug!("recognition event channel closed");
        })
    }
}
