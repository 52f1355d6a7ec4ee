//! Continuous speech recognition
//!
//! A [`RecognitionEngine`] runs one recognition session at a time and reports
//! what it heard as [`RecognitionEvent`]s. Every session ends with
//! [`RecognitionEvent::End`], whether it produced a result, failed, or was
//! stopped.

use std::sync::{Arc, Mutex};

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::encoding::samples_to_wav;
use super::microphone::Microphone;
use super::stt::SpeechToText;
use crate::{Error, Result};

/// Minimum audio energy threshold to consider speech
const ENERGY_THRESHOLD: f32 = 0.03;

/// Minimum duration of speech to trigger (in samples at 16kHz)
const MIN_SPEECH_SAMPLES: usize = 4800; // 0.3 seconds

/// Silence duration to consider end of utterance (in samples)
const SILENCE_SAMPLES: usize = 8000; // 0.5 seconds

/// Events reported by a recognition engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionEvent {
    /// Transcripts of the latest result slots, oldest first
    Result {
        /// One transcript per slot
        transcripts: Vec<String>,
    },
    /// The session failed
    Error(String),
    /// The session is over
    End,
}

/// A continuous recognizer
pub trait RecognitionEngine: Send + Sync {
    /// Begin a recognition session
    ///
    /// # Errors
    ///
    /// Returns error if a session is already running or audio is unavailable
    fn start(&self) -> Result<()>;

    /// End the current session; an `End` event follows
    fn stop(&self);
}

/// Segments continuous audio into utterances by energy
#[derive(Debug, Default)]
pub struct SpeechSegmenter {
    listening: bool,
    speech_buffer: Vec<f32>,
    speech_samples: usize,
    silence_counter: usize,
}

impl SpeechSegmenter {
    /// Create an idle segmenter
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed samples; returns a finished utterance once speech is followed by silence
    pub fn process(&mut self, samples: &[f32]) -> Option<Vec<f32>> {
        let energy = calculate_energy(samples);
        let is_speech = energy > ENERGY_THRESHOLD;

        if !self.listening {
            if is_speech {
                self.listening = true;
                self.speech_buffer.clear();
                self.speech_buffer.extend_from_slice(samples);
                self.speech_samples = samples.len();
                self.silence_counter = 0;
                tracing::trace!(energy, "speech detected, listening");
            }
            return None;
        }

        self.speech_buffer.extend_from_slice(samples);

        if is_speech {
            self.speech_samples += samples.len();
            self.silence_counter = 0;
        } else {
            self.silence_counter += samples.len();
        }

        if self.silence_counter > SILENCE_SAMPLES && self.speech_samples > MIN_SPEECH_SAMPLES {
            tracing::debug!(samples = self.speech_buffer.len(), "speech segment complete");
            let segment = std::mem::take(&mut self.speech_buffer);
            self.reset();
            return Some(segment);
        }

        // Too much silence without enough speech
        if self.silence_counter > SILENCE_SAMPLES * 2 {
            tracing::trace!("timeout - resetting");
            self.reset();
        }

        None
    }

    /// Reset to idle
    pub fn reset(&mut self) {
        self.listening = false;
        self.speech_buffer.clear();
        self.speech_samples = 0;
        self.silence_counter = 0;
    }
}

/// Calculate RMS energy of audio samples
#[allow(clippy::cast_precision_loss)]
fn calculate_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Native recognizer: energy segmentation plus cloud transcription
///
/// Each session listens for one utterance, transcribes it and ends.
pub struct SegmentingEngine {
    microphone: Arc<dyn Microphone>,
    stt: Arc<dyn SpeechToText>,
    events: mpsc::UnboundedSender<RecognitionEvent>,
    language: String,
    session: Mutex<Option<JoinHandle<()>>>,
}

impl SegmentingEngine {
    /// Create an engine reporting to `events`
    #[must_use]
    pub fn new(
        microphone: Arc<dyn Microphone>,
        stt: Arc<dyn SpeechToText>,
        events: mpsc::UnboundedSender<RecognitionEvent>,
        language: impl Into<String>,
    ) -> Self {
        Self {
            microphone,
            stt,
            events,
            language: language.into(),
            session: Mutex::new(None),
        }
    }
}

impl RecognitionEngine for SegmentingEngine {
    fn start(&self) -> Result<()> {
        let mut session = self
            .session
            .lock()
            .map_err(|_| Error::Recognition("session lock poisoned".to_string()))?;

        if session.as_ref().is_some_and(|task| !task.is_finished()) {
            return Err(Error::Recognition("recognition already started".to_string()));
        }

        let stream = self.microphone.acquire()?;
        let frames = stream.subscribe();
        let sample_rate = stream.sample_rate();
        let stt = Arc::clone(&self.stt);
        let events = self.events.clone();

        tracing::debug!(language = %self.language, "recognition session started");

        *session = Some(tokio::spawn(async move {
            // Holds the stream open for the whole session
            let _stream = stream;
            let mut frames = frames;
            let mut segmenter = SpeechSegmenter::new();

            let segment = loop {
                match frames.recv().await {
                    Ok(frame) => {
                        if let Some(segment) = segmenter.process(&frame) {
                            break segment;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::trace!(skipped, "recognizer lagging");
                    }
                    Err(RecvError::Closed) => {
                        let _ = events.send(RecognitionEvent::Error("audio-capture".to_string()));
                        let _ = events.send(RecognitionEvent::End);
                        return;
                    }
                }
            };

            let outcome = match samples_to_wav(&segment, sample_rate) {
                Ok(wav) => stt.transcribe(&wav, "audio/wav").await,
                Err(e) => Err(e),
            };

            match outcome {
                Ok(text) => {
                    let _ = events.send(RecognitionEvent::Result {
                        transcripts: vec![text],
                    });
                }
                Err(e) => {
                    tracing::debug!(error = %e, "recognition failed");
                    let _ = events.send(RecognitionEvent::Error(e.to_string()));
                }
            }
            let _ = events.send(RecognitionEvent::End);
        }));

        Ok(())
    }

    fn stop(&self) {
        let Ok(mut session) = self.session.lock() else {
            return;
        };

        if let Some(task) = session.take() {
            if !task.is_finished() {
                task.abort();
                let _ = self.events.send(RecognitionEvent::End);
                tracing::debug!("recognition session stopped");
            }
        }
    }
}
