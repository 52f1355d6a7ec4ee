//! Buffered push-to-talk
//!
//! Records one utterance at a time without the wake word or the streaming
//! link. A recording ends on sustained silence or when the caller's stop
//! signal resolves, and is then uploaded whole through [`SpeechClient`].

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Notify;

use super::orchestrator::OrchestratorSettings;
use super::rest::{SpeechClient, SpeechReply};
use crate::voice::{AudioCaptureSession, CaptureMode, Microphone, SilenceDetector};
use crate::{Error, Result};

/// Why a recording ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingEnd {
    Silence,
    Stopped,
}

/// One-shot recorder and uploader
pub struct PushToTalk {
    capture: AudioCaptureSession,
    silence: SilenceDetector,
    client: SpeechClient,
}

impl PushToTalk {
    /// Create a recorder over `microphone` that uploads through `client`
    #[must_use]
    pub fn new(
        microphone: Arc<dyn Microphone>,
        settings: &OrchestratorSettings,
        client: SpeechClient,
    ) -> Self {
        let silence = SilenceDetector::new();
        silence.configure(settings.silence_threshold_db, settings.silence_duration);

        Self {
            capture: AudioCaptureSession::new(microphone, CaptureMode::Buffered),
            silence,
            client,
        }
    }

    /// Record until silence or until `stop` resolves
    ///
    /// Returns the recording as PCM16 LE and what ended it. The microphone
    /// stays warm for the next recording.
    ///
    /// # Errors
    ///
    /// Returns error if the microphone cannot be acquired or the encoder fails
    pub async fn record(&self, stop: impl Future<Output = ()>) -> Result<(Vec<u8>, RecordingEnd)> {
        let silenced = Arc::new(Notify::new());
        let notify = Arc::clone(&silenced);
        self.silence.on_silence(Arc::new(move || notify.notify_one()));

        self.capture.start().await?;
        if let Some(stream) = self.capture.stream().await {
            self.silence.start(&stream);
        }

        let end = tokio::select! {
            () = silenced.notified() => RecordingEnd::Silence,
            () = stop => RecordingEnd::Stopped,
        };

        self.silence.stop();
        let recording = self.capture.stop().await?;
        tracing::debug!(bytes = recording.len(), ?end, "push-to-talk recording finished");
        Ok((recording, end))
    }

    /// Record one utterance and upload it
    ///
    /// # Errors
    ///
    /// Returns error if nothing was recorded, capture fails or the upload is
    /// rejected
    pub async fn talk(&self, stop: impl Future<Output = ()>) -> Result<SpeechReply> {
        let (recording, _) = self.record(stop).await?;
        if recording.is_empty() {
            return Err(Error::Audio("nothing was recorded".to_string()));
        }

        self.client
            .send(recording, "utterance.pcm", "application/octet-stream")
            .await
    }

    /// Whether a recording is in progress
    pub async fn is_recording(&self) -> bool {
        self.capture.is_active().await
    }

    /// Close the microphone
    ///
    /// # Errors
    ///
    /// Returns error if the encoder task panicked
    pub async fn release(&self) -> Result<()> {
        self.silence.stop();
        self.capture.release().await
    }
}
