//! Audio capture sessions
//!
//! A session turns the shared microphone stream into timed PCM16 chunks.
//! The microphone stays open between sessions; only the encoder is torn down.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use super::encoding::ChunkEncoder;
use super::microphone::{Frame, MicStream, Microphone};
use crate::{Error, Result};

/// Encoder timeslice
pub const CHUNK_INTERVAL: Duration = Duration::from_millis(250);

/// Smallest chunk worth sending (one PCM16 sample)
pub const MIN_CHUNK_BYTES: usize = 2;

/// Receives encoded chunks as they are produced
pub trait ChunkSink: Send + Sync {
    /// Deliver one chunk; must not block
    fn send_chunk(&self, chunk: Vec<u8>);
}

/// Where encoded chunks go
#[derive(Clone)]
pub enum CaptureMode {
    /// Forward every chunk to the sink as soon as it is encoded
    Streaming(Arc<dyn ChunkSink>),
    /// Keep chunks and return the whole recording from `stop()`
    Buffered,
}

struct ActiveCapture {
    stop_tx: oneshot::Sender<()>,
    task: JoinHandle<Vec<u8>>,
}

#[derive(Default)]
struct CaptureState {
    active: Option<ActiveCapture>,
    stream: Option<MicStream>,
}

/// Records from the microphone into encoded chunks
pub struct AudioCaptureSession {
    microphone: Arc<dyn Microphone>,
    mode: CaptureMode,
    state: Mutex<CaptureState>,
    live_encoders: Arc<AtomicUsize>,
}

impl AudioCaptureSession {
    /// Create a session over a microphone
    #[must_use]
    pub fn new(microphone: Arc<dyn Microphone>, mode: CaptureMode) -> Self {
        Self {
            microphone,
            mode,
            state: Mutex::new(CaptureState::default()),
            live_encoders: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Start recording
    ///
    /// Calling `start` while a recording is active logs a warning and does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::CaptureError`] if the microphone cannot be acquired
    pub async fn start(&self) -> Result<()> {
        let mut state = self.state.lock().await;

        if state.active.is_some() {
            tracing::warn!("capture already active, ignoring start");
            return Ok(());
        }

        let stream = match state.stream.clone() {
            Some(stream) => stream,
            None => {
                let stream = self.microphone.acquire().map_err(|e| {
                    tracing::error!(error = %e, "failed to acquire microphone");
                    e
                })?;
                state.stream = Some(stream.clone());
                stream
            }
        };

        let frames = stream.subscribe();
        let (stop_tx, stop_rx) = oneshot::channel();
        let sink = match &self.mode {
            CaptureMode::Streaming(sink) => Some(Arc::clone(sink)),
            CaptureMode::Buffered => None,
        };
        let guard = LiveEncoder::new(Arc::clone(&self.live_encoders));

        let task = tokio::spawn(run_encoder(frames, stop_rx, sink, guard));
        state.active = Some(ActiveCapture { stop_tx, task });

        tracing::info!(sample_rate = stream.sample_rate(), "recording started");
        Ok(())
    }

    /// Stop recording and wait for the final chunk
    ///
    /// Returns the full recording in buffered mode, an empty buffer when
    /// streaming. Stopping an idle session is a no-op.
    ///
    /// # Errors
    ///
    /// Returns error if the encoder task panicked
    pub async fn stop(&self) -> Result<Vec<u8>> {
        let mut state = self.state.lock().await;

        let Some(active) = state.active.take() else {
            tracing::debug!("capture not active, ignoring stop");
            return Ok(Vec::new());
        };

        let _ = active.stop_tx.send(());
        let recording = active
            .task
            .await
            .map_err(|e| Error::Audio(format!("encoder task failed: {e}")))?;

        tracing::info!(bytes = recording.len(), "recording stopped");
        Ok(recording)
    }

    /// Whether a recording is in progress
    pub async fn is_active(&self) -> bool {
        self.state.lock().await.active.is_some()
    }

    /// The warm microphone stream, once acquired
    pub async fn stream(&self) -> Option<MicStream> {
        self.state.lock().await.stream.clone()
    }

    /// Close the warm stream (stops any active recording first)
    ///
    /// # Errors
    ///
    /// Returns error if the encoder task panicked
    pub async fn release(&self) -> Result<()> {
        self.stop().await?;
        self.state.lock().await.stream.take();
        Ok(())
    }

    /// Number of encoder tasks currently alive
    #[must_use]
    pub fn live_encoders(&self) -> usize {
        self.live_encoders.load(Ordering::SeqCst)
    }
}

struct LiveEncoder(Arc<AtomicUsize>);

impl LiveEncoder {
    fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for LiveEncoder {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn run_encoder(
    mut frames: broadcast::Receiver<Frame>,
    mut stop_rx: oneshot::Receiver<()>,
    sink: Option<Arc<dyn ChunkSink>>,
    _guard: LiveEncoder,
) -> Vec<u8> {
    let mut encoder = ChunkEncoder::new();
    let mut recording = Vec::new();
    let mut tick = interval_at(Instant::now() + CHUNK_INTERVAL, CHUNK_INTERVAL);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = &mut stop_rx => break,
            _ = tick.tick() => emit(&mut encoder, sink.as_deref(), &mut recording),
            frame = frames.recv() => match frame {
                Ok(frame) => encoder.push(&frame),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "encoder fell behind, frames dropped");
                }
                Err(RecvError::Closed) => {
                    tracing::debug!("microphone stream closed");
                    break;
                }
            },
        }
    }

    // Final data: whatever the device delivered before stop
    loop {
        match frames.try_recv() {
            Ok(frame) => encoder.push(&frame),
            Err(TryRecvError::Lagged(_)) => {}
            Err(_) => break,
        }
    }
    emit(&mut encoder, sink.as_deref(), &mut recording);

    tracing::debug!(bytes = encoder.encoded_bytes(), "encoder finalized");
    recording
}

fn emit(encoder: &mut ChunkEncoder, sink: Option<&dyn ChunkSink>, recording: &mut Vec<u8>) {
    let Some(chunk) = encoder.take_chunk() else {
        return;
    };
    if chunk.len() < MIN_CHUNK_BYTES {
        return;
    }

    match sink {
        Some(sink) => {
            tracing::trace!(bytes = chunk.len(), "chunk encoded");
            sink.send_chunk(chunk);
        }
        None => recording.extend_from_slice(&chunk),
    }
}
