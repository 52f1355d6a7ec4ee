//! Microphone access
//!
//! A [`MicStream`] fans PCM frames out to any number of subscribers
//! (encoder, silence analysis, recognizer). The cpal device lives on its own
//! thread because `cpal::Stream` is not `Send` on every platform; the thread
//! keeps the device open until the last clone of the stream is dropped.

use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleRate;
use tokio::sync::broadcast;

use crate::error::CaptureError;
use crate::{Error, Result};

/// Sample rate for audio capture (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16000;

/// Frames buffered per subscriber before the slowest one starts lagging
const FRAME_CAPACITY: usize = 256;

/// One block of mono f32 samples as delivered by the device
pub type Frame = Arc<[f32]>;

/// A live microphone stream shared between consumers
#[derive(Clone)]
pub struct MicStream {
    frames: broadcast::Sender<Frame>,
    sample_rate: u32,
    _device: Option<Arc<DeviceGuard>>,
}

impl MicStream {
    /// Create a stream fed by an external producer
    ///
    /// Returns the stream and the sender used to push frames into it.
    #[must_use]
    pub fn channel(sample_rate: u32) -> (Self, broadcast::Sender<Frame>) {
        let (tx, _) = broadcast::channel(FRAME_CAPACITY);
        let stream = Self {
            frames: tx.clone(),
            sample_rate,
            _device: None,
        };
        (stream, tx)
    }

    /// Subscribe to frames produced from now on
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Frame> {
        self.frames.subscribe()
    }

    /// Sample rate of the frames
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Whether the stream carries an audio track at all
    #[must_use]
    pub const fn has_audio(&self) -> bool {
        self.sample_rate > 0
    }
}

impl std::fmt::Debug for MicStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MicStream")
            .field("sample_rate", &self.sample_rate)
            .field("subscribers", &self.frames.receiver_count())
            .finish_non_exhaustive()
    }
}

/// Source of microphone streams
pub trait Microphone: Send + Sync {
    /// Open (or reopen) the input device
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError`] if permission is denied or no device exists
    fn acquire(&self) -> Result<MicStream>;
}

/// Wraps a microphone so every caller shares one open stream
pub struct WarmMicrophone {
    inner: Arc<dyn Microphone>,
    cached: Mutex<Option<MicStream>>,
}

impl WarmMicrophone {
    /// Wrap a microphone
    #[must_use]
    pub fn new(inner: Arc<dyn Microphone>) -> Self {
        Self {
            inner,
            cached: Mutex::new(None),
        }
    }

    /// Drop the cached stream, closing the device once nobody else holds it
    pub fn release(&self) {
        if let Ok(mut cached) = self.cached.lock() {
            cached.take();
        }
    }
}

impl Microphone for WarmMicrophone {
    fn acquire(&self) -> Result<MicStream> {
        let mut cached = self
            .cached
            .lock()
            .map_err(|_| Error::Audio("microphone cache poisoned".to_string()))?;

        if let Some(stream) = cached.as_ref() {
            return Ok(stream.clone());
        }

        let stream = self.inner.acquire()?;
        *cached = Some(stream.clone());
        Ok(stream)
    }
}

/// Keeps the device thread alive; dropping it stops the cpal stream
struct DeviceGuard {
    shutdown: Mutex<Option<std::sync::mpsc::Sender<()>>>,
}

impl Drop for DeviceGuard {
    fn drop(&mut self) {
        if let Ok(mut shutdown) = self.shutdown.lock() {
            if let Some(tx) = shutdown.take() {
                let _ = tx.send(());
            }
        }
        tracing::debug!("microphone released");
    }
}

/// Captures audio from the default input device
#[derive(Debug, Default)]
pub struct CpalMicrophone;

impl CpalMicrophone {
    /// Create a microphone bound to the default host
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Microphone for CpalMicrophone {
    fn acquire(&self) -> Result<MicStream> {
        let (frames, _) = broadcast::channel(FRAME_CAPACITY);
        let (ready_tx, ready_rx) = std::sync::mpsc::sync_channel::<Result<()>>(1);
        let (shutdown_tx, shutdown_rx) = std::sync::mpsc::channel::<()>();

        let producer = frames.clone();
        std::thread::Builder::new()
            .name("wakeline-mic".to_string())
            .spawn(move || {
                let stream = match open_input_stream(producer) {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                // Blocks until the guard is dropped
                let _ = shutdown_rx.recv();
                drop(stream);
            })?;

        ready_rx
            .recv()
            .map_err(|_| Error::Audio("microphone thread exited".to_string()))??;

        tracing::debug!(sample_rate = SAMPLE_RATE, "microphone acquired");

        Ok(MicStream {
            frames,
            sample_rate: SAMPLE_RATE,
            _device: Some(Arc::new(DeviceGuard {
                shutdown: Mutex::new(Some(shutdown_tx)),
            })),
        })
    }
}

/// Open the default input device and start pushing frames to `producer`
fn open_input_stream(producer: broadcast::Sender<Frame>) -> Result<cpal::Stream> {
    let host = cpal::default_host();

    let device = host.default_input_device().ok_or(CaptureError::NoDevice)?;

    let supported_config = device
        .supported_input_configs()
        .map_err(|e| classify_device_error(&e.to_string()))?
        .find(|c| {
            c.channels() == 1
                && c.min_sample_rate() <= SampleRate(SAMPLE_RATE)
                && c.max_sample_rate() >= SampleRate(SAMPLE_RATE)
        })
        .ok_or_else(|| CaptureError::Device("no suitable audio config found".to_string()))?;

    let config = supported_config
        .with_sample_rate(SampleRate(SAMPLE_RATE))
        .config();

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate = SAMPLE_RATE,
        channels = config.channels,
        "audio capture initialized"
    );

    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                // No subscribers is not an error, the frame is simply dropped
                let _ = producer.send(Arc::from(data));
            },
            |err| {
                tracing::error!(error = %err, "audio capture error");
            },
            None,
        )
        .map_err(|e| classify_device_error(&e.to_string()))?;

    stream
        .play()
        .map_err(|e| classify_device_error(&e.to_string()))?;

    Ok(stream)
}

/// Map backend error text onto the capture taxonomy
fn classify_device_error(message: &str) -> Error {
    let lower = message.to_lowercase();
    let err = if lower.contains("permission") || lower.contains("denied") || lower.contains("not authorized") {
        CaptureError::PermissionDenied
    } else if lower.contains("not available") || lower.contains("no device") {
        CaptureError::NoDevice
    } else {
        CaptureError::Device(message.to_string())
    };
    err.into()
}
