//! Activation cue played when the wake word is heard

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use crate::{Error, Result};

/// Plays a short audible cue
pub trait CuePlayer: Send + Sync {
    /// Start playing; returns immediately
    fn play(&self);
}

/// Silent cue
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCue;

impl CuePlayer for NoCue {
    fn play(&self) {}
}

/// Sine beep on the default output device
#[derive(Debug, Clone, Copy)]
pub struct ToneCue {
    frequency: f32,
    duration: Duration,
    volume: f32,
}

impl Default for ToneCue {
    fn default() -> Self {
        Self {
            frequency: 880.0,
            duration: Duration::from_millis(150),
            volume: 0.3,
        }
    }
}

impl ToneCue {
    /// Create a cue with a custom pitch and length
    #[must_use]
    pub const fn new(frequency: f32, duration: Duration) -> Self {
        Self {
            frequency,
            duration,
            volume: 0.3,
        }
    }

    /// Render the beep with short fades to avoid clicks
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn samples(&self, sample_rate: u32) -> Vec<f32> {
        let rate = sample_rate as f32;
        let len = (self.duration.as_secs_f32() * rate) as usize;
        if len == 0 {
            return Vec::new();
        }
        let fade = (len / 10).max(1);

        (0..len)
            .map(|i| {
                let envelope = (i.min(len - 1 - i) as f32 / fade as f32).min(1.0);
                let phase = 2.0 * std::f32::consts::PI * self.frequency * i as f32 / rate;
                phase.sin() * self.volume * envelope
            })
            .collect()
    }

    fn play_blocking(&self) -> Result<()> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

        let config: cpal::StreamConfig = device
            .default_output_config()
            .map_err(|e| Error::Audio(e.to_string()))?
            .into();

        let channels = usize::from(config.channels);
        let samples = Arc::new(self.samples(config.sample_rate.0));
        let position = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicBool::new(false));

        let stream = {
            let samples = Arc::clone(&samples);
            let position = Arc::clone(&position);
            let finished = Arc::clone(&finished);
            device
                .build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        for frame in data.chunks_mut(channels) {
                            let pos = position.fetch_add(1, Ordering::Relaxed);
                            let sample = samples.get(pos).copied().unwrap_or_else(|| {
                                finished.store(true, Ordering::Relaxed);
                                0.0
                            });
                            frame.fill(sample);
                        }
                    },
                    |err| {
                        tracing::error!(error = %err, "audio playback error");
                    },
                    None,
                )
                .map_err(|e| Error::Audio(e.to_string()))?
        };

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;

        let deadline = std::time::Instant::now() + self.duration + Duration::from_millis(500);
        while !finished.load(Ordering::Relaxed) && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }

        drop(stream);
        tracing::trace!(samples = samples.len(), "cue played");
        Ok(())
    }
}

impl CuePlayer for ToneCue {
    fn play(&self) {
        let cue = *self;
        let spawned = std::thread::Builder::new()
            .name("wakeline-cue".to_string())
            .spawn(move || {
                if let Err(e) = cue.play_blocking() {
                    tracing::warn!(error = %e, "failed to play activation cue");
                }
            });
        if let Err(e) = spawned {
            tracing::warn!(error = %e, "failed to spawn cue thread");
        }
    }
}
