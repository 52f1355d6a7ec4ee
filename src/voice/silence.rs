//! Silence detection
//!
//! Ends an utterance once the input level has stayed below a threshold for a
//! sustained period. The level is the mean of a byte-scaled magnitude
//! spectrum, converted back to decibels.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::microphone::{Frame, MicStream};

/// Samples per spectrum
pub const FFT_SIZE: usize = 2048;

/// Analysis tick
pub const FRAME_INTERVAL: Duration = Duration::from_millis(16);

/// Default silence threshold in dB
pub const DEFAULT_THRESHOLD_DB: f32 = -50.0;

/// Default silence duration
pub const DEFAULT_SILENCE_DURATION: Duration = Duration::from_millis(2000);

const SMOOTHING: f32 = 0.8;
const MIN_DECIBELS: f32 = -100.0;
const MAX_DECIBELS: f32 = -30.0;
const STATS_INTERVAL: Duration = Duration::from_secs(1);

/// Callback invoked when silence is detected
pub type SilenceCallback = Arc<dyn Fn() + Send + Sync>;

/// Sliding-window magnitude spectrum with temporal smoothing
pub struct SpectrumAnalyser {
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    samples: VecDeque<f32>,
    smoothed: Vec<f32>,
}

impl SpectrumAnalyser {
    /// Create an analyser primed with silence
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn new() -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(FFT_SIZE);

        let window = (0..FFT_SIZE)
            .map(|i| {
                0.5 * (1.0
                    - (2.0 * std::f32::consts::PI * i as f32 / (FFT_SIZE - 1) as f32).cos())
            })
            .collect();

        Self {
            fft,
            window,
            samples: std::iter::repeat_n(0.0, FFT_SIZE).collect(),
            smoothed: vec![0.0; FFT_SIZE / 2],
        }
    }

    /// Feed new samples, keeping the most recent `FFT_SIZE`
    pub fn push(&mut self, samples: &[f32]) {
        self.samples.extend(samples.iter().copied());
        let excess = self.samples.len().saturating_sub(FFT_SIZE);
        self.samples.drain(..excess);
    }

    /// Byte-scaled spectrum of the current window
    ///
    /// Each bin maps [-100 dB, -30 dB] linearly onto 0..=255.
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn byte_frequency_data(&mut self) -> Vec<u8> {
        let mut buffer: Vec<Complex<f32>> = self
            .samples
            .iter()
            .zip(self.window.iter())
            .map(|(&sample, &window)| Complex::new(sample * window, 0.0))
            .collect();

        self.fft.process(&mut buffer);

        let scale = 1.0 / FFT_SIZE as f32;
        let range = MAX_DECIBELS - MIN_DECIBELS;

        self.smoothed
            .iter_mut()
            .zip(buffer.iter())
            .map(|(smoothed, bin)| {
                *smoothed = SMOOTHING * *smoothed + (1.0 - SMOOTHING) * bin.norm() * scale;
                if *smoothed <= 0.0 {
                    return 0;
                }
                let db = 20.0 * smoothed.log10();
                ((db - MIN_DECIBELS) / range * 255.0).clamp(0.0, 255.0) as u8
            })
            .collect()
    }
}

impl Default for SpectrumAnalyser {
    fn default() -> Self {
        Self::new()
    }
}

/// Mean of a byte spectrum
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn average_volume(spectrum: &[u8]) -> f32 {
    if spectrum.is_empty() {
        return 0.0;
    }
    let sum: u32 = spectrum.iter().map(|&b| u32::from(b)).sum();
    sum as f32 / spectrum.len() as f32
}

/// Convert a mean byte level to decibels (0 maps to negative infinity)
#[must_use]
pub fn volume_db(average: f32) -> f32 {
    20.0 * (average / 255.0).log10()
}

/// Decides when a run of quiet levels counts as silence
#[derive(Debug, Clone)]
pub struct SilenceTracker {
    threshold_db: f32,
    duration: Duration,
    silence_start: Option<Instant>,
}

impl SilenceTracker {
    /// Create a tracker
    #[must_use]
    pub const fn new(threshold_db: f32, duration: Duration) -> Self {
        Self {
            threshold_db,
            duration,
            silence_start: None,
        }
    }

    /// Record one level sample; returns true when silence has lasted long enough
    ///
    /// Fires once per quiet span, then starts timing afresh.
    pub fn observe(&mut self, level_db: f32, now: Instant) -> bool {
        if level_db >= self.threshold_db {
            self.silence_start = None;
            return false;
        }

        let start = *self.silence_start.get_or_insert(now);
        if now.duration_since(start) >= self.duration {
            self.silence_start = None;
            return true;
        }
        false
    }

    /// How long the current quiet span has lasted
    #[must_use]
    pub fn silent_for(&self, now: Instant) -> Duration {
        self.silence_start
            .map_or(Duration::ZERO, |start| now.duration_since(start))
    }
}

struct DetectorInner {
    threshold_db: f32,
    duration: Duration,
    callback: Option<SilenceCallback>,
    task: Option<JoinHandle<()>>,
}

/// Watches a microphone stream for sustained silence
pub struct SilenceDetector {
    inner: Mutex<DetectorInner>,
}

impl SilenceDetector {
    /// Create a detector with default settings
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(DetectorInner {
                threshold_db: DEFAULT_THRESHOLD_DB,
                duration: DEFAULT_SILENCE_DURATION,
                callback: None,
                task: None,
            }),
        }
    }

    /// Set threshold and duration; applies from the next `start`
    pub fn configure(&self, threshold_db: f32, duration: Duration) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.threshold_db = threshold_db;
            inner.duration = duration;
        }
    }

    /// Register the silence callback
    pub fn on_silence(&self, callback: SilenceCallback) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.callback = Some(callback);
        }
    }

    /// Start watching `stream`
    ///
    /// Ignored while already running or when the stream has no audio.
    pub fn start(&self, stream: &MicStream) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };

        if inner.task.as_ref().is_some_and(|t| !t.is_finished()) {
            tracing::debug!("silence detector already running");
            return;
        }

        if !stream.has_audio() {
            tracing::warn!("stream has no audio track, silence detection skipped");
            return;
        }

        let tracker = SilenceTracker::new(inner.threshold_db, inner.duration);
        tracing::debug!(
            threshold_db = inner.threshold_db,
            duration_ms = u64::try_from(inner.duration.as_millis()).unwrap_or(u64::MAX),
            "silence detection started"
        );

        inner.task = Some(tokio::spawn(analyse(
            stream.subscribe(),
            tracker,
            inner.callback.clone(),
        )));
    }

    /// Stop watching and release the analyser
    pub fn stop(&self) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        if let Some(task) = inner.task.take() {
            task.abort();
            tracing::debug!("silence detection stopped");
        }
    }

    /// Whether the analysis loop is still running
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner
            .lock()
            .map(|inner| inner.task.as_ref().is_some_and(|t| !t.is_finished()))
            .unwrap_or(false)
    }
}

impl Default for SilenceDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SilenceDetector {
    fn drop(&mut self) {
        if let Ok(mut inner) = self.inner.lock() {
            if let Some(task) = inner.task.take() {
                task.abort();
            }
        }
    }
}

async fn analyse(
    mut frames: broadcast::Receiver<Frame>,
    mut tracker: SilenceTracker,
    callback: Option<SilenceCallback>,
) {
    let mut analyser = SpectrumAnalyser::new();
    let mut tick = tokio::time::interval(FRAME_INTERVAL);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last_stats = Instant::now();

    loop {
        tick.tick().await;

        loop {
            match frames.try_recv() {
                Ok(frame) => analyser.push(&frame),
                Err(TryRecvError::Lagged(_)) => {}
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Closed) => {
                    tracing::debug!("stream closed, silence detection ended");
                    return;
                }
            }
        }

        let level = volume_db(average_volume(&analyser.byte_frequency_data()));
        let now = Instant::now();

        if now.duration_since(last_stats) >= STATS_INTERVAL {
            tracing::debug!(
                level_db = level,
                silent_ms = u64::try_from(tracker.silent_for(now).as_millis()).unwrap_or(u64::MAX),
                "audio level"
            );
            last_stats = now;
        }

        if tracker.observe(level, now) {
            tracing::info!(level_db = level, "silence detected");
            if let Some(callback) = &callback {
                callback();
            }
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::voice::microphone::SAMPLE_RATE;

    fn noise(len: usize, seed: &mut u32) -> Vec<f32> {
        (0..len)
            .map(|_| {
                *seed = seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
                #[allow(clippy::cast_precision_loss)]
                let unit = (*seed >> 8) as f32 / (1u32 << 24) as f32;
                unit - 0.5
            })
            .collect()
    }

    #[test]
    fn silent_input_is_negative_infinity() {
        let mut analyser = SpectrumAnalyser::new();
        analyser.push(&[0.0; 512]);
        let level = volume_db(average_volume(&analyser.byte_frequency_data()));
        assert!(level < DEFAULT_THRESHOLD_DB);
    }

    #[test]
    fn noise_is_above_threshold() {
        let mut analyser = SpectrumAnalyser::new();
        let mut seed = 7;
        let mut level = f32::NEG_INFINITY;
        for _ in 0..20 {
            analyser.push(&noise(FFT_SIZE, &mut seed));
            level = volume_db(average_volume(&analyser.byte_frequency_data()));
        }
        assert!(level > DEFAULT_THRESHOLD_DB, "level was {level}");
    }

    #[test]
    fn short_quiet_span_never_fires() {
        let mut tracker = SilenceTracker::new(-50.0, Duration::from_millis(2000));
        let t0 = Instant::now();
        let at = |ms| t0 + Duration::from_millis(ms);

        assert!(!tracker.observe(-80.0, at(0)));
        assert!(!tracker.observe(-80.0, at(1500)));
        assert!(!tracker.observe(-20.0, at(1600)));
        assert!(!tracker.observe(-80.0, at(1700)));
        assert!(!tracker.observe(-80.0, at(3600)));
        assert!(tracker.observe(-80.0, at(3700)));
    }

    #[test]
    fn fires_once_per_span() {
        let mut tracker = SilenceTracker::new(-50.0, Duration::from_millis(100));
        let t0 = Instant::now();
        let fired = (0..=15)
            .filter(|i| tracker.observe(-90.0, t0 + Duration::from_millis(i * 10)))
            .count();
        assert_eq!(fired, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn detector_fires_once_on_silent_stream() {
        let (stream, _tx) = MicStream::channel(SAMPLE_RATE);
        let fired = Arc::new(AtomicUsize::new(0));

        let detector = SilenceDetector::new();
        detector.configure(-50.0, Duration::from_millis(500));
        let counter = fired.clone();
        detector.on_silence(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        detector.start(&stream);
        detector.start(&stream);
        assert!(detector.is_running());

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!detector.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn detector_stays_quiet_while_speaking() {
        let (stream, tx) = MicStream::channel(SAMPLE_RATE);
        let fired = Arc::new(AtomicUsize::new(0));

        let detector = SilenceDetector::new();
        detector.configure(-50.0, Duration::from_millis(500));
        let counter = fired.clone();
        detector.on_silence(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        detector.start(&stream);

        let producer = tokio::spawn(async move {
            let mut seed = 42;
            let mut tick = tokio::time::interval(Duration::from_millis(10));
            loop {
                tick.tick().await;
                let _ = tx.send(Arc::from(noise(160, &mut seed)));
            }
        });

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        detector.stop();
        assert!(!detector.is_running());
        producer.abort();
    }

    #[tokio::test]
    async fn stop_while_idle_is_ignored() {
        let detector = SilenceDetector::new();
        detector.stop();
        assert!(!detector.is_running());

        let (stream, _tx) = MicStream::channel(0);
        detector.start(&stream);
        assert!(!detector.is_running());
    }
}
