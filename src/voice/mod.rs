//! Voice processing module
//!
//! Microphone capture, chunk encoding, silence detection, wake word
//! recognition, speech-to-text and the activation cue.

mod capture;
mod cue;
mod encoding;
mod microphone;
mod recognition;
mod silence;
mod stt;
mod wake_word;

pub use capture::{AudioCaptureSession, CHUNK_INTERVAL, CaptureMode, ChunkSink, MIN_CHUNK_BYTES};
pub use cue::{CuePlayer, NoCue, ToneCue};
pub use encoding::{
    ChunkEncoder, container_mime, is_wav, pcm16_to_wav, prepare_utterance, samples_to_wav,
};
pub use microphone::{CpalMicrophone, Frame, MicStream, Microphone, SAMPLE_RATE, WarmMicrophone};
pub use recognition::{RecognitionEngine, RecognitionEvent, SegmentingEngine, SpeechSegmenter};
pub use silence::{
    DEFAULT_SILENCE_DURATION, DEFAULT_THRESHOLD_DB, FFT_SIZE, FRAME_INTERVAL, SilenceCallback,
    SilenceDetector, SilenceTracker, SpectrumAnalyser, average_volume, volume_db,
};
pub use stt::{CloudStt, SpeechToText, language_hint};
pub use wake_word::{
    ERROR_RESTART_DELAY, RESTART_DELAY, WakeWordCallback, WakeWordRecognizer,
};
