//! Voice pipeline integration tests
//!
//! Tests voice components without requiring audio hardware

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use wakeline::voice::{
    AudioCaptureSession, CaptureMode, ChunkEncoder, Microphone, RecognitionEvent, SAMPLE_RATE,
    SegmentingEngine, SpectrumAnalyser, SpeechSegmenter, ToneCue, WakeWordRecognizer,
    WarmMicrophone, average_volume, is_wav, language_hint, pcm16_to_wav, samples_to_wav,
    volume_db,
};

mod common;
use common::{FakeMicrophone, FakeStt};

/// Generate sine wave audio samples
fn generate_sine_samples(frequency: f32, duration_secs: f32, amplitude: f32) -> Vec<f32> {
    let num_samples = (SAMPLE_RATE as f32 * duration_secs) as usize;
    (0..num_samples)
        .map(|i| {
            let t = i as f32 / SAMPLE_RATE as f32;
            amplitude * (2.0 * std::f32::consts::PI * frequency * t).sin()
        })
        .collect()
}

/// Generate silence
fn generate_silence(duration_secs: f32) -> Vec<f32> {
    let num_samples = (SAMPLE_RATE as f32 * duration_secs) as usize;
    vec![0.0; num_samples]
}

#[test]
fn test_samples_to_wav_is_readable() {
    let samples = generate_sine_samples(440.0, 0.5, 0.5);
    let wav = samples_to_wav(&samples, SAMPLE_RATE).unwrap();

    assert!(is_wav(&wav));
    let reader = hound::WavReader::new(Cursor::new(wav)).unwrap();
    let spec = reader.spec();
    assert_eq!(spec.channels, 1);
    assert_eq!(spec.sample_rate, SAMPLE_RATE);
    assert_eq!(spec.bits_per_sample, 16);
    assert_eq!(reader.len() as usize, samples.len());
}

#[test]
fn test_chunks_reassemble_into_wav() {
    let mut encoder = ChunkEncoder::new();
    let mut payload = Vec::new();

    for part in generate_sine_samples(440.0, 0.3, 0.4).chunks(1024) {
        encoder.push(part);
        payload.extend(encoder.take_chunk().unwrap());
    }
    assert!(encoder.take_chunk().is_none());
    assert_eq!(encoder.encoded_bytes(), payload.len());

    let wav = pcm16_to_wav(&payload, SAMPLE_RATE).unwrap();
    let mut reader = hound::WavReader::new(Cursor::new(wav)).unwrap();
    let decoded: Vec<i16> = reader.samples::<i16>().map(Result::unwrap).collect();

    let expected: Vec<i16> = payload
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    assert_eq!(decoded, expected);
}

#[test]
fn test_raw_pcm_is_not_wav() {
    assert!(!is_wav(&[0u8; 64]));
    assert!(!is_wav(b"RIFF"));
}

#[test]
fn test_segmenter_emits_speech_then_resets() {
    let mut segmenter = SpeechSegmenter::new();

    assert!(segmenter.process(&generate_silence(0.5)).is_none());

    let speech = generate_sine_samples(300.0, 0.5, 0.5);
    let mut segment = None;
    for part in speech.chunks(1600).chain(generate_silence(0.7).chunks(1600)) {
        if let Some(done) = segmenter.process(part) {
            segment = Some(done);
        }
    }

    let segment = segment.expect("speech followed by silence should end a segment");
    assert!(segment.len() >= speech.len());

    // Back to idle: silence alone produces nothing
    assert!(segmenter.process(&generate_silence(1.0)).is_none());
}

#[test]
fn test_short_blip_is_not_speech() {
    let mut segmenter = SpeechSegmenter::new();
    let blip = generate_sine_samples(300.0, 0.1, 0.5);

    assert!(segmenter.process(&blip).is_none());
    for part in generate_silence(2.0).chunks(1600) {
        assert!(segmenter.process(part).is_none());
    }
}

#[test]
fn test_tone_is_louder_than_silence() {
    let mut analyser = SpectrumAnalyser::new();
    analyser.push(&generate_silence(0.2));
    let quiet = volume_db(average_volume(&analyser.byte_frequency_data()));

    let mut analyser = SpectrumAnalyser::new();
    analyser.push(&generate_sine_samples(1000.0, 0.2, 0.8));
    let loud = volume_db(average_volume(&analyser.byte_frequency_data()));

    assert!(loud > quiet, "tone {loud} dB vs silence {quiet} dB");
}

#[test]
fn test_tone_cue_fades_in_and_out() {
    let samples = ToneCue::new(880.0, Duration::from_millis(100)).samples(SAMPLE_RATE);

    assert!((1599..=1600).contains(&samples.len()));
    assert!(samples[0].abs() < 1e-3);
    assert!(samples[samples.len() - 1].abs() < 0.05);
    assert!(samples.iter().all(|s| s.abs() <= 0.3 + f32::EPSILON));
    assert!(samples.iter().any(|s| s.abs() > 0.2));
}

#[test]
fn test_language_hint() {
    assert_eq!(language_hint("ru-RU").as_deref(), Some("ru"));
    assert_eq!(language_hint("en_US").as_deref(), Some("en"));
    assert_eq!(language_hint("de").as_deref(), Some("de"));
    assert_eq!(language_hint(""), None);
}

#[test]
fn test_warm_microphone_acquires_once() {
    let inner = FakeMicrophone::new();
    let warm = WarmMicrophone::new(inner.clone());

    warm.acquire().unwrap();
    warm.acquire().unwrap();
    assert_eq!(inner.acquisitions.load(std::sync::atomic::Ordering::SeqCst), 1);

    warm.release();
    warm.acquire().unwrap();
    assert_eq!(inner.acquisitions.load(std::sync::atomic::Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_buffered_capture_returns_recording() {
    let mic = FakeMicrophone::new();
    let capture = AudioCaptureSession::new(mic.clone(), CaptureMode::Buffered);

    capture.start().await.unwrap();
    mic.push(&[0.5; 800]);
    mic.push(&[-0.5; 800]);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let recording = capture.stop().await.unwrap();
    assert_eq!(recording.len(), 3200);
    assert_eq!(capture.live_encoders(), 0);

    // A stopped session can record again on the same stream
    capture.start().await.unwrap();
    assert!(capture.is_active().await);
    capture.release().await.unwrap();
    assert!(capture.stream().await.is_none());
    assert_eq!(mic.acquisitions.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_wake_word_from_live_audio() {
    let mic = FakeMicrophone::new();
    let stt = FakeStt::new("Привет, ассистент");

    let (events_tx, events_rx) = mpsc::unbounded_channel::<RecognitionEvent>();
    let engine = SegmentingEngine::new(mic.clone(), stt.clone(), events_tx, "ru-RU");
    let recognizer = WakeWordRecognizer::new(Arc::new(engine), "привет");
    let _pump = recognizer.spawn_event_pump(events_rx);

    let (heard_tx, mut heard_rx) = mpsc::unbounded_channel();
    recognizer.on_wake_word(Arc::new(move |transcript| {
        let _ = heard_tx.send(transcript);
    }));
    recognizer.set_enabled(true);

    let speech = generate_sine_samples(300.0, 0.5, 0.5);
    let silence = generate_silence(0.7);
    for part in speech.chunks(1600).chain(silence.chunks(1600)) {
        mic.push(part);
    }

    let transcript = tokio::time::timeout(Duration::from_secs(5), heard_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(transcript, "привет, ассистент");
    assert!(!recognizer.is_enabled());

    let calls = stt.calls();
    assert_eq!(calls.len(), 1);
    assert!(is_wav(&calls[0].0));
    assert_eq!(calls[0].1, "audio/wav");
}
