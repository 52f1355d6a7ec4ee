//! Audio encoding
//!
//! The client streams raw PCM16 little-endian chunks; the server wraps the
//! reassembled payload in a WAV container before handing it to STT.

use crate::{Error, Result};

/// Convert f32 samples to WAV bytes for STT APIs
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = wav_spec(sample_rate);

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            writer
                .write_sample(to_i16(sample))
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}

/// Wrap PCM16 LE bytes in a WAV container
///
/// A trailing odd byte is ignored.
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn pcm16_to_wav(pcm: &[u8], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = wav_spec(sample_rate);

    let mut cursor = std::io::Cursor::new(Vec::with_capacity(pcm.len() + 44));
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for pair in pcm.chunks_exact(2) {
            writer
                .write_sample(i16::from_le_bytes([pair[0], pair[1]]))
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}

/// Whether the payload already carries a RIFF/WAVE header
#[must_use]
pub fn is_wav(bytes: &[u8]) -> bool {
    bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WAVE"
}

/// Mime type of a self-describing audio container, if the payload starts with one
///
/// Recognizes WAV, WebM/Matroska (EBML), Ogg and ID3-tagged MP3. Headerless
/// PCM16 yields `None`. A bare MPEG frame sync is not accepted since a quiet
/// PCM16 sample such as `-1` encodes to the same bytes.
#[must_use]
pub fn container_mime(bytes: &[u8]) -> Option<&'static str> {
    if is_wav(bytes) {
        return Some("audio/wav");
    }
    match bytes {
        [0x1a, 0x45, 0xdf, 0xa3, ..] => Some("audio/webm"),
        [b'O', b'g', b'g', b'S', ..] => Some("audio/ogg"),
        [b'I', b'D', b'3', 2..=4, 0, ..] => Some("audio/mpeg"),
        _ => None,
    }
}

/// Make an utterance payload ready for transcription
///
/// Container formats pass through unchanged with their mime type; anything
/// else is taken as PCM16 LE and wrapped in WAV.
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn prepare_utterance(payload: Vec<u8>, sample_rate: u32) -> Result<(Vec<u8>, &'static str)> {
    if let Some(mime) = container_mime(&payload) {
        return Ok((payload, mime));
    }
    Ok((pcm16_to_wav(&payload, sample_rate)?, "audio/wav"))
}

const fn wav_spec(sample_rate: u32) -> hound::WavSpec {
    hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    }
}

/// Convert f32 [-1.0, 1.0] to i16
#[allow(clippy::cast_possible_truncation)]
fn to_i16(sample: f32) -> i16 {
    (sample * 32767.0).clamp(-32768.0, 32767.0) as i16
}

/// Incremental PCM16 encoder producing timed chunks
///
/// Samples are appended with [`push`](Self::push); the capture session calls
/// [`take_chunk`](Self::take_chunk) on every timeslice.
#[derive(Debug, Default)]
pub struct ChunkEncoder {
    pending: Vec<u8>,
    encoded_bytes: usize,
}

impl ChunkEncoder {
    /// Create an empty encoder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append samples to the current chunk
    pub fn push(&mut self, samples: &[f32]) {
        self.pending.reserve(samples.len() * 2);
        for &sample in samples {
            self.pending.extend_from_slice(&to_i16(sample).to_le_bytes());
        }
    }

    /// Take the bytes encoded since the last call, if any
    pub fn take_chunk(&mut self) -> Option<Vec<u8>> {
        if self.pending.is_empty() {
            return None;
        }
        let chunk = std::mem::take(&mut self.pending);
        self.encoded_bytes += chunk.len();
        Some(chunk)
    }

    /// Total bytes handed out so far
    #[must_use]
    pub const fn encoded_bytes(&self) -> usize {
        self.encoded_bytes
    }
}
