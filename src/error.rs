//! Error types for wakeline

use thiserror::Error;

/// Result type alias for wakeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in wakeline
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Microphone capture error
    #[error("capture error: {0}")]
    Capture(#[from] CaptureError),

    /// Audio processing error (encoding, analysis, playback)
    #[error("audio error: {0}")]
    Audio(String),

    /// Continuous recognition error
    #[error("recognition error: {0}")]
    Recognition(String),

    /// Client transport error
    #[error("transport error: {0}")]
    Transport(String),

    /// Speech-to-text provider error
    #[error("transcription error: {0}")]
    Transcription(String),

    /// Chat-completion provider error
    #[error("completion error: {0}")]
    Completion(String),

    /// Tool execution error
    #[error("tool error: {0}")]
    Tool(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// WebSocket protocol error
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Reasons a capture session cannot acquire the microphone
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    /// The OS or user refused access to the input device
    #[error("microphone permission denied")]
    PermissionDenied,

    /// No input device is present
    #[error("no input device available")]
    NoDevice,

    /// The device exists but could not be opened or configured
    #[error("input device failure: {0}")]
    Device(String),
}
