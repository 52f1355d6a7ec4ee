//! TOML configuration file loading
//!
//! Supports `~/.config/wakeline/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct WakelineConfigFile {
    /// Server/runtime configuration
    #[serde(default)]
    pub server: ServerFileConfig,

    /// Chat-completion configuration
    #[serde(default)]
    pub llm: LlmFileConfig,

    /// Speech-to-text configuration
    #[serde(default)]
    pub stt: SttFileConfig,

    /// Listening client configuration
    #[serde(default)]
    pub client: ClientFileConfig,

    /// Tool configuration
    #[serde(default)]
    pub tools: ToolsFileConfig,

    /// API keys for external services
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,
}

/// Server/runtime configuration
#[derive(Debug, Default, Deserialize)]
pub struct ServerFileConfig {
    /// HTTP/WebSocket port
    pub port: Option<u16>,

    /// Directory of static UI files served at `/`
    pub static_dir: Option<String>,

    /// Fixed system message opening every conversation
    pub system_prompt: Option<String>,

    /// Conversation window in seconds
    pub history_window_secs: Option<u64>,

    /// Deadline for a single provider call in seconds
    pub provider_timeout_secs: Option<u64>,
}

/// Chat-completion configuration
#[derive(Debug, Default, Deserialize)]
pub struct LlmFileConfig {
    /// Model identifier (e.g. "gpt-4o-mini")
    pub model: Option<String>,

    /// OpenAI-compatible API base URL
    pub base_url: Option<String>,
}

/// Speech-to-text configuration
#[derive(Debug, Default, Deserialize)]
pub struct SttFileConfig {
    /// "whisper" or "deepgram"
    pub provider: Option<String>,

    /// Model identifier (e.g. "whisper-1", "nova-2")
    pub model: Option<String>,

    /// Language hint (e.g. "ru")
    pub language: Option<String>,

    /// API base URL override
    pub base_url: Option<String>,
}

/// Listening client configuration
#[derive(Debug, Default, Deserialize)]
pub struct ClientFileConfig {
    /// WebSocket URL of the server
    pub server_url: Option<String>,

    /// HTTP base URL used by the REST fallback
    pub http_url: Option<String>,

    /// Wake phrase
    pub wake_word: Option<String>,

    /// Recognition language tag (e.g. "ru-RU")
    pub language: Option<String>,

    /// Silence threshold in dB
    pub silence_threshold_db: Option<f32>,

    /// Silence duration before ending an utterance, in milliseconds
    pub silence_duration_ms: Option<u64>,

    /// Time without server frames before a reply is considered finished
    pub reply_timeout_secs: Option<u64>,

    /// Base reconnect delay in milliseconds
    pub reconnect_delay_ms: Option<u64>,
}

/// Tool configuration
#[derive(Debug, Default, Deserialize)]
pub struct ToolsFileConfig {
    /// Weather API host
    pub weather_base_url: Option<String>,
}

/// API keys configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiKeysFileConfig {
    pub openai: Option<String>,
    pub deepgram: Option<String>,
    pub weather: Option<String>,
}

/// Load the TOML config file from the standard path
///
/// Returns `WakelineConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> WakelineConfigFile {
    config_file_path().map_or_else(WakelineConfigFile::default, |path| load_from_path(&path))
}

/// Load a TOML config file from an explicit path
///
/// Missing or malformed files fall back to defaults with a warning.
pub fn load_from_path(path: &Path) -> WakelineConfigFile {
    if !path.exists() {
        return WakelineConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                WakelineConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            WakelineConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/wakeline/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("wakeline").join("config.toml"))
}
