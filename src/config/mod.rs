//! Configuration management for wakeline
//!
//! Values resolve in the order env > TOML file > default.

pub mod file;

use std::path::PathBuf;
use std::time::Duration;

use crate::{Error, Result};

use file::WakelineConfigFile;

/// Default system message opening every conversation
pub const DEFAULT_SYSTEM_PROMPT: &str =
    "Ты умный помощник, реализованный в виде умной колонки. Отвечай коротко и разговорно.";

/// Default conversation window (10 minutes)
pub const DEFAULT_HISTORY_WINDOW: Duration = Duration::from_secs(600);

/// Wakeline configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP/WebSocket server configuration
    pub server: ServerConfig,

    /// Chat-completion provider configuration
    pub llm: LlmConfig,

    /// Speech-to-text provider configuration
    pub stt: SttConfig,

    /// Listening client configuration
    pub client: ClientConfig,

    /// Tool configuration
    pub tools: ToolsConfig,

    /// API keys
    pub api_keys: ApiKeys,
}

/// HTTP/WebSocket server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to listen on
    pub port: u16,

    /// Path to static files directory (web UI)
    pub static_dir: Option<PathBuf>,

    /// Fixed system message
    pub system_prompt: String,

    /// How far back the conversation window reaches
    pub history_window: Duration,

    /// Deadline for each provider call
    pub provider_timeout: Duration,
}

/// Chat-completion provider configuration
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Model identifier
    pub model: String,

    /// OpenAI-compatible base URL (without trailing slash)
    pub base_url: String,
}

/// Speech-to-text backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SttProviderKind {
    /// `OpenAI` Whisper
    Whisper,
    /// Deepgram
    Deepgram,
}

impl SttProviderKind {
    /// Parse a provider name, case-insensitively
    ///
    /// # Errors
    ///
    /// Returns error for unknown provider names
    pub fn parse(name: &str) -> Result<Self> {
        match name.trim().to_lowercase().as_str() {
            "whisper" | "openai" => Ok(Self::Whisper),
            "deepgram" => Ok(Self::Deepgram),
            other => Err(Error::Config(format!("unknown STT provider: {other}"))),
        }
    }
}

/// Speech-to-text provider configuration
#[derive(Debug, Clone)]
pub struct SttConfig {
    /// Backend to use
    pub provider: SttProviderKind,

    /// Model identifier
    pub model: String,

    /// Optional language hint
    pub language: Option<String>,

    /// API base URL override; Whisper follows the chat endpoint by default
    pub base_url: Option<String>,
}

/// Listening client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// WebSocket URL of the server
    pub server_url: String,

    /// HTTP base URL for the REST fallback
    pub http_url: String,

    /// Wake phrase
    pub wake_word: String,

    /// Recognition language tag
    pub language: String,

    /// Silence threshold in dB
    pub silence_threshold_db: f32,

    /// Silence duration that ends an utterance
    pub silence_duration: Duration,

    /// Time without server frames before a reply is treated as finished
    pub reply_timeout: Duration,

    /// Base delay before reconnecting the transport
    pub reconnect_delay: Duration,
}

/// Tool configuration
#[derive(Debug, Clone, Default)]
pub struct ToolsConfig {
    /// `OpenWeatherMap`-compatible API host
    pub weather_base_url: Option<String>,
}

/// API keys for external services
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    /// `OpenAI` API key (chat completion and Whisper)
    pub openai: Option<String>,

    /// `Deepgram` API key (optional STT)
    pub deepgram: Option<String>,

    /// `OpenWeatherMap` API key (weather tool)
    pub weather: Option<String>,
}

impl Config {
    /// Load configuration from the environment and the standard config file
    ///
    /// # Errors
    ///
    /// Returns error if a value is present but invalid
    pub fn load() -> Result<Self> {
        let fc = file::load_config_file();
        Self::resolve(fc, |name| std::env::var(name).ok())
    }

    /// Resolve configuration from a parsed file and an environment lookup
    ///
    /// # Errors
    ///
    /// Returns error if a value is present but invalid
    pub fn resolve(fc: WakelineConfigFile, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let api_keys = ApiKeys {
            openai: env("OPENAI_API_KEY").or(fc.api_keys.openai),
            deepgram: env("DEEPGRAM_API_KEY").or(fc.api_keys.deepgram),
            weather: env("WEATHER_API_KEY").or(fc.api_keys.weather),
        };

        let port = match env("WAKELINE_PORT").or_else(|| env("PORT")) {
            Some(raw) => raw
                .parse()
                .map_err(|_| Error::Config(format!("invalid port: {raw}")))?,
            None => fc.server.port.unwrap_or(3000),
        };

        let server = ServerConfig {
            port,
            static_dir: env("WAKELINE_STATIC_DIR")
                .or(fc.server.static_dir)
                .map(PathBuf::from),
            system_prompt: env("WAKELINE_SYSTEM_PROMPT")
                .or(fc.server.system_prompt)
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            history_window: fc
                .server
                .history_window_secs
                .map_or(DEFAULT_HISTORY_WINDOW, Duration::from_secs),
            provider_timeout: Duration::from_secs(fc.server.provider_timeout_secs.unwrap_or(60)),
        };

        let llm = LlmConfig {
            model: env("OPENAI_MODEL")
                .or(fc.llm.model)
                .unwrap_or_else(|| "gpt-4o-mini".to_string()),
            base_url: env("OPENAI_BASE_URL")
                .or(fc.llm.base_url)
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string())
                .trim_end_matches('/')
                .to_string(),
        };

        let provider = env("WAKELINE_STT_PROVIDER")
            .or(fc.stt.provider)
            .map_or(Ok(SttProviderKind::Whisper), |name| SttProviderKind::parse(&name))?;
        let default_stt_model = match provider {
            SttProviderKind::Whisper => "whisper-1",
            SttProviderKind::Deepgram => "nova-2",
        };
        let stt = SttConfig {
            provider,
            model: env("WAKELINE_STT_MODEL")
                .or(fc.stt.model)
                .unwrap_or_else(|| default_stt_model.to_string()),
            language: env("WAKELINE_STT_LANGUAGE").or(fc.stt.language),
            base_url: env("WAKELINE_STT_BASE_URL")
                .or(fc.stt.base_url)
                .or_else(|| (provider == SttProviderKind::Whisper).then(|| llm.base_url.clone())),
        };

        let tools = ToolsConfig {
            weather_base_url: env("WEATHER_BASE_URL").or(fc.tools.weather_base_url),
        };

        let client = ClientConfig {
            server_url: env("WAKELINE_SERVER_URL")
                .or(fc.client.server_url)
                .unwrap_or_else(|| format!("ws://localhost:{port}/ws")),
            http_url: env("WAKELINE_HTTP_URL")
                .or(fc.client.http_url)
                .unwrap_or_else(|| format!("http://localhost:{port}")),
            wake_word: env("WAKELINE_WAKE_WORD")
                .or(fc.client.wake_word)
                .unwrap_or_else(|| "привет".to_string()),
            language: fc.client.language.unwrap_or_else(|| "ru-RU".to_string()),
            silence_threshold_db: fc.client.silence_threshold_db.unwrap_or(-50.0),
            silence_duration: Duration::from_millis(fc.client.silence_duration_ms.unwrap_or(2000)),
            reply_timeout: Duration::from_secs(fc.client.reply_timeout_secs.unwrap_or(30)),
            reconnect_delay: Duration::from_millis(fc.client.reconnect_delay_ms.unwrap_or(3000)),
        };

        Ok(Self {
            server,
            llm,
            stt,
            client,
            tools,
            api_keys,
        })
    }

    /// `OpenAI` key, required by the server
    ///
    /// # Errors
    ///
    /// Returns error if `OPENAI_API_KEY` is not configured
    pub fn require_openai_key(&self) -> Result<&str> {
        self.api_keys
            .openai
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| Error::Config("OPENAI_API_KEY is required".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_without_sources() {
        let config = Config::resolve(WakelineConfigFile::default(), env_from(&[])).unwrap();

        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.history_window, Duration::from_secs(600));
        assert_eq!(config.server.system_prompt, DEFAULT_SYSTEM_PROMPT);
        assert!(config.server.system_prompt.contains("умной колонки"));
        assert_eq!(config.client.wake_word, "привет");
        assert_eq!(config.client.language, "ru-RU");
        assert_eq!(config.llm.base_url, "https://api.openai.com/v1");
        assert_eq!(config.stt.provider, SttProviderKind::Whisper);
        assert_eq!(config.stt.model, "whisper-1");
        assert_eq!(config.stt.base_url.as_deref(), Some("https://api.openai.com/v1"));
        assert!(config.tools.weather_base_url.is_none());
        assert_eq!(config.client.server_url, "ws://localhost:3000/ws");
        assert_eq!(config.client.silence_duration, Duration::from_millis(2000));
        assert!((config.client.silence_threshold_db + 50.0).abs() < f32::EPSILON);
        assert!(config.require_openai_key().is_err());
    }

    #[test]
    fn env_overrides_file() {
        let mut fc = WakelineConfigFile::default();
        fc.server.port = Some(4000);
        fc.llm.model = Some("file-model".to_string());

        let config = Config::resolve(
            fc,
            env_from(&[("OPENAI_MODEL", "env-model"), ("OPENAI_API_KEY", "sk-test")]),
        )
        .unwrap();

        assert_eq!(config.server.port, 4000);
        assert_eq!(config.llm.model, "env-model");
        assert_eq!(config.client.server_url, "ws://localhost:4000/ws");
        assert_eq!(config.require_openai_key().unwrap(), "sk-test");
    }

    #[test]
    fn deepgram_default_model() {
        let config = Config::resolve(
            WakelineConfigFile::default(),
            env_from(&[("WAKELINE_STT_PROVIDER", "Deepgram")]),
        )
        .unwrap();

        assert_eq!(config.stt.provider, SttProviderKind::Deepgram);
        assert_eq!(config.stt.model, "nova-2");
        assert!(config.stt.base_url.is_none());
    }

    #[test]
    fn endpoint_overrides() {
        let mut fc = WakelineConfigFile::default();
        fc.tools.weather_base_url = Some("http://weather.local".to_string());

        let config = Config::resolve(
            fc,
            env_from(&[("OPENAI_BASE_URL", "http://gateway.local/v1/")]),
        )
        .unwrap();

        assert_eq!(config.llm.base_url, "http://gateway.local/v1");
        assert_eq!(config.stt.base_url.as_deref(), Some("http://gateway.local/v1"));
        assert_eq!(
            config.tools.weather_base_url.as_deref(),
            Some("http://weather.local")
        );

        let config = Config::resolve(
            WakelineConfigFile::default(),
            env_from(&[
                ("OPENAI_BASE_URL", "http://gateway.local/v1"),
                ("WAKELINE_STT_BASE_URL", "http://stt.local/v1"),
            ]),
        )
        .unwrap();
        assert_eq!(config.stt.base_url.as_deref(), Some("http://stt.local/v1"));
    }

    #[test]
    fn rejects_invalid_values() {
        assert!(Config::resolve(WakelineConfigFile::default(), env_from(&[("PORT", "abc")])).is_err());
        assert!(SttProviderKind::parse("vosk").is_err());
    }
}
