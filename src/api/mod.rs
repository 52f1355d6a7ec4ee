//! HTTP and WebSocket API
//!
//! Serves the streaming conversation socket at `/ws`, the one-shot
//! `POST /speech` fallback, health checks and, optionally, a static UI.

mod health;
mod speech;
mod websocket;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::conversation::{ConversationEngine, EngineSettings};
use crate::providers::{ChatCompletion, OpenAiChat};
use crate::tools::{ToolRegistry, WeatherTool};
use crate::voice::{CloudStt, SpeechToText};
use crate::Result;

pub use health::HealthResponse;
pub use speech::{SpeechError, SpeechResponse};
pub use websocket::IngestionBuffer;

/// Shared state for API handlers
pub struct ApiState {
    /// Speech-to-text provider
    pub stt: Arc<dyn SpeechToText>,
    /// Chat-completion provider
    pub chat: Arc<dyn ChatCompletion>,
    /// Tools offered to the model, shared by every connection
    pub tools: Arc<ToolRegistry>,
    /// Engine tuning applied to each new conversation
    pub settings: EngineSettings,
}

impl ApiState {
    /// Create API state from its parts
    #[must_use]
    pub fn new(
        stt: Arc<dyn SpeechToText>,
        chat: Arc<dyn ChatCompletion>,
        tools: Arc<ToolRegistry>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            stt,
            chat,
            tools,
            settings,
        }
    }

    /// Build state with the cloud providers and the default tool set
    ///
    /// # Errors
    ///
    /// Returns error if a required API key is missing
    pub fn from_config(config: &Config) -> Result<Self> {
        let openai_key = config.require_openai_key()?.to_string();

        let stt = CloudStt::from_config(
            &config.stt,
            config.api_keys.openai.as_deref(),
            config.api_keys.deepgram.as_deref(),
        )?;
        let chat = OpenAiChat::new(openai_key, &config.llm)?;

        let mut tools = ToolRegistry::new();
        let mut weather = WeatherTool::new(config.api_keys.weather.clone());
        if let Some(base_url) = &config.tools.weather_base_url {
            weather = weather.with_base_url(base_url.as_str());
        }
        tools.register(Arc::new(weather))?;

        tracing::info!(
            stt = ?config.stt.provider,
            model = %config.llm.model,
            tools = ?tools.names().collect::<Vec<_>>(),
            "providers configured"
        );

        Ok(Self::new(
            Arc::new(stt),
            Arc::new(chat),
            Arc::new(tools),
            EngineSettings::from(&config.server),
        ))
    }

    /// Start a conversation with an empty history
    #[must_use]
    pub fn new_engine(&self) -> ConversationEngine {
        ConversationEngine::new(
            self.stt.clone(),
            self.chat.clone(),
            self.tools.clone(),
            self.settings.clone(),
        )
    }
}

/// Build the full router
///
/// Unknown paths fall through to `static_dir` when one is given, with
/// `index.html` served for anything it does not contain.
pub fn router(state: Arc<ApiState>, static_dir: Option<&Path>) -> Router {
    let mut router = Router::new()
        .nest("/ws", websocket::router(state.clone()))
        .merge(speech::router(state))
        .merge(health::router());

    if let Some(static_dir) = static_dir {
        let index_file = static_dir.join("index.html");
        let serve_dir = ServeDir::new(static_dir).not_found_service(ServeFile::new(&index_file));

        router = router.fallback_service(serve_dir);
        tracing::info!(path = %static_dir.display(), "serving static files");
    }

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    router.layer(cors).layer(TraceLayer::new_for_http())
}

/// API server
pub struct ApiServer {
    state: Arc<ApiState>,
    port: u16,
    static_dir: Option<PathBuf>,
}

impl ApiServer {
    /// Create a new API server
    #[must_use]
    pub fn new(state: Arc<ApiState>, port: u16) -> Self {
        Self {
            state,
            port,
            static_dir: None,
        }
    }

    /// Serve a static UI from `dir`
    #[must_use]
    pub fn with_static_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.static_dir = dir;
        self
    }

    /// Run the API server
    ///
    /// # Errors
    ///
    /// Returns error if server fails to bind or run
    pub async fn run(self) -> Result<()> {
        let addr = format!("0.0.0.0:{}", self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| crate::Error::Config(format!("failed to bind API server: {e}")))?;

        tracing::info!(port = self.port, "API server listening");

        axum::serve(listener, router(self.state, self.static_dir.as_deref()))
            .await
            .map_err(|e| crate::Error::Config(format!("API server error: {e}")))?;

        Ok(())
    }

    /// Run the API server in a background task
    #[must_use]
    pub fn spawn(self) -> tokio::task::JoinHandle<Result<()>> {
        tokio::spawn(async move { self.run().await })
    }
}
