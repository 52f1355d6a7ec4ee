//! One-shot speech endpoint
//!
//! `POST /speech` takes a whole recording as the multipart field `audio` and
//! answers with the transcription and the full reply. Each request starts a
//! fresh conversation.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
};
use serde::{Deserialize, Serialize};

use super::ApiState;
use crate::conversation::NullSink;
use crate::voice::{SAMPLE_RATE, prepare_utterance};

/// Uploads larger than this are rejected
const MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

/// Successful turn
#[derive(Debug, Serialize, Deserialize)]
pub struct SpeechResponse {
    pub transcription: String,
    pub response: String,
}

/// Speech API errors
#[derive(Debug)]
pub enum SpeechError {
    /// The upload is missing or unreadable
    BadRequest(String),
    /// Transcription or completion failed
    TurnFailed(String),
}

impl IntoResponse for SpeechError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: String,
        }

        let (status, error) = match self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::TurnFailed(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        (status, Json(ErrorResponse { error })).into_response()
    }
}

/// Transcribe an upload and answer it
async fn speech(
    State(state): State<Arc<ApiState>>,
    mut multipart: Multipart,
) -> Result<Json<SpeechResponse>, SpeechError> {
    let mut upload = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| SpeechError::BadRequest(format!("invalid multipart body: {e}")))?
    {
        if field.name() != Some("audio") {
            continue;
        }

        let mime_type = field.content_type().unwrap_or("audio/wav").to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| SpeechError::BadRequest(format!("failed to read audio: {e}")))?;
        upload = Some((bytes, mime_type));
        break;
    }

    let Some((bytes, mime_type)) = upload else {
        return Err(SpeechError::BadRequest("no audio file provided".to_string()));
    };
    if bytes.is_empty() {
        return Err(SpeechError::BadRequest("empty audio data".to_string()));
    }

    tracing::info!(bytes = bytes.len(), mime = %mime_type, "speech upload received");

    // Raw PCM from the native client arrives as octet-stream
    let (audio, mime_type) = if mime_type == "application/octet-stream" {
        let (audio, sniffed) = prepare_utterance(bytes.to_vec(), SAMPLE_RATE)
            .map_err(|e| SpeechError::BadRequest(e.to_string()))?;
        (audio, sniffed.to_string())
    } else {
        (bytes.to_vec(), mime_type)
    };

    let engine = state.new_engine();
    let outcome = engine
        .process_utterance(&audio, &mime_type, &NullSink)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "speech turn failed");
            SpeechError::TurnFailed(e.to_string())
        })?;

    Ok(Json(SpeechResponse {
        transcription: outcome.transcription,
        response: outcome.response,
    }))
}

/// Build speech router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/speech", post(speech))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
}
