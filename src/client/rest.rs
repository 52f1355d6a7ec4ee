//! One-shot upload client for `POST /speech`

use reqwest::multipart::{Form, Part};
use serde::Deserialize;

use crate::{Error, Result};

/// Reply to an uploaded utterance
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SpeechReply {
    pub transcription: String,
    pub response: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// Sends whole recordings to the server's speech endpoint
pub struct SpeechClient {
    client: reqwest::Client,
    base_url: String,
}

impl SpeechClient {
    /// Create a client for the server at `base_url` (e.g. `http://localhost:3000`)
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Upload a recording and wait for the full reply
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or the server rejects the upload
    pub async fn send(&self, audio: Vec<u8>, file_name: &str, mime_type: &str) -> Result<SpeechReply> {
        let part = Part::bytes(audio)
            .file_name(file_name.to_string())
            .mime_str(mime_type)?;
        let form = Form::new().part("audio", part);

        tracing::debug!(url = %self.base_url, file = %file_name, "uploading recording");

        let response = self
            .client
            .post(format!("{}/speech", self.base_url))
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorBody>(&body)
                .map_or(body, |parsed| parsed.error);
            tracing::error!(status = %status, error = %message, "speech upload rejected");
            return Err(Error::Transport(format!("server returned {status}: {message}")));
        }

        Ok(response.json().await?)
    }
}
