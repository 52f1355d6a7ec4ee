//! WebSocket handler for streamed utterances
//!
//! Binary frames are audio chunks. A `{"type":"end"}` text frame closes the
//! utterance and queues a turn; the turn's transcription, reply deltas and
//! `done` marker are written back as JSON text frames.

use std::sync::Arc;

use axum::{
    Router,
    body::Bytes,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
    routing::get,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use super::ApiState;
use crate::conversation::{ConversationEngine, ReplySink};
use crate::protocol::{ClientMessage, ServerMessage};
use crate::voice::{SAMPLE_RATE, prepare_utterance};

/// Utterances waiting behind the one being processed
const TURN_QUEUE: usize = 4;

/// Chunks received since the last end-of-utterance
#[derive(Debug, Default)]
pub struct IngestionBuffer {
    chunks: Vec<Bytes>,
}

impl IngestionBuffer {
    /// Create an empty buffer
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one chunk
    pub fn push(&mut self, chunk: Bytes) {
        self.chunks.push(chunk);
    }

    /// Concatenate every chunk in arrival order and clear the buffer
    pub fn take(&mut self) -> Vec<u8> {
        let chunks = std::mem::take(&mut self.chunks);
        let mut payload = Vec::with_capacity(chunks.iter().map(Bytes::len).sum());
        for chunk in &chunks {
            payload.extend_from_slice(chunk);
        }
        payload
    }

    /// Number of chunks held
    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Total bytes held
    #[must_use]
    pub fn byte_len(&self) -> usize {
        self.chunks.iter().map(Bytes::len).sum()
    }

    /// Whether nothing has arrived since the last take
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

/// Build WebSocket router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new().route("/", get(ws_handler)).with_state(state)
}

/// WebSocket upgrade handler
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle WebSocket connection
async fn handle_socket(socket: WebSocket, state: Arc<ApiState>) {
    let session_id = uuid::Uuid::new_v4().to_string();
    tracing::info!(session_id = %session_id, "WebSocket connected");

    let (mut sender, mut receiver) = socket.split();

    // Frames for the client
    let (tx, mut rx) = mpsc::channel::<ServerMessage>(64);

    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Ok(text) = serde_json::to_string(&msg) {
                if sender.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
        }
    });

    // One turn at a time against this connection's history
    let (turn_tx, turn_rx) = mpsc::channel::<Vec<u8>>(TURN_QUEUE);
    let worker = tokio::spawn(run_turns(state.new_engine(), turn_rx, tx.clone()));

    let session_id_clone = session_id.clone();
    let mut recv_task = tokio::spawn(async move {
        let mut buffer = IngestionBuffer::new();

        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Binary(chunk) => {
                    tracing::trace!(bytes = chunk.len(), "audio chunk received");
                    buffer.push(chunk);
                }
                Message::Text(text) => {
                    handle_control(&text, &mut buffer, &turn_tx, &tx).await;
                }
                Message::Ping(data) => {
                    tracing::trace!(len = data.len(), "received ping");
                }
                Message::Close(_) => {
                    tracing::info!(session_id = %session_id_clone, "WebSocket closed by client");
                    break;
                }
                Message::Pong(_) => {}
            }
        }

        if !buffer.is_empty() {
            tracing::debug!(
                chunks = buffer.chunk_count(),
                bytes = buffer.byte_len(),
                "discarding unfinished utterance"
            );
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    worker.abort();

    tracing::info!(session_id = %session_id, "WebSocket disconnected");
}

/// Handle one text frame
async fn handle_control(
    text: &str,
    buffer: &mut IngestionBuffer,
    turns: &mpsc::Sender<Vec<u8>>,
    tx: &mpsc::Sender<ServerMessage>,
) {
    let value: serde_json::Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(error = %e, "invalid control message");
            let _ = tx
                .send(ServerMessage::error(format!("invalid message: {e}")))
                .await;
            return;
        }
    };

    match serde_json::from_value::<ClientMessage>(value.clone()) {
        Ok(ClientMessage::End) => {
            let chunks = buffer.chunk_count();
            let payload = buffer.take();
            tracing::info!(chunks, bytes = payload.len(), "utterance complete");

            if turns.send(payload).await.is_err() {
                tracing::warn!("turn worker gone, dropping utterance");
            }
        }
        Err(_) => {
            tracing::warn!(message_type = ?value.get("type"), "ignoring unknown message type");
        }
    }
}

/// Process queued utterances in order
async fn run_turns(
    engine: ConversationEngine,
    mut turns: mpsc::Receiver<Vec<u8>>,
    tx: mpsc::Sender<ServerMessage>,
) {
    while let Some(payload) = turns.recv().await {
        if payload.is_empty() {
            tracing::warn!("end of utterance without audio");
            tx.emit(ServerMessage::error("no audio received")).await;
            tx.emit(ServerMessage::Done).await;
            continue;
        }

        let (audio, mime_type) = match prepare_utterance(payload, SAMPLE_RATE) {
            Ok(prepared) => prepared,
            Err(e) => {
                tracing::error!(error = %e, "failed to wrap utterance");
                tx.emit(ServerMessage::error(e.to_string())).await;
                tx.emit(ServerMessage::Done).await;
                continue;
            }
        };

        tracing::debug!(bytes = audio.len(), mime = mime_type, "turn audio ready");
        engine.handle_utterance(&audio, mime_type, &tx).await;

        if tx.is_closed() {
            break;
        }
    }
}
