//! Streaming transport to the conversation server
//!
//! A single WebSocket carries binary audio chunks up and JSON reply frames
//! down. The link reconnects on its own after any close until
//! [`ChunkTransport::disconnect`] is called.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime};

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::protocol::{ClientMessage, ServerMessage};
use crate::voice::ChunkSink;
use crate::{Error, Result};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Reconnection backoff
///
/// Attempts are unlimited; the delay doubles from `base_delay` up to
/// `max_delay`.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Delay before the first reconnect
    pub base_delay: Duration,
    /// Maximum delay cap
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(3),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl ReconnectPolicy {
    /// Policy with a custom first delay
    #[must_use]
    pub fn with_base_delay(base_delay: Duration) -> Self {
        Self {
            base_delay,
            ..Self::default()
        }
    }

    /// Delay before reconnect attempt number `attempt` (zero-based)
    ///
    /// `min(base_delay * 2^attempt + jitter, max_delay)`, with 0-25% jitter
    /// taken from the clock's subsecond nanos.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_delay);

        let jitter_nanos = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .subsec_nanos();

        let jitter_fraction = f64::from(jitter_nanos % 250) / 1000.0;
        let jitter = base.mul_f64(jitter_fraction);

        (base + jitter).min(self.max_delay)
    }
}

/// Link state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Closed,
    Connecting,
    Open,
}

struct LinkState {
    status: LinkStatus,
    outbound: Option<mpsc::UnboundedSender<Message>>,
    wanted: bool,
    attempt: u32,
    generation: u64,
    sessions: u64,
    task: Option<JoinHandle<()>>,
}

struct Inner {
    url: String,
    policy: ReconnectPolicy,
    inbound: mpsc::UnboundedSender<ServerMessage>,
    state: Mutex<LinkState>,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, LinkState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Persistent WebSocket link to the server
///
/// Every decoded server frame is forwarded to the `inbound` channel given at
/// construction.
#[derive(Clone)]
pub struct ChunkTransport {
    inner: Arc<Inner>,
}

impl ChunkTransport {
    /// Create a closed transport
    #[must_use]
    pub fn new(
        url: impl Into<String>,
        policy: ReconnectPolicy,
        inbound: mpsc::UnboundedSender<ServerMessage>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                url: url.into(),
                policy,
                inbound,
                state: Mutex::new(LinkState {
                    status: LinkStatus::Closed,
                    outbound: None,
                    wanted: false,
                    attempt: 0,
                    generation: 0,
                    sessions: 0,
                    task: None,
                }),
            }),
        }
    }

    /// Open the link; no-op while open or connecting
    pub fn connect(&self) {
        let mut state = self.inner.state();
        state.wanted = true;
        if state.status != LinkStatus::Closed {
            return;
        }

        state.status = LinkStatus::Connecting;
        state.attempt = 0;
        state.generation += 1;
        let generation = state.generation;

        tracing::debug!(url = %self.inner.url, "connecting");
        state.task = Some(tokio::spawn(run_link(Arc::clone(&self.inner), generation)));
    }

    /// Close the link and cancel reconnection
    pub fn disconnect(&self) {
        let mut state = self.inner.state();
        state.wanted = false;
        state.generation += 1;

        // Dropping the sender closes an open socket gracefully
        let was_open = state.outbound.take().is_some();
        if let Some(task) = state.task.take() {
            if !was_open {
                task.abort();
            }
        }

        if state.status != LinkStatus::Closed {
            tracing::info!("transport disconnected");
        }
        state.status = LinkStatus::Closed;
    }

    /// Current link state
    #[must_use]
    pub fn status(&self) -> LinkStatus {
        self.inner.state().status
    }

    /// Number of sockets opened so far
    ///
    /// The server keeps one conversation per socket, so a change here means
    /// replies owed on the old socket are gone.
    #[must_use]
    pub fn session(&self) -> u64 {
        self.inner.state().sessions
    }

    /// Whether chunks can be sent right now
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.status() == LinkStatus::Open
    }

    /// Send one audio chunk
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] when the link is not open. The chunk is
    /// dropped and a connection attempt is started.
    pub fn send_chunk(&self, chunk: Vec<u8>) -> Result<()> {
        let sent = {
            let state = self.inner.state();
            state
                .outbound
                .as_ref()
                .filter(|_| state.status == LinkStatus::Open)
                .is_some_and(|tx| tx.send(Message::Binary(chunk.into())).is_ok())
        };

        if sent {
            return Ok(());
        }

        self.connect();
        Err(Error::Transport("not connected, chunk dropped".to_string()))
    }

    /// Tell the server the utterance is complete
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] when the link is not open
    pub fn send_end_of_utterance(&self) -> Result<()> {
        let text = serde_json::to_string(&ClientMessage::End)?;

        let state = self.inner.state();
        let Some(tx) = state
            .outbound
            .as_ref()
            .filter(|_| state.status == LinkStatus::Open)
        else {
            tracing::warn!("cannot send end of utterance, not connected");
            return Err(Error::Transport("not connected".to_string()));
        };

        tx.send(Message::Text(text.into()))
            .map_err(|_| Error::Transport("connection closed".to_string()))?;
        tracing::debug!("end of utterance sent");
        Ok(())
    }
}

impl ChunkSink for ChunkTransport {
    fn send_chunk(&self, chunk: Vec<u8>) {
        let bytes = chunk.len();
        if let Err(e) = Self::send_chunk(self, chunk) {
            tracing::debug!(bytes, error = %e, "chunk not sent");
        }
    }
}

/// Connect, pump frames until close, then back off and retry
async fn run_link(inner: Arc<Inner>, generation: u64) {
    loop {
        match tokio_tungstenite::connect_async(inner.url.as_str()).await {
            Ok((socket, _response)) => {
                let (tx, rx) = mpsc::unbounded_channel();
                {
                    let mut state = inner.state();
                    if state.generation != generation {
                        return;
                    }
                    state.status = LinkStatus::Open;
                    state.outbound = Some(tx);
                    state.sessions += 1;
                    state.attempt = 0;
                }

                tracing::info!(url = %inner.url, "transport connected");
                pump(socket, rx, &inner.inbound).await;
                tracing::info!("transport closed");
            }
            Err(e) => {
                tracing::warn!(url = %inner.url, error = %e, "connection failed");
            }
        }

        let delay = {
            let mut state = inner.state();
            if state.generation != generation {
                return;
            }
            state.outbound = None;
            if !state.wanted {
                state.status = LinkStatus::Closed;
                return;
            }
            state.status = LinkStatus::Connecting;
            let delay = inner.policy.delay_for_attempt(state.attempt);
            state.attempt = state.attempt.saturating_add(1);
            delay
        };

        tracing::info!(
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "reconnecting"
        );
        tokio::time::sleep(delay).await;
    }
}

/// Move frames both ways until either side closes
async fn pump(
    socket: Socket,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    inbound: &mpsc::UnboundedSender<ServerMessage>,
) {
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            msg = outbound.recv() => {
                let Some(msg) = msg else {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                };
                if let Err(e) = sink.send(msg).await {
                    tracing::warn!(error = %e, "send failed");
                    break;
                }
            }
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<ServerMessage>(&text) {
                        Ok(message) => {
                            let _ = inbound.send(message);
                        }
                        Err(e) => tracing::warn!(error = %e, "unrecognized server frame"),
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::debug!(close_frame = ?frame, "server closed connection");
                    break;
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Binary(_) | Message::Frame(_))) => {}
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "websocket error");
                    break;
                }
                None => break,
            },
        }
    }
}
