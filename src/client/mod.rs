//! Listening client
//!
//! Wake word, capture and silence detection coordinated by
//! [`ClientOrchestrator`], with audio streamed over [`ChunkTransport`].
//! [`SpeechClient`] is the buffered fallback that uploads a whole recording,
//! driven by [`PushToTalk`] from the command line.

mod orchestrator;
mod push_to_talk;
mod rest;
mod transport;

pub use orchestrator::{
    ClientEvent, ClientOrchestrator, ClientParts, ListeningMode, OrchestratorHandle,
    OrchestratorSettings, UiEvent, UtteranceSink,
};
pub use push_to_talk::{PushToTalk, RecordingEnd};
pub use rest::{SpeechClient, SpeechReply};
pub use transport::{ChunkTransport, LinkStatus, ReconnectPolicy};
