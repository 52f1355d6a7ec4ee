//! Wire protocol between the listening client and the server
//!
//! Binary frames carry encoded audio chunks. Text frames carry the JSON
//! messages below, tagged by `type`.

use serde::{Deserialize, Serialize};

/// Control message from client to server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// The current utterance is complete
    End,
}

/// Message from server to client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// What the server heard
    Transcription { text: String },
    /// One streamed piece of the reply
    Response { text: String },
    /// The turn failed
    Error { message: String },
    /// The turn is over, successfully or not
    Done,
}

impl ServerMessage {
    /// Build an error frame
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Whether this frame closes the turn
    #[must_use]
    pub const fn ends_turn(&self) -> bool {
        matches!(self, Self::Done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn end_control_frame_shape() {
        assert_eq!(
            serde_json::to_string(&ClientMessage::End).unwrap(),
            r#"{"type":"end"}"#
        );
        let parsed: ClientMessage = serde_json::from_str(r#"{"type":"end"}"#).unwrap();
        assert_eq!(parsed, ClientMessage::End);
    }

    #[test]
    fn server_frames_are_tagged() {
        let frame = ServerMessage::Response {
            text: "Hel".to_string(),
        };
        assert_eq!(
            serde_json::to_string(&frame).unwrap(),
            r#"{"type":"response","text":"Hel"}"#
        );

        let parsed: ServerMessage =
            serde_json::from_str(r#"{"type":"error","message":"boom"}"#).unwrap();
        assert_eq!(parsed, ServerMessage::error("boom"));
        assert!(!parsed.ends_turn());
    }

    #[test]
    fn unknown_type_is_rejected() {
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"start"}"#).is_err());
    }
}
