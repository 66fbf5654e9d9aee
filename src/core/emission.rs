//! Events the core pushes towards a client connection.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::core::registry::SessionId;

/// Outbound client event. Serialized with a `type` tag, e.g.
/// `{"type":"response_text_update","text":"Hi","is_final":false}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Emission {
    StatusUpdate {
        message: String,
    },
    ErrorMessage {
        message: String,
    },
    /// The remote service could not be reached; distinct from a generic error.
    ConnectionFailed {
        message: String,
    },
    /// Stop local playback, the user started speaking.
    InterruptPlayback,
    ResponseTextUpdate {
        text: String,
        is_final: bool,
    },
    TranscriptUpdate {
        text: String,
        is_final: bool,
    },
    /// Base64 audio chunk from the remote service.
    AudioResponse {
        audio: String,
        sample_rate: u32,
    },
}

impl Emission {
    pub fn status(message: impl Into<String>) -> Self {
        Emission::StatusUpdate {
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Emission::ErrorMessage {
            message: message.into(),
        }
    }

    pub fn response_text(text: impl Into<String>, is_final: bool) -> Self {
        Emission::ResponseTextUpdate {
            text: text.into(),
            is_final,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Emission::StatusUpdate { .. } => "status_update",
            Emission::ErrorMessage { .. } => "error_message",
            Emission::ConnectionFailed { .. } => "connection_failed",
            Emission::InterruptPlayback => "interrupt_playback",
            Emission::ResponseTextUpdate { .. } => "response_text_update",
            Emission::TranscriptUpdate { .. } => "transcript_update",
            Emission::AudioResponse { .. } => "audio_response",
        }
    }
}

/// Delivery seam towards the transport. Must not block.
pub trait EmissionSink: Send + Sync {
    fn emit(&self, session_id: &SessionId, emission: Emission);
}

impl EmissionSink for mpsc::UnboundedSender<(SessionId, Emission)> {
    fn emit(&self, session_id: &SessionId, emission: Emission) {
        let _ = self.send((session_id.clone(), emission));
    }
}
