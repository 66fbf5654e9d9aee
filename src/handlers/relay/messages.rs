//! Client socket message types

use serde::{Deserialize, Serialize};

/// Maximum allowed size for a base64 audio chunk (4 MB)
pub const MAX_AUDIO_CHUNK_SIZE: usize = 4 * 1024 * 1024;

/// Incoming WebSocket messages from the client
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayIncomingMessage {
    /// Open a streaming session
    StartStream,

    /// End the current streaming session
    StopStream,

    /// Base64 encoded audio
    AudioChunk {
        #[serde(default)]
        audio: String,
    },
}

/// Error type for message validation failures
#[derive(Debug, Clone, PartialEq)]
pub enum RelayValidationError {
    AudioChunkTooLarge { size: usize, max: usize },
}

impl std::fmt::Display for RelayValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AudioChunkTooLarge { size, max } => {
                write!(f, "Audio chunk too large: {} bytes (max: {} bytes)", size, max)
            }
        }
    }
}

impl std::error::Error for RelayValidationError {}

impl RelayIncomingMessage {
    /// Rejects payloads that would be expensive to decode and forward.
    pub fn validate_size(&self) -> Result<(), RelayValidationError> {
        match self {
            RelayIncomingMessage::AudioChunk { audio } if audio.len() > MAX_AUDIO_CHUNK_SIZE => {
                Err(RelayValidationError::AudioChunkTooLarge {
                    size: audio.len(),
                    max: MAX_AUDIO_CHUNK_SIZE,
                })
            }
            _ => Ok(()),
        }
    }
}
