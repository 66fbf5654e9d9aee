//! Crate-level error type for the relay core and its transport bridge.

use thiserror::Error;

use crate::core::realtime::RealtimeError;
use crate::core::registry::SessionId;

#[derive(Debug, Error)]
pub enum RelayError {
    /// The command consumer is gone; nothing will process further commands.
    #[error("Command queue is closed")]
    QueueClosed,

    /// Client audio was not valid base64.
    #[error("Invalid audio payload: {0}")]
    InvalidAudio(#[from] base64::DecodeError),

    #[error("Unknown session: {0}")]
    UnknownSession(SessionId),

    #[error("Session is not live: {0}")]
    SessionNotLive(SessionId),

    #[error("Session already streaming: {0}")]
    SessionAlreadyActive(SessionId),

    #[error(transparent)]
    Realtime(#[from] RealtimeError),
}

pub type RelayResult<T> = Result<T, RelayError>;
