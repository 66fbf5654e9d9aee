//! Base types for the remote realtime speech connection.
//!
//! A [`RealtimeConnector`] opens one duplex connection per streaming session.
//! The connection is handed out already split into an event sink and a frame
//! stream so the session can drive sending and receiving concurrently.

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Sink, Stream};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::openai::{ClientEvent, SessionConfig};
use crate::core::registry::SessionId;

// =============================================================================
// Error Types
// =============================================================================

/// Errors raised on the remote side of a session.
#[derive(Debug, Error)]
pub enum RealtimeError {
    /// Connection to the remote service could not be established
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The remote service rejected the credentials
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Transport-level failure on an established connection
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// Error event reported by the remote service
    #[error("Provider error: {0}")]
    ProviderError(String),

    /// A frame could not be encoded or decoded
    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Not connected")]
    NotConnected,
}

impl RealtimeError {
    /// Whether this error means the connection was never established.
    pub fn is_connection_failure(&self) -> bool {
        matches!(
            self,
            RealtimeError::ConnectionFailed(_) | RealtimeError::AuthenticationFailed(_)
        )
    }
}

/// Result type for realtime operations.
pub type RealtimeResult<T> = Result<T, RealtimeError>;

// =============================================================================
// Configuration Types
// =============================================================================

/// Settings for the remote realtime session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// API key for authentication
    pub api_key: String,

    /// Model to use (e.g., "gpt-4o-realtime-preview")
    #[serde(default)]
    pub model: String,

    /// Override of the WebSocket endpoint, mainly for proxies and tests
    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default)]
    pub voice: Option<String>,

    /// System instructions for the assistant
    #[serde(default)]
    pub instructions: Option<String>,

    #[serde(default)]
    pub input_audio_format: Option<String>,

    #[serde(default)]
    pub output_audio_format: Option<String>,

    /// Enables transcription of the user's audio when set
    #[serde(default)]
    pub input_audio_transcription: Option<InputTranscriptionConfig>,

    #[serde(default)]
    pub turn_detection: Option<TurnDetectionConfig>,

    /// Handshake timeout in seconds; the connector's default when unset
    #[serde(default)]
    pub connection_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InputTranscriptionConfig {
    /// Model to use for transcription (e.g., "whisper-1")
    pub model: String,
}

/// Server-side voice activity detection thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnDetectionConfig {
    /// Activation threshold (0.0 to 1.0)
    pub threshold: f32,
    /// Audio kept before detected speech (ms)
    pub prefix_padding_ms: u32,
    /// Silence that ends a turn (ms)
    pub silence_duration_ms: u32,
    /// Start a response automatically at end of turn
    pub create_response: bool,
    /// Cut the current response when the user starts speaking
    pub interrupt_response: bool,
}

impl Default for TurnDetectionConfig {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            prefix_padding_ms: 300,
            silence_duration_ms: 200,
            create_response: true,
            interrupt_response: true,
        }
    }
}

// =============================================================================
// Connection
// =============================================================================

/// Outbound half: accepts client events.
pub type ClientEventSink = Pin<Box<dyn Sink<ClientEvent, Error = RealtimeError> + Send>>;

/// Inbound half: yields raw text frames. The stream ends when the remote closes.
pub type ServerFrameStream = Pin<Box<dyn Stream<Item = RealtimeResult<String>> + Send>>;

/// An established duplex connection to the remote service.
pub struct RealtimeConnection {
    pub sink: ClientEventSink,
    pub frames: ServerFrameStream,
}

impl RealtimeConnection {
    pub fn new<S, F>(sink: S, frames: F) -> Self
    where
        S: Sink<ClientEvent, Error = RealtimeError> + Send + 'static,
        F: Stream<Item = RealtimeResult<String>> + Send + 'static,
    {
        Self {
            sink: Box::pin(sink),
            frames: Box::pin(frames),
        }
    }
}

impl std::fmt::Debug for RealtimeConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeConnection").finish_non_exhaustive()
    }
}

/// Opens connections to a realtime speech service.
#[async_trait]
pub trait RealtimeConnector: Send + Sync {
    /// Establish a new connection for `session_id`.
    async fn connect(&self, session_id: &SessionId) -> RealtimeResult<RealtimeConnection>;

    /// Configuration sent as the first message on every connection.
    fn session_config(&self) -> SessionConfig;

    /// Sample rate of the audio the service sends back.
    fn output_sample_rate(&self) -> u32;
}
