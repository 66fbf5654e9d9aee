//! OpenAI Realtime API connector.
//!
//! - Endpoint: `wss://api.openai.com/v1/realtime?model=<model>`
//! - Protocol: WebSocket with JSON events
//! - Audio: PCM 16-bit, 24kHz, mono, little-endian, base64 encoded
//!
//! Each call to [`RealtimeConnector::connect`] performs one handshake and
//! returns the split socket. There is no reconnection: a dropped connection
//! ends the streaming session that owned it.

use async_trait::async_trait;
use std::time::Duration;

use futures::future;
use futures_util::{SinkExt, StreamExt};
use http::{HeaderName, HeaderValue, header::AUTHORIZATION};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::{self, Message, client::IntoClientRequest};
use tracing::{debug, info, warn};

use super::config::{
    OPENAI_REALTIME_CONNECT_TIMEOUT_SECS, OPENAI_REALTIME_DEFAULT_MODEL, OPENAI_REALTIME_URL, OpenAIRealtimeAudioFormat,
    OpenAIRealtimeVoice,
};
use super::messages::{ClientEvent, InputAudioTranscription, SessionConfig, TurnDetection};
use crate::core::realtime::base::{
    RealtimeConfig, RealtimeConnection, RealtimeConnector, RealtimeError, RealtimeResult,
};
use crate::core::registry::SessionId;

const OPENAI_BETA_HEADER: HeaderName = HeaderName::from_static("openai-beta");

/// Connector for OpenAI's Realtime WebSocket API.
#[derive(Debug, Clone)]
pub struct OpenAIRealtimeConnector {
    config: RealtimeConfig,
    voice: OpenAIRealtimeVoice,
    input_format: OpenAIRealtimeAudioFormat,
    output_format: OpenAIRealtimeAudioFormat,
}

impl OpenAIRealtimeConnector {
    pub fn new(config: RealtimeConfig) -> RealtimeResult<Self> {
        if config.api_key.trim().is_empty() {
            return Err(RealtimeError::InvalidConfiguration(
                "API key is required for OpenAI Realtime".to_string(),
            ));
        }

        let voice = config
            .voice
            .as_deref()
            .map(OpenAIRealtimeVoice::from_str_or_default)
            .unwrap_or_default();
        let input_format = config
            .input_audio_format
            .as_deref()
            .map(OpenAIRealtimeAudioFormat::from_str_or_default)
            .unwrap_or_default();
        let output_format = config
            .output_audio_format
            .as_deref()
            .map(OpenAIRealtimeAudioFormat::from_str_or_default)
            .unwrap_or_default();

        Ok(Self {
            config,
            voice,
            input_format,
            output_format,
        })
    }

    fn model(&self) -> &str {
        if self.config.model.is_empty() {
            OPENAI_REALTIME_DEFAULT_MODEL
        } else {
            &self.config.model
        }
    }

    /// Build the WebSocket URL with model parameter.
    fn build_ws_url(&self) -> String {
        let base = self
            .config
            .base_url
            .as_deref()
            .unwrap_or(OPENAI_REALTIME_URL);
        format!("{}?model={}", base, self.model())
    }

    /// Build the upgrade request with bearer auth and the realtime beta header.
    fn build_request(&self) -> RealtimeResult<tungstenite::handshake::client::Request> {
        let mut request = self
            .build_ws_url()
            .into_client_request()
            .map_err(|e| RealtimeError::InvalidConfiguration(e.to_string()))?;

        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.config.api_key))
            .map_err(|e| RealtimeError::InvalidConfiguration(e.to_string()))?;
        let headers = request.headers_mut();
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(OPENAI_BETA_HEADER, HeaderValue::from_static("realtime=v1"));

        Ok(request)
    }
}

fn map_connect_error(error: tungstenite::Error) -> RealtimeError {
    match error {
        tungstenite::Error::Http(response) => {
            let status = response.status();
            if status == http::StatusCode::UNAUTHORIZED || status == http::StatusCode::FORBIDDEN {
                RealtimeError::AuthenticationFailed(format!("HTTP {}", status.as_u16()))
            } else {
                RealtimeError::ConnectionFailed(format!("HTTP {}", status.as_u16()))
            }
        }
        other => RealtimeError::ConnectionFailed(other.to_string()),
    }
}

#[async_trait]
impl RealtimeConnector for OpenAIRealtimeConnector {
    async fn connect(&self, session_id: &SessionId) -> RealtimeResult<RealtimeConnection> {
        let request = self.build_request()?;
        debug!(session_id = %session_id, model = self.model(), "Connecting to OpenAI Realtime API");

        let connect_timeout = Duration::from_secs(
            self.config
                .connection_timeout_seconds
                .unwrap_or(OPENAI_REALTIME_CONNECT_TIMEOUT_SECS),
        );
        let connect_result = timeout(connect_timeout, tokio_tungstenite::connect_async(request)).await;

        let (ws_stream, response) = match connect_result {
            Ok(Ok(connected)) => connected,
            Ok(Err(e)) => return Err(map_connect_error(e)),
            Err(_) => {
                warn!(
                    session_id = %session_id,
                    timeout_secs = connect_timeout.as_secs(),
                    "OpenAI Realtime handshake timed out"
                );
                return Err(RealtimeError::ConnectionFailed(format!(
                    "Connection timed out after {}s",
                    connect_timeout.as_secs()
                )));
            }
        };

        info!(
            session_id = %session_id,
            status = response.status().as_u16(),
            "Connected to OpenAI Realtime API"
        );

        let (ws_sink, ws_stream) = ws_stream.split();

        let sink = ws_sink
            .sink_map_err(|e| RealtimeError::WebSocketError(e.to_string()))
            .with(|event: ClientEvent| {
                future::ready(
                    serde_json::to_string(&event)
                        .map(|json| Message::Text(json.into()))
                        .map_err(|e| RealtimeError::SerializationError(e.to_string())),
                )
            });

        // Pings are answered by tungstenite itself; a close frame ends the stream.
        let frames = ws_stream
            .take_while(|msg| future::ready(!matches!(msg, Ok(Message::Close(_)))))
            .filter_map(|msg| {
                future::ready(match msg {
                    Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
                    Ok(_) => None,
                    Err(e) => Some(Err(RealtimeError::WebSocketError(e.to_string()))),
                })
            });

        Ok(RealtimeConnection::new(sink, frames))
    }

    fn session_config(&self) -> SessionConfig {
        SessionConfig {
            modalities: Some(vec!["text".to_string(), "audio".to_string()]),
            instructions: self.config.instructions.clone(),
            voice: Some(self.voice.as_str().to_string()),
            input_audio_format: Some(self.input_format.as_str().to_string()),
            output_audio_format: Some(self.output_format.as_str().to_string()),
            input_audio_transcription: self.config.input_audio_transcription.as_ref().map(|t| {
                InputAudioTranscription {
                    model: t.model.clone(),
                }
            }),
            turn_detection: self
                .config
                .turn_detection
                .as_ref()
                .map(|vad| TurnDetection::ServerVad {
                    threshold: vad.threshold,
                    prefix_padding_ms: vad.prefix_padding_ms,
                    silence_duration_ms: vad.silence_duration_ms,
                    create_response: vad.create_response,
                    interrupt_response: vad.interrupt_response,
                }),
        }
    }

    fn output_sample_rate(&self) -> u32 {
        self.output_format.sample_rate()
    }
}
