//! OpenAI Realtime API support: connector, option enums and wire events.

mod client;
mod config;
mod messages;

pub use client::OpenAIRealtimeConnector;
pub use config::{
    OPENAI_REALTIME_CONNECT_TIMEOUT_SECS, OPENAI_REALTIME_DEFAULT_MODEL, OPENAI_REALTIME_SAMPLE_RATE,
    OPENAI_REALTIME_URL, OpenAIRealtimeAudioFormat, OpenAIRealtimeVoice,
};
pub use messages::{
    ApiError, ClientEvent, ContentPart, ConversationItem, InputAudioTranscription, ResponseInfo,
    ServerEvent, SessionConfig, SessionInfo, TurnDetection,
};
