//! Remote realtime speech service.
//!
//! [`RealtimeConnector`] is the seam between a streaming session and the
//! service it talks to. The production implementation speaks the OpenAI
//! Realtime WebSocket protocol; tests plug in in-memory connectors.

mod base;
pub mod openai;

pub use base::{
    ClientEventSink, InputTranscriptionConfig, RealtimeConfig, RealtimeConnection,
    RealtimeConnector, RealtimeError, RealtimeResult, ServerFrameStream, TurnDetectionConfig,
};
pub use openai::{
    ClientEvent, OPENAI_REALTIME_SAMPLE_RATE, OPENAI_REALTIME_URL, OpenAIRealtimeConnector,
    ServerEvent, SessionConfig,
};
