//! Client socket transport for the relay
//!
//! Each WebSocket connection is one relay client. The handler translates
//! socket traffic into [`RelayBridge`](crate::core::RelayBridge) calls and
//! drains the client's [`Emission`](crate::core::Emission)s back out as JSON.
//!
//! # Protocol
//!
//! ## Client → Server
//!
//! - **start_stream**: Open a streaming session with the speech service
//! - **stop_stream**: End the current streaming session
//! - **audio_chunk**: Base64 PCM audio, `{"type":"audio_chunk","audio":"..."}`
//! - **Binary frames**: Raw PCM audio
//!
//! ## Server → Client
//!
//! - **status_update**, **error_message**, **connection_failed**
//! - **interrupt_playback**: The user started speaking, stop local playback
//! - **response_text_update**, **transcript_update**
//! - **audio_response**: Base64 audio with its sample rate

mod handler;
mod hub;
pub mod messages;

pub use handler::{GREETING_STATUS, relay_handler};
pub use hub::ClientHub;
