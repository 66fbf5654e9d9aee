//! HTTP and WebSocket request handlers
//!
//! - `api` - Health check endpoint
//! - `relay` - Client audio socket bridged to the realtime speech service

pub mod api;
pub mod relay;

pub use relay::relay_handler;
