//! Relay WebSocket route configuration

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::relay::relay_handler;
use crate::state::AppState;
use std::sync::Arc;

/// Create the relay WebSocket router
///
/// # Endpoint
///
/// `GET /ws` - WebSocket upgrade for a relay client
///
/// # Example
///
/// ```json
/// // Server greets on connect
/// {"type": "status_update", "message": "Connected to Server"}
///
/// // Client opens a stream and sends audio
/// {"type": "start_stream"}
/// {"type": "audio_chunk", "audio": "<base64 pcm16>"}
///
/// // Server relays the assistant
/// {"type": "response_text_update", "text": "Hi", "is_final": false}
/// {"type": "audio_response", "audio": "<base64 pcm16>", "sample_rate": 24000}
/// ```
pub fn create_relay_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/ws", get(relay_handler))
        .layer(TraceLayer::new_for_http())
}
