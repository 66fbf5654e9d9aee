//! Relay WebSocket handler
//!
//! One socket is one relay client. The socket id is generated on upgrade
//! and lives until the socket closes; start and stop requests may cycle any
//! number of streaming sessions within it.

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::core::{Emission, EmissionSink, SessionId};
use crate::state::AppState;

use super::messages::RelayIncomingMessage;

/// Status sent to every client right after the upgrade
pub const GREETING_STATUS: &str = "Connected to Server";

/// Maximum WebSocket frame size (10 MB)
const MAX_WS_FRAME_SIZE: usize = 10 * 1024 * 1024;

/// Maximum WebSocket message size (10 MB)
const MAX_WS_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

/// Relay WebSocket handler
///
/// Upgrades the HTTP connection to a WebSocket carrying client audio in and
/// relay emissions out.
pub async fn relay_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    debug!("Relay WebSocket connection upgrade requested");

    ws.max_frame_size(MAX_WS_FRAME_SIZE)
        .max_message_size(MAX_WS_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_relay_socket(socket, state))
}

async fn handle_relay_socket(socket: WebSocket, state: Arc<AppState>) {
    let session_id = SessionId::generate();
    let (mut sender, mut receiver) = socket.split();

    let mut emissions = state.hub.attach(session_id.clone());
    state.bridge.on_connect(&session_id);
    state.hub.emit(&session_id, Emission::status(GREETING_STATUS));

    // Sender task for outgoing emissions
    let sender_id = session_id.clone();
    let sender_task = tokio::spawn(async move {
        while let Some(emission) = emissions.recv().await {
            let json = match serde_json::to_string(&emission) {
                Ok(json) => json,
                Err(e) => {
                    error!(session_id = %sender_id, "Failed to serialize emission: {}", e);
                    continue;
                }
            };
            if let Err(e) = sender.send(Message::Text(json.into())).await {
                debug!(session_id = %sender_id, "Failed to send WebSocket message: {}", e);
                break;
            }
        }
    });

    while let Some(msg_result) = receiver.next().await {
        match msg_result {
            Ok(msg) => {
                if !process_relay_message(msg, &session_id, &state) {
                    break;
                }
            }
            Err(e) => {
                warn!(session_id = %session_id, "Relay WebSocket error: {}", e);
                break;
            }
        }
    }

    state.bridge.on_disconnect(&session_id);
    state.hub.detach(&session_id);
    sender_task.abort();

    info!(session_id = %session_id, "Relay WebSocket connection terminated");
}

/// Process one incoming frame. Returns `false` when the socket should close.
fn process_relay_message(msg: Message, session_id: &SessionId, state: &AppState) -> bool {
    match msg {
        Message::Text(text) => {
            let incoming: RelayIncomingMessage = match serde_json::from_str(&text) {
                Ok(msg) => msg,
                Err(e) => {
                    warn!(session_id = %session_id, "Failed to parse relay message: {}", e);
                    state.hub.emit(
                        session_id,
                        Emission::error(format!("Invalid message format: {e}")),
                    );
                    return true;
                }
            };

            if let Err(e) = incoming.validate_size() {
                warn!(session_id = %session_id, "Message validation failed: {}", e);
                state.hub.emit(session_id, Emission::error(e.to_string()));
                return true;
            }

            handle_relay_incoming(incoming, session_id, state);
            true
        }
        Message::Binary(data) => {
            if let Err(e) = state.bridge.on_client_audio_bytes(session_id, data) {
                warn!(session_id = %session_id, "Failed to queue audio: {}", e);
            }
            true
        }
        Message::Ping(_) | Message::Pong(_) => true,
        Message::Close(_) => {
            debug!(session_id = %session_id, "Relay WebSocket close received");
            false
        }
    }
}

fn handle_relay_incoming(msg: RelayIncomingMessage, session_id: &SessionId, state: &AppState) {
    let result = match msg {
        RelayIncomingMessage::StartStream => state.bridge.on_start_requested(session_id),
        RelayIncomingMessage::StopStream => state.bridge.on_stop_requested(session_id),
        RelayIncomingMessage::AudioChunk { audio } => {
            state.bridge.on_client_audio(session_id, &audio)
        }
    };

    if let Err(e) = result {
        warn!(session_id = %session_id, "Relay request failed: {}", e);
        state.hub.emit(session_id, Emission::error(e.to_string()));
    }
}
