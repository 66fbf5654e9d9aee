//! Inbound contract between a client transport and the relay core.
//!
//! Every method is synchronous and non-blocking so it can be called straight
//! from transport callbacks on any thread. Methods only touch the registry
//! and submit commands; all session work happens on the dispatcher.

use std::sync::Arc;

use base64::prelude::*;
use bytes::Bytes;
use tracing::{debug, info, trace, warn};

use crate::core::command::CommandSender;
use crate::core::registry::{SessionId, SessionRegistry};
use crate::errors::{RelayError, RelayResult};

#[derive(Debug, Clone)]
pub struct RelayBridge {
    registry: Arc<SessionRegistry>,
    commands: CommandSender,
}

impl RelayBridge {
    pub fn new(registry: Arc<SessionRegistry>, commands: CommandSender) -> Self {
        Self { registry, commands }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// A client connected.
    pub fn on_connect(&self, session_id: &SessionId) {
        self.registry.register(session_id.clone());
        info!(session_id = %session_id, "Client connected");
    }

    /// A client went away: clear liveness, stop its stream, forget it.
    pub fn on_disconnect(&self, session_id: &SessionId) {
        self.registry.mark_disconnected(session_id);
        if let Err(e) = self.commands.stop(session_id.clone()) {
            warn!(session_id = %session_id, error = %e, "Could not submit stop on disconnect");
        }
        self.registry.unregister(session_id);
        info!(session_id = %session_id, "Client disconnected");
    }

    /// Base64 audio from the client.
    ///
    /// Empty payloads are ignored. Invalid base64 is reported back to the
    /// caller and never reaches the queue.
    pub fn on_client_audio(&self, session_id: &SessionId, payload_b64: &str) -> RelayResult<()> {
        if payload_b64.is_empty() {
            return Ok(());
        }
        let payload = BASE64_STANDARD.decode(payload_b64)?;
        self.on_client_audio_bytes(session_id, Bytes::from(payload))
    }

    /// Raw audio from the client.
    pub fn on_client_audio_bytes(&self, session_id: &SessionId, payload: Bytes) -> RelayResult<()> {
        if payload.is_empty() {
            return Ok(());
        }
        if !self.registry.is_live(session_id) {
            trace!(session_id = %session_id, "Client not live, dropping audio");
            return Ok(());
        }
        self.commands.audio(session_id.clone(), payload)
    }

    /// The client asked to start streaming.
    pub fn on_start_requested(&self, session_id: &SessionId) -> RelayResult<()> {
        let Some(epoch) = self.registry.mark_connected(session_id) else {
            warn!(session_id = %session_id, "Start requested by unknown client");
            return Err(RelayError::UnknownSession(session_id.clone()));
        };
        debug!(session_id = %session_id, epoch, "Start requested");
        self.commands.start(session_id.clone())
    }

    /// The client asked to stop streaming.
    pub fn on_stop_requested(&self, session_id: &SessionId) -> RelayResult<()> {
        if !self.registry.mark_disconnected(session_id) {
            return Err(RelayError::UnknownSession(session_id.clone()));
        }
        debug!(session_id = %session_id, "Stop requested");
        self.commands.stop(session_id.clone())
    }

    /// Ask the dispatcher to stop every session and exit.
    pub fn shutdown(&self) -> RelayResult<()> {
        self.commands.shutdown()
    }
}
