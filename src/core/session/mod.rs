//! Streaming session
//!
//! One streaming session owns the remote connection for one client between a
//! start request and its end. It moves through
//! `Connecting -> Active -> Closing -> Closed` and, while active, runs two
//! loops over the split connection:
//!
//! - the send loop drains the per-session audio queue into
//!   `input_audio_buffer.append` events until it sees [`SessionInput::Eof`];
//! - the receive loop turns remote events into [`Emission`]s.
//!
//! Both loops share a cancellation token. Whichever returns first cancels the
//! other, and the session waits for both before closing the connection.

mod accumulator;

use std::fmt;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

pub use accumulator::ResponseAccumulator;

use crate::core::emission::{Emission, EmissionSink};
use crate::core::realtime::openai::ConversationItem;
use crate::core::realtime::{
    ClientEvent, ClientEventSink, RealtimeConnection, RealtimeConnector, RealtimeError,
    ServerEvent, ServerFrameStream,
};
use crate::core::registry::{SessionId, SessionRegistry};

/// Status sent to the client once the remote connection is up.
pub const CONNECTED_STATUS: &str = "Connected to Voice Mode";

/// Upper bound on the close handshake with the remote service.
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

// =============================================================================
// Types
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Connecting,
    Active,
    Closing,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Connecting => write!(f, "Connecting"),
            SessionState::Active => write!(f, "Active"),
            SessionState::Closing => write!(f, "Closing"),
            SessionState::Closed => write!(f, "Closed"),
        }
    }
}

/// Why a streaming session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionExit {
    /// The end-of-input sentinel was received
    InputClosed,
    /// The client is no longer live
    TransportGone,
    /// The remote service closed the connection
    RemoteClosed,
    /// The remote connection failed while streaming
    TransportError(String),
    /// The remote service reported an error event
    RemoteError(String),
    /// Writing to the remote connection failed
    SendFailed(String),
    /// The remote connection could not be established
    ConnectFailed(String),
    /// Cancelled from outside, e.g. dispatcher shutdown
    Cancelled,
    /// The session task panicked
    Panicked,
}

impl fmt::Display for SessionExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionExit::InputClosed => write!(f, "input closed"),
            SessionExit::TransportGone => write!(f, "client gone"),
            SessionExit::RemoteClosed => write!(f, "remote closed"),
            SessionExit::TransportError(e) => write!(f, "transport error: {e}"),
            SessionExit::RemoteError(e) => write!(f, "remote error: {e}"),
            SessionExit::SendFailed(e) => write!(f, "send failed: {e}"),
            SessionExit::ConnectFailed(e) => write!(f, "connect failed: {e}"),
            SessionExit::Cancelled => write!(f, "cancelled"),
            SessionExit::Panicked => write!(f, "panicked"),
        }
    }
}

/// Item on a session's inbound audio queue.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionInput {
    Audio(Bytes),
    /// No more audio will follow; the send loop exits when it reaches this.
    Eof,
}

/// Behaviour shared by every session a dispatcher launches.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Text of the user message that makes the agent speak first.
    /// `None` skips the opening turn.
    pub opening_prompt: Option<String>,
    /// Pause between the session update and the opening turn.
    pub opening_delay: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            opening_prompt: Some("start".to_string()),
            opening_delay: Duration::from_millis(500),
        }
    }
}

/// Observed state change of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTransition {
    pub session_id: SessionId,
    pub state: SessionState,
}

/// Everything a session needs from its surroundings.
#[derive(Clone)]
pub struct SessionContext {
    pub registry: Arc<SessionRegistry>,
    pub connector: Arc<dyn RealtimeConnector>,
    pub emissions: Arc<dyn EmissionSink>,
    pub options: SessionOptions,
    pub transitions: Option<mpsc::UnboundedSender<SessionTransition>>,
}

/// Emits to one client, skipping emissions once it is no longer live.
#[derive(Clone)]
pub struct SessionEmitter {
    session_id: SessionId,
    registry: Arc<SessionRegistry>,
    sink: Arc<dyn EmissionSink>,
}

impl SessionEmitter {
    pub fn new(
        session_id: SessionId,
        registry: Arc<SessionRegistry>,
        sink: Arc<dyn EmissionSink>,
    ) -> Self {
        Self {
            session_id,
            registry,
            sink,
        }
    }

    pub fn emit(&self, emission: Emission) {
        if self.registry.is_live(&self.session_id) {
            self.sink.emit(&self.session_id, emission);
        } else {
            trace!(
                session_id = %self.session_id,
                emission = emission.name(),
                "Client not live, dropping emission"
            );
        }
    }
}

// =============================================================================
// Streaming Session
// =============================================================================

pub struct StreamingSession {
    session_id: SessionId,
    epoch: u64,
    context: SessionContext,
    emitter: SessionEmitter,
    audio_rx: mpsc::UnboundedReceiver<SessionInput>,
    cancel: CancellationToken,
    /// Child of `cancel`; a stop request before streaming starts.
    stop: CancellationToken,
    state: SessionState,
}

impl StreamingSession {
    /// Create a session for a client that was live at `epoch`.
    pub fn new(
        session_id: SessionId,
        epoch: u64,
        context: SessionContext,
        audio_rx: mpsc::UnboundedReceiver<SessionInput>,
        cancel: CancellationToken,
    ) -> Self {
        let emitter = SessionEmitter::new(
            session_id.clone(),
            context.registry.clone(),
            context.emissions.clone(),
        );
        Self {
            session_id,
            epoch,
            context,
            emitter,
            audio_rx,
            stop: cancel.child_token(),
            cancel,
            state: SessionState::Connecting,
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Token that abandons the session while it is still connecting or
    /// opening the conversation. Once streaming, a stop drains the audio
    /// queue up to [`SessionInput::Eof`] instead.
    pub fn stop_handle(&self) -> CancellationToken {
        self.stop.clone()
    }

    fn interrupted(&self) -> SessionExit {
        if self.cancel.is_cancelled() {
            SessionExit::Cancelled
        } else {
            SessionExit::InputClosed
        }
    }

    /// Why the session should not start streaming, if it should not.
    fn abandoned(&self) -> Option<SessionExit> {
        if self.stop.is_cancelled() {
            Some(self.interrupted())
        } else if !self.context.registry.is_live(&self.session_id) {
            Some(SessionExit::TransportGone)
        } else {
            None
        }
    }

    /// Drive the session to completion.
    pub async fn run(mut self) -> SessionExit {
        self.transition(SessionState::Connecting);

        let connected = tokio::select! {
            biased;
            _ = self.stop.cancelled() => None,
            result = self.context.connector.connect(&self.session_id) => Some(result),
        };

        let mut connection = match connected {
            None => {
                let exit = self.interrupted();
                debug!(session_id = %self.session_id, reason = %exit, "Abandoned while connecting");
                self.teardown(None).await;
                return exit;
            }
            Some(Err(e)) => {
                warn!(session_id = %self.session_id, error = %e, "Remote connection failed");
                self.emitter.emit(Emission::ConnectionFailed {
                    message: format!("Remote connection failed: {e}"),
                });
                self.teardown(None).await;
                return SessionExit::ConnectFailed(e.to_string());
            }
            Some(Ok(connection)) => connection,
        };

        let exit = match self.abandoned() {
            Some(exit) => exit,
            None => {
                self.transition(SessionState::Active);
                self.emitter.emit(Emission::status(CONNECTED_STATUS));

                match self.open_conversation(&mut connection.sink).await {
                    Ok(()) => self.stream(&mut connection).await,
                    Err(exit) => exit,
                }
            }
        };

        self.transition(SessionState::Closing);
        info!(session_id = %self.session_id, reason = %exit, "Streaming session closing");
        self.teardown(Some(connection)).await;
        exit
    }

    /// Configure the remote session and trigger the agent's opening turn.
    async fn open_conversation(&mut self, sink: &mut ClientEventSink) -> Result<(), SessionExit> {
        let session = self.context.connector.session_config();
        self.send_event(sink, ClientEvent::SessionUpdate { session })
            .await?;

        let Some(prompt) = self.context.options.opening_prompt.clone() else {
            return Ok(());
        };

        let delay = self.context.options.opening_delay;
        if !delay.is_zero() {
            tokio::select! {
                biased;
                _ = self.stop.cancelled() => return Err(self.interrupted()),
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.send_event(
            sink,
            ClientEvent::ConversationItemCreate {
                item: ConversationItem::user_text(prompt),
            },
        )
        .await?;
        self.send_event(sink, ClientEvent::ResponseCreate).await
    }

    async fn send_event(
        &mut self,
        sink: &mut ClientEventSink,
        event: ClientEvent,
    ) -> Result<(), SessionExit> {
        let event_type = event.event_type();
        let sent = tokio::select! {
            biased;
            _ = self.stop.cancelled() => return Err(self.interrupted()),
            result = sink.send(event) => result,
        };
        sent.map_err(|e| {
            warn!(session_id = %self.session_id, event_type, error = %e, "Failed to send event");
            SessionExit::SendFailed(e.to_string())
        })
    }

    /// Run the send and receive loops until either one ends.
    async fn stream(&mut self, connection: &mut RealtimeConnection) -> SessionExit {
        let remote_open = AtomicBool::new(true);
        let pair = self.cancel.child_token();
        let sample_rate = self.context.connector.output_sample_rate();

        let (sent, received) = tokio::join!(
            send_loop(
                &self.session_id,
                &self.context.registry,
                &mut connection.sink,
                &mut self.audio_rx,
                &remote_open,
                pair.clone(),
            ),
            receive_loop(
                &self.session_id,
                &self.context.registry,
                &self.emitter,
                sample_rate,
                &mut connection.frames,
                &remote_open,
                pair.clone(),
            ),
        );

        // The loop that was cancelled by its partner reports `Cancelled`.
        match (sent, received) {
            (SessionExit::Cancelled, other) => other,
            (other, _) => other,
        }
    }

    async fn teardown(&mut self, connection: Option<RealtimeConnection>) {
        if let Some(mut connection) = connection {
            match tokio::time::timeout(CLOSE_TIMEOUT, connection.sink.close()).await {
                Ok(Ok(())) => debug!(session_id = %self.session_id, "Remote connection closed"),
                Ok(Err(e)) => {
                    debug!(session_id = %self.session_id, error = %e, "Remote connection already gone")
                }
                Err(_) => warn!(session_id = %self.session_id, "Timed out closing remote connection"),
            }
        }

        if self.context.registry.expire(&self.session_id, self.epoch) {
            debug!(session_id = %self.session_id, "Cleared client liveness");
        }
        self.audio_rx.close();
        self.transition(SessionState::Closed);
    }

    fn transition(&mut self, next: SessionState) {
        debug!(session_id = %self.session_id, from = %self.state, to = %next, "Session state change");
        self.state = next;
        if let Some(transitions) = &self.context.transitions {
            let _ = transitions.send(SessionTransition {
                session_id: self.session_id.clone(),
                state: next,
            });
        }
    }
}

// =============================================================================
// Loops
// =============================================================================

async fn send_loop(
    session_id: &SessionId,
    registry: &SessionRegistry,
    sink: &mut ClientEventSink,
    audio_rx: &mut mpsc::UnboundedReceiver<SessionInput>,
    remote_open: &AtomicBool,
    cancel: CancellationToken,
) -> SessionExit {
    let _guard = cancel.clone().drop_guard();

    loop {
        let input = tokio::select! {
            biased;
            _ = cancel.cancelled() => return SessionExit::Cancelled,
            input = audio_rx.recv() => input,
        };

        let payload = match input {
            Some(SessionInput::Audio(payload)) => payload,
            Some(SessionInput::Eof) | None => {
                debug!(session_id = %session_id, "Audio input closed");
                return SessionExit::InputClosed;
            }
        };

        if !registry.is_live(session_id) {
            debug!(session_id = %session_id, "Client gone, stopping audio forwarding");
            return SessionExit::TransportGone;
        }
        if !remote_open.load(Ordering::Acquire) {
            return SessionExit::RemoteClosed;
        }

        let sent = tokio::select! {
            biased;
            _ = cancel.cancelled() => return SessionExit::Cancelled,
            result = sink.send(ClientEvent::audio_append(&payload)) => result,
        };
        if let Err(e) = sent {
            warn!(session_id = %session_id, error = %e, "Failed to forward audio");
            return SessionExit::SendFailed(e.to_string());
        }
        trace!(session_id = %session_id, bytes = payload.len(), "Forwarded audio chunk");
    }
}

async fn receive_loop(
    session_id: &SessionId,
    registry: &SessionRegistry,
    emitter: &SessionEmitter,
    sample_rate: u32,
    frames: &mut ServerFrameStream,
    remote_open: &AtomicBool,
    cancel: CancellationToken,
) -> SessionExit {
    let _guard = cancel.clone().drop_guard();
    let mut accumulator = ResponseAccumulator::new();

    loop {
        let frame = tokio::select! {
            biased;
            _ = cancel.cancelled() => return SessionExit::Cancelled,
            frame = frames.next() => frame,
        };

        let text = match frame {
            Some(Ok(text)) => text,
            Some(Err(e)) => {
                remote_open.store(false, Ordering::Release);
                warn!(session_id = %session_id, error = %e, "Remote connection error");
                return SessionExit::TransportError(e.to_string());
            }
            None => {
                remote_open.store(false, Ordering::Release);
                info!(session_id = %session_id, "Remote service closed the connection");
                return SessionExit::RemoteClosed;
            }
        };

        if !registry.is_live(session_id) {
            return SessionExit::TransportGone;
        }

        let event = match serde_json::from_str::<ServerEvent>(&text) {
            Ok(event) => event,
            Err(e) => {
                let error = RealtimeError::SerializationError(e.to_string());
                warn!(session_id = %session_id, %error, "Skipping malformed remote frame");
                continue;
            }
        };

        if let ControlFlow::Break(exit) =
            apply_server_event(event, emitter, &mut accumulator, sample_rate)
        {
            return exit;
        }
    }
}

/// Map one remote event onto client emissions.
pub(crate) fn apply_server_event(
    event: ServerEvent,
    emitter: &SessionEmitter,
    accumulator: &mut ResponseAccumulator,
    sample_rate: u32,
) -> ControlFlow<SessionExit> {
    match event {
        ServerEvent::SessionCreated { session } => {
            info!(
                session_id = %emitter.session_id,
                remote_session = ?session.and_then(|s| s.id),
                "Remote session created"
            );
        }
        ServerEvent::SessionUpdated { .. } => {
            debug!(session_id = %emitter.session_id, "Remote session updated");
        }
        ServerEvent::SpeechStarted { audio_start_ms, .. } => {
            debug!(session_id = %emitter.session_id, audio_start_ms, "User started speaking");
            // interrupt goes out before anything of the next turn
            emitter.emit(Emission::InterruptPlayback);
            accumulator.reset();
        }
        ServerEvent::SpeechStopped { audio_end_ms, .. } => {
            debug!(session_id = %emitter.session_id, audio_end_ms, "User stopped speaking");
        }
        ServerEvent::TextDelta { delta, .. } | ServerEvent::AudioTranscriptDelta { delta, .. }
            if !delta.is_empty() =>
        {
            accumulator.push(&delta);
            emitter.emit(Emission::response_text(delta, false));
        }
        ServerEvent::AudioDelta { delta, .. } => {
            emitter.emit(Emission::AudioResponse {
                audio: delta,
                sample_rate,
            });
        }
        ServerEvent::ResponseDone { response } => {
            let text = accumulator.flush();
            info!(
                session_id = %emitter.session_id,
                response_id = ?response.and_then(|r| r.id),
                chars = text.len(),
                "Assistant turn complete"
            );
            debug!(session_id = %emitter.session_id, text = %text, "Assistant turn text");
            emitter.emit(Emission::response_text("", true));
        }
        ServerEvent::TranscriptionCompleted { transcript, .. } => {
            if !transcript.trim().is_empty() {
                emitter.emit(Emission::TranscriptUpdate {
                    text: transcript,
                    is_final: true,
                });
            }
        }
        ServerEvent::Error { error } => {
            warn!(
                session_id = %emitter.session_id,
                code = ?error.code,
                message = %error.message,
                "Remote service reported an error"
            );
            emitter.emit(Emission::error(format!(
                "Remote service error: {}",
                error.message
            )));
            return ControlFlow::Break(SessionExit::RemoteError(error.message));
        }
        ServerEvent::TextDelta { .. } | ServerEvent::AudioTranscriptDelta { .. } => {
            trace!(session_id = %emitter.session_id, "Skipping empty text delta");
        }
        ServerEvent::Unknown => {
            trace!(session_id = %emitter.session_id, "Ignoring remote event");
        }
    }
    ControlFlow::Continue(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::realtime::openai::ApiError;

    fn emitter() -> (
        SessionEmitter,
        Arc<SessionRegistry>,
        mpsc::UnboundedReceiver<(SessionId, Emission)>,
    ) {
        let registry = Arc::new(SessionRegistry::new());
        let id = SessionId::from("client-1");
        registry.register(id.clone());
        let (tx, rx) = mpsc::unbounded_channel();
        let emitter = SessionEmitter::new(id, registry.clone(), Arc::new(tx));
        (emitter, registry, rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<(SessionId, Emission)>) -> Vec<Emission> {
        let mut out = Vec::new();
        while let Ok((_, emission)) = rx.try_recv() {
            out.push(emission);
        }
        out
    }

    fn text_delta(delta: &str) -> ServerEvent {
        ServerEvent::TextDelta {
            response_id: None,
            delta: delta.to_string(),
        }
    }

    #[test]
    fn test_deltas_then_done() {
        let (emitter, _registry, mut rx) = emitter();
        let mut acc = ResponseAccumulator::new();

        let flow = apply_server_event(text_delta("Hi"), &emitter, &mut acc, 24000);
        assert!(flow.is_continue());
        assert_eq!(acc.as_str(), "Hi");

        let flow = apply_server_event(
            ServerEvent::ResponseDone { response: None },
            &emitter,
            &mut acc,
            24000,
        );
        assert!(flow.is_continue());
        assert!(acc.is_empty());

        assert_eq!(
            drain(&mut rx),
            vec![
                Emission::response_text("Hi", false),
                Emission::response_text("", true)
            ]
        );
    }

    #[test]
    fn test_empty_deltas_are_skipped() {
        let (emitter, _registry, mut rx) = emitter();
        let mut acc = ResponseAccumulator::new();

        let flow = apply_server_event(text_delta(""), &emitter, &mut acc, 24000);
        assert!(flow.is_continue());
        let flow = apply_server_event(
            ServerEvent::AudioTranscriptDelta {
                response_id: None,
                delta: String::new(),
            },
            &emitter,
            &mut acc,
            24000,
        );
        assert!(flow.is_continue());

        assert!(acc.is_empty());
        assert!(drain(&mut rx).is_empty());

        // a real delta after the empty ones is still relayed
        apply_server_event(text_delta("Hi"), &emitter, &mut acc, 24000);
        assert_eq!(drain(&mut rx), vec![Emission::response_text("Hi", false)]);
    }

    #[test]
    fn test_speech_started_interrupts_and_discards_partial_text() {
        let (emitter, _registry, mut rx) = emitter();
        let mut acc = ResponseAccumulator::new();

        let _ = apply_server_event(text_delta("Old answ"), &emitter, &mut acc, 24000);
        let _ = apply_server_event(
            ServerEvent::SpeechStarted {
                audio_start_ms: 1200,
                item_id: None,
            },
            &emitter,
            &mut acc,
            24000,
        );
        assert!(acc.is_empty());

        let _ = apply_server_event(
            ServerEvent::AudioTranscriptDelta {
                response_id: None,
                delta: "New".to_string(),
            },
            &emitter,
            &mut acc,
            24000,
        );
        assert_eq!(acc.as_str(), "New");

        assert_eq!(
            drain(&mut rx),
            vec![
                Emission::response_text("Old answ", false),
                Emission::InterruptPlayback,
                Emission::response_text("New", false),
            ]
        );
    }

    #[test]
    fn test_audio_delta_carries_sample_rate() {
        let (emitter, _registry, mut rx) = emitter();
        let mut acc = ResponseAccumulator::new();

        let _ = apply_server_event(
            ServerEvent::AudioDelta {
                response_id: None,
                delta: "UklGRg==".to_string(),
            },
            &emitter,
            &mut acc,
            8000,
        );
        assert_eq!(
            drain(&mut rx),
            vec![Emission::AudioResponse {
                audio: "UklGRg==".to_string(),
                sample_rate: 8000
            }]
        );
    }

    #[test]
    fn test_error_event_ends_session() {
        let (emitter, _registry, mut rx) = emitter();
        let mut acc = ResponseAccumulator::new();

        let flow = apply_server_event(
            ServerEvent::Error {
                error: ApiError {
                    error_type: Some("server_error".to_string()),
                    code: None,
                    message: "boom".to_string(),
                },
            },
            &emitter,
            &mut acc,
            24000,
        );
        assert_eq!(
            flow,
            ControlFlow::Break(SessionExit::RemoteError("boom".to_string()))
        );
        assert_eq!(
            drain(&mut rx),
            vec![Emission::error("Remote service error: boom")]
        );
    }

    #[test]
    fn test_transcription_and_unknown_events() {
        let (emitter, _registry, mut rx) = emitter();
        let mut acc = ResponseAccumulator::new();

        let _ = apply_server_event(
            ServerEvent::TranscriptionCompleted {
                item_id: None,
                transcript: "hello there".to_string(),
            },
            &emitter,
            &mut acc,
            24000,
        );
        let _ = apply_server_event(ServerEvent::Unknown, &emitter, &mut acc, 24000);
        let _ = apply_server_event(
            ServerEvent::TranscriptionCompleted {
                item_id: None,
                transcript: "  ".to_string(),
            },
            &emitter,
            &mut acc,
            24000,
        );

        assert_eq!(
            drain(&mut rx),
            vec![Emission::TranscriptUpdate {
                text: "hello there".to_string(),
                is_final: true
            }]
        );
    }

    #[test]
    fn test_emitter_skips_clients_that_are_gone() {
        let (emitter, registry, mut rx) = emitter();
        registry.mark_disconnected(&SessionId::from("client-1"));

        emitter.emit(Emission::status("late"));
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_exit_display() {
        assert_eq!(SessionExit::InputClosed.to_string(), "input closed");
        assert_eq!(
            SessionExit::RemoteError("quota".to_string()).to_string(),
            "remote error: quota"
        );
        assert_eq!(SessionState::Closing.to_string(), "Closing");
    }
}
