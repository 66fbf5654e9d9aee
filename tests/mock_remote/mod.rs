//! In-memory stand-in for the realtime speech service.
//!
//! [`MockConnector`] hands every new connection to the test as a
//! [`MockRemote`]: the test reads what the session sent and pushes server
//! frames back. [`Harness`] wires a dispatcher, registry and bridge around it.

// Allow dead code in test infrastructure - each test binary uses a subset
#![allow(dead_code)]

use std::collections::BTreeSet;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::mpsc as fmpsc;
use futures::{Sink, SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{Notify, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use realtime_relay::core::realtime::{
    ClientEvent, RealtimeConnection, RealtimeConnector, RealtimeError, RealtimeResult,
    SessionConfig,
};
use realtime_relay::{
    CommandQueue, Emission, RelayBridge, SessionDispatcher, SessionId, SessionOptions,
    SessionRegistry, SessionState, SessionTransition,
};

pub const WAIT: Duration = Duration::from_secs(2);
pub const MOCK_SAMPLE_RATE: u32 = 24000;

/// One live connection as seen from the remote side.
pub struct MockRemote {
    pub session_id: SessionId,
    sent: fmpsc::UnboundedReceiver<ClientEvent>,
    frames: Option<fmpsc::UnboundedSender<RealtimeResult<String>>>,
}

impl MockRemote {
    /// Next event the session sent, or `None` once it closed its sink.
    pub async fn next_sent(&mut self) -> Option<ClientEvent> {
        timeout(WAIT, self.sent.next())
            .await
            .expect("timed out waiting for a client event")
    }

    /// Consume `session.update` and, with an opening prompt, the trigger pair.
    pub async fn skip_opening(&mut self, with_prompt: bool) {
        assert!(matches!(
            self.next_sent().await,
            Some(ClientEvent::SessionUpdate { .. })
        ));
        if with_prompt {
            assert!(matches!(
                self.next_sent().await,
                Some(ClientEvent::ConversationItemCreate { .. })
            ));
            assert_eq!(self.next_sent().await, Some(ClientEvent::ResponseCreate));
        }
    }

    /// Wait until the session closes its side of the connection.
    pub async fn expect_closed(&mut self) {
        while let Some(event) = self.next_sent().await {
            assert!(
                !matches!(event, ClientEvent::InputAudioBufferAppend { .. }),
                "unexpected audio after close: {event:?}"
            );
        }
    }

    pub fn push(&self, event: Value) {
        if let Some(frames) = &self.frames {
            let _ = frames.unbounded_send(Ok(event.to_string()));
        }
    }

    pub fn push_raw(&self, frame: &str) {
        if let Some(frames) = &self.frames {
            let _ = frames.unbounded_send(Ok(frame.to_string()));
        }
    }

    /// Fail the transport, as a dropped socket would.
    pub fn fail(&self, message: &str) {
        if let Some(frames) = &self.frames {
            let _ = frames.unbounded_send(Err(RealtimeError::WebSocketError(message.to_string())));
        }
    }

    /// Close the server side.
    pub fn hang_up(&mut self) {
        self.frames = None;
    }
}

/// How [`MockConnector::connect`] behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectMode {
    #[default]
    Normal,
    /// Fail like an HTTP 503 handshake
    Failing,
    /// Never complete the handshake
    Hanging,
    /// Complete the handshake once [`MockConnector::release`] is called
    Held,
    /// Panic inside the connect future
    Panicking,
    /// Connect normally, but the sink never finishes closing
    StallingClose,
}

/// Connector whose connections are driven by the test.
pub struct MockConnector {
    remotes: mpsc::UnboundedSender<MockRemote>,
    mode: Mutex<ConnectMode>,
    release: Notify,
    connects: AtomicUsize,
}

impl MockConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<MockRemote>) {
        let (remotes, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            remotes,
            mode: Mutex::new(ConnectMode::Normal),
            release: Notify::new(),
            connects: AtomicUsize::new(0),
        });
        (connector, rx)
    }

    /// Make the next connection attempts fail like an HTTP 503 handshake.
    pub fn set_failing(&self, failing: bool) {
        self.set_mode(if failing {
            ConnectMode::Failing
        } else {
            ConnectMode::Normal
        });
    }

    pub fn set_mode(&self, mode: ConnectMode) {
        *self.mode.lock().unwrap() = mode;
    }

    /// Let one held handshake complete.
    pub fn release(&self) {
        self.release.notify_one();
    }

    fn mode(&self) -> ConnectMode {
        *self.mode.lock().unwrap()
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RealtimeConnector for MockConnector {
    async fn connect(&self, session_id: &SessionId) -> RealtimeResult<RealtimeConnection> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let mode = self.mode();
        match mode {
            ConnectMode::Failing => {
                return Err(RealtimeError::ConnectionFailed("HTTP 503".to_string()));
            }
            ConnectMode::Hanging => return std::future::pending().await,
            ConnectMode::Panicking => panic!("mock connector blew up for {session_id}"),
            ConnectMode::Held => self.release.notified().await,
            ConnectMode::Normal | ConnectMode::StallingClose => {}
        }

        let (sent_tx, sent_rx) = fmpsc::unbounded();
        let (frames_tx, frames_rx) = fmpsc::unbounded();
        let _ = self.remotes.send(MockRemote {
            session_id: session_id.clone(),
            sent: sent_rx,
            frames: Some(frames_tx),
        });

        if mode == ConnectMode::StallingClose {
            return Ok(RealtimeConnection::new(StallingSink { inner: sent_tx }, frames_rx));
        }
        let sink = sent_tx.sink_map_err(|e| RealtimeError::WebSocketError(e.to_string()));
        Ok(RealtimeConnection::new(sink, frames_rx))
    }

    fn session_config(&self) -> SessionConfig {
        SessionConfig {
            voice: Some("alloy".to_string()),
            ..Default::default()
        }
    }

    fn output_sample_rate(&self) -> u32 {
        MOCK_SAMPLE_RATE
    }
}

/// Forwards events like a normal connection but never completes a close.
struct StallingSink {
    inner: fmpsc::UnboundedSender<ClientEvent>,
}

impl Sink<ClientEvent> for StallingSink {
    type Error = RealtimeError;

    fn poll_ready(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner
            .poll_ready_unpin(cx)
            .map_err(|e| RealtimeError::WebSocketError(e.to_string()))
    }

    fn start_send(mut self: Pin<&mut Self>, item: ClientEvent) -> Result<(), Self::Error> {
        self.inner
            .start_send_unpin(item)
            .map_err(|e| RealtimeError::WebSocketError(e.to_string()))
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner
            .poll_flush_unpin(cx)
            .map_err(|e| RealtimeError::WebSocketError(e.to_string()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Pending
    }
}

/// Options with no opening turn, so tests see only what they drive.
pub fn quiet_options() -> SessionOptions {
    SessionOptions {
        opening_prompt: None,
        opening_delay: Duration::ZERO,
    }
}

/// A running dispatcher with a bridge in front and a mock remote behind.
pub struct Harness {
    pub bridge: RelayBridge,
    pub registry: Arc<SessionRegistry>,
    pub connector: Arc<MockConnector>,
    pub emissions: mpsc::UnboundedReceiver<(SessionId, Emission)>,
    pub remotes: mpsc::UnboundedReceiver<MockRemote>,
    pub transitions: mpsc::UnboundedReceiver<SessionTransition>,
    pub active: watch::Receiver<BTreeSet<SessionId>>,
    pub dispatcher: JoinHandle<()>,
}

impl Harness {
    pub fn start() -> Self {
        Self::with_options(quiet_options())
    }

    pub fn with_options(options: SessionOptions) -> Self {
        let registry = Arc::new(SessionRegistry::new());
        let (commands, command_rx) = CommandQueue::unbounded();
        let (connector, remotes) = MockConnector::new();
        let (emission_tx, emissions) = mpsc::unbounded_channel::<(SessionId, Emission)>();
        let (transition_tx, transitions) = mpsc::unbounded_channel();

        let dispatcher = SessionDispatcher::new(
            command_rx,
            registry.clone(),
            connector.clone(),
            Arc::new(emission_tx),
        )
        .with_options(options)
        .with_shutdown_timeout(Duration::from_secs(1))
        .with_transitions(transition_tx);
        let active = dispatcher.active_sessions();
        let dispatcher = tokio::spawn(dispatcher.run());

        Self {
            bridge: RelayBridge::new(registry.clone(), commands),
            registry,
            connector,
            emissions,
            remotes,
            transitions,
            active,
            dispatcher,
        }
    }

    /// Connect a client and ask it to stream.
    pub fn open_client(&self, name: &str) -> SessionId {
        let id = SessionId::from(name);
        self.bridge.on_connect(&id);
        self.bridge
            .on_start_requested(&id)
            .expect("start request accepted");
        id
    }

    pub async fn next_remote(&mut self) -> MockRemote {
        timeout(WAIT, self.remotes.recv())
            .await
            .expect("timed out waiting for a connection")
            .expect("connector dropped")
    }

    pub async fn next_emission(&mut self) -> (SessionId, Emission) {
        timeout(WAIT, self.emissions.recv())
            .await
            .expect("timed out waiting for an emission")
            .expect("emission channel closed")
    }

    /// Next emission for `id`, skipping other clients.
    pub async fn next_emission_for(&mut self, id: &SessionId) -> Emission {
        loop {
            let (session_id, emission) = self.next_emission().await;
            if &session_id == id {
                return emission;
            }
        }
    }

    pub async fn wait_until_inactive(&mut self, id: &SessionId) {
        timeout(WAIT, self.active.wait_for(|ids| !ids.contains(id)))
            .await
            .expect("timed out waiting for the session to finish")
            .expect("dispatcher dropped");
    }

    /// Wait until the connector has seen `count` connection attempts.
    pub async fn wait_for_connects(&self, count: usize) {
        timeout(WAIT, async {
            while self.connector.connects() < count {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("timed out waiting for a connection attempt");
    }

    /// Wait for `id` to reach `state`, skipping other transitions.
    pub async fn wait_for_state(&mut self, id: &SessionId, state: SessionState) {
        timeout(WAIT, async {
            while let Some(transition) = self.transitions.recv().await {
                if &transition.session_id == id && transition.state == state {
                    return;
                }
            }
            panic!("transition channel closed");
        })
        .await
        .expect("timed out waiting for a session state");
    }

    pub async fn wait_until_active(&mut self, id: &SessionId) {
        timeout(WAIT, self.active.wait_for(|ids| ids.contains(id)))
            .await
            .expect("timed out waiting for the session to start")
            .expect("dispatcher dropped");
    }

    /// Nothing further was emitted within a short grace period.
    pub async fn assert_no_emission(&mut self) {
        let next = timeout(Duration::from_millis(100), self.emissions.recv()).await;
        assert!(next.is_err(), "unexpected emission: {next:?}");
    }

    pub async fn shutdown(self) {
        self.bridge.shutdown().expect("queue open");
        timeout(WAIT, self.dispatcher)
            .await
            .expect("dispatcher did not stop")
            .expect("dispatcher panicked");
    }
}
