//! Session dispatcher
//!
//! The single consumer of the command queue. It owns the map of active
//! streaming sessions and is the only code that launches, feeds or stops
//! them. Commands are handled one at a time; a failing command is logged and
//! the loop moves on.
//!
//! Sessions report back when they finish so the map only ever holds sessions
//! whose task pair is still running. `Stop` removes an entry eagerly; the
//! session then drains its queued audio and closes on its own, and is kept
//! aside until it reports back so shutdown still waits for it.

use std::collections::{BTreeSet, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::core::command::{Command, CommandReceiver};
use crate::core::emission::EmissionSink;
use crate::core::realtime::RealtimeConnector;
use crate::core::registry::{SessionId, SessionRegistry};
use crate::core::session::{
    SessionContext, SessionExit, SessionInput, SessionOptions, SessionTransition,
    StreamingSession,
};
use crate::errors::{RelayError, RelayResult};

/// Default bound on waiting for sessions during shutdown.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

struct ActiveSession {
    launch: u64,
    audio_tx: mpsc::UnboundedSender<SessionInput>,
    cancel: CancellationToken,
    stop: CancellationToken,
    handle: JoinHandle<()>,
}

impl ActiveSession {
    fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

struct SessionFinished {
    session_id: SessionId,
    launch: u64,
    exit: SessionExit,
}

pub struct SessionDispatcher {
    commands: CommandReceiver,
    context: SessionContext,
    shutdown_timeout: Duration,
    active: HashMap<SessionId, ActiveSession>,
    /// Stopped sessions still closing, by launch.
    stopping: HashMap<u64, (SessionId, JoinHandle<()>)>,
    finished_tx: mpsc::UnboundedSender<SessionFinished>,
    finished_rx: mpsc::UnboundedReceiver<SessionFinished>,
    next_launch: u64,
    root: CancellationToken,
    active_ids: watch::Sender<BTreeSet<SessionId>>,
}

impl SessionDispatcher {
    pub fn new(
        commands: CommandReceiver,
        registry: Arc<SessionRegistry>,
        connector: Arc<dyn RealtimeConnector>,
        emissions: Arc<dyn EmissionSink>,
    ) -> Self {
        let (finished_tx, finished_rx) = mpsc::unbounded_channel();
        let (active_ids, _) = watch::channel(BTreeSet::new());
        Self {
            commands,
            context: SessionContext {
                registry,
                connector,
                emissions,
                options: SessionOptions::default(),
                transitions: None,
            },
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            active: HashMap::new(),
            stopping: HashMap::new(),
            finished_tx,
            finished_rx,
            next_launch: 0,
            root: CancellationToken::new(),
            active_ids,
        }
    }

    pub fn with_options(mut self, options: SessionOptions) -> Self {
        self.context.options = options;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Report every session state change on `transitions`.
    pub fn with_transitions(mut self, transitions: mpsc::UnboundedSender<SessionTransition>) -> Self {
        self.context.transitions = Some(transitions);
        self
    }

    /// Watch the set of session ids with a running session.
    pub fn active_sessions(&self) -> watch::Receiver<BTreeSet<SessionId>> {
        self.active_ids.subscribe()
    }

    /// Consume commands until [`Command::Shutdown`], then stop every session.
    pub async fn run(mut self) {
        info!("Session dispatcher started");

        loop {
            tokio::select! {
                biased;
                Some(finished) = self.finished_rx.recv() => self.reap(finished),
                command = self.commands.take() => {
                    if matches!(command, Command::Shutdown) {
                        info!(active = self.active.len(), "Shutdown requested");
                        break;
                    }
                    let kind = command.kind();
                    if let Err(e) = self.handle(command) {
                        debug!(command = kind, error = %e, "Command not applied");
                    }
                }
            }
        }

        self.shutdown().await;
        info!("Session dispatcher stopped");
    }

    fn handle(&mut self, command: Command) -> RelayResult<()> {
        match command {
            Command::Start { session_id } => self.start(session_id),
            Command::Stop { session_id } => self.stop(&session_id),
            Command::Audio {
                session_id,
                payload,
            } => {
                match self.active.get(&session_id) {
                    Some(active) if active.is_running() => {
                        // a closed receiver means the session is already winding down
                        let _ = active.audio_tx.send(SessionInput::Audio(payload));
                    }
                    _ => trace!(session_id = %session_id, "No running session, dropping audio"),
                }
                Ok(())
            }
            Command::Shutdown => Ok(()),
        }
    }

    fn start(&mut self, session_id: SessionId) -> RelayResult<()> {
        let Some(epoch) = self.context.registry.epoch(&session_id) else {
            warn!(session_id = %session_id, "Start for a client that is not live");
            return Err(RelayError::SessionNotLive(session_id));
        };

        if let Some(active) = self.active.get(&session_id) {
            if active.is_running() {
                warn!(session_id = %session_id, "Start rejected, session already streaming");
                return Err(RelayError::SessionAlreadyActive(session_id));
            }
            self.active.remove(&session_id);
        }

        let (audio_tx, audio_rx) = mpsc::unbounded_channel();
        let cancel = self.root.child_token();
        self.next_launch += 1;
        let launch = self.next_launch;

        let session = StreamingSession::new(
            session_id.clone(),
            epoch,
            self.context.clone(),
            audio_rx,
            cancel.clone(),
        );
        let stop = session.stop_handle();
        let handle = tokio::spawn(supervise(
            session,
            epoch,
            launch,
            self.context.registry.clone(),
            self.finished_tx.clone(),
        ));

        info!(session_id = %session_id, launch, "Launched streaming session");
        self.active.insert(
            session_id,
            ActiveSession {
                launch,
                audio_tx,
                cancel,
                stop,
                handle,
            },
        );
        self.publish_active();
        Ok(())
    }

    fn stop(&mut self, session_id: &SessionId) -> RelayResult<()> {
        let Some(active) = self.active.remove(session_id) else {
            debug!(session_id = %session_id, "Stop for a session that is not streaming");
            return Err(RelayError::UnknownSession(session_id.clone()));
        };

        info!(session_id = %session_id, "Stopping streaming session");
        // abandons a session still connecting; a streaming one drains to Eof
        active.stop.cancel();
        let _ = active.audio_tx.send(SessionInput::Eof);
        self.stopping
            .insert(active.launch, (session_id.clone(), active.handle));
        self.publish_active();
        Ok(())
    }

    fn reap(&mut self, finished: SessionFinished) {
        info!(
            session_id = %finished.session_id,
            launch = finished.launch,
            reason = %finished.exit,
            "Streaming session finished"
        );

        self.stopping.remove(&finished.launch);
        let current = self
            .active
            .get(&finished.session_id)
            .is_some_and(|active| active.launch == finished.launch);
        if current {
            self.active.remove(&finished.session_id);
            self.publish_active();
        }
    }

    async fn shutdown(&mut self) {
        let mut sessions: Vec<(SessionId, JoinHandle<()>)> = Vec::new();
        for (session_id, active) in self.active.drain() {
            active.cancel.cancel();
            sessions.push((session_id, active.handle));
        }
        sessions.extend(self.stopping.drain().map(|(_, stopping)| stopping));
        self.publish_active();
        self.root.cancel();

        let deadline = tokio::time::Instant::now() + self.shutdown_timeout;
        for (session_id, mut handle) in sessions {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => debug!(session_id = %session_id, "Session stopped"),
                Ok(Err(e)) => error!(session_id = %session_id, error = %e, "Session task failed"),
                Err(_) => {
                    warn!(session_id = %session_id, "Session did not stop in time, aborting");
                    handle.abort();
                }
            }
        }
    }

    fn publish_active(&self) {
        let ids: BTreeSet<SessionId> = self.active.keys().cloned().collect();
        self.active_ids.send_replace(ids);
    }
}

/// Run a session and report its exit, turning a panic into a logged exit.
async fn supervise(
    session: StreamingSession,
    epoch: u64,
    launch: u64,
    registry: Arc<SessionRegistry>,
    finished_tx: mpsc::UnboundedSender<SessionFinished>,
) {
    let session_id = session.session_id().clone();

    let exit = match AssertUnwindSafe(session.run()).catch_unwind().await {
        Ok(exit) => exit,
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!(session_id = %session_id, panic = %message, "Streaming session panicked");
            registry.expire(&session_id, epoch);
            SessionExit::Panicked
        }
    };

    let _ = finished_tx.send(SessionFinished {
        session_id,
        launch,
        exit,
    });
}

// =============================================================================
// Dedicated Thread
// =============================================================================

/// A dispatcher running on its own OS thread with a current-thread runtime.
///
/// Transport callbacks never touch this runtime; they only submit commands.
pub struct DispatcherThread {
    handle: thread::JoinHandle<()>,
}

impl DispatcherThread {
    pub fn spawn(dispatcher: SessionDispatcher) -> std::io::Result<Self> {
        let handle = thread::Builder::new()
            .name("session-dispatcher".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        error!("Failed to build dispatcher runtime: {}", e);
                        return;
                    }
                };
                runtime.block_on(dispatcher.run());
            })?;
        Ok(Self { handle })
    }

    /// Block until the dispatcher has shut down. Returns `false` if it panicked.
    pub fn join(self) -> bool {
        self.handle.join().is_ok()
    }
}
