//! Command queue between the transport and the session dispatcher.
//!
//! Producers are the transport callbacks, which may run on any thread and
//! must never block, so the queue is an unbounded tokio MPSC channel.
//! Submission order is preserved globally, which gives per-session ordering.
//! The channel has no backpressure: a consumer that falls behind grows it
//! without limit.

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::trace;

use crate::core::registry::SessionId;
use crate::errors::{RelayError, RelayResult};

/// Work item for the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Start { session_id: SessionId },
    Stop { session_id: SessionId },
    Audio { session_id: SessionId, payload: Bytes },
    /// Sentinel that ends the dispatcher loop.
    Shutdown,
}

impl Command {
    pub fn session_id(&self) -> Option<&SessionId> {
        match self {
            Command::Start { session_id }
            | Command::Stop { session_id }
            | Command::Audio { session_id, .. } => Some(session_id),
            Command::Shutdown => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Command::Start { .. } => "start",
            Command::Stop { .. } => "stop",
            Command::Audio { .. } => "audio",
            Command::Shutdown => "shutdown",
        }
    }
}

/// Constructor for the producer/consumer pair.
pub struct CommandQueue;

impl CommandQueue {
    pub fn unbounded() -> (CommandSender, CommandReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (CommandSender { tx }, CommandReceiver { rx })
    }
}

/// Producer half. Cheap to clone, callable from synchronous code.
#[derive(Debug, Clone)]
pub struct CommandSender {
    tx: mpsc::UnboundedSender<Command>,
}

impl CommandSender {
    /// Enqueue a command without blocking.
    pub fn submit(&self, command: Command) -> RelayResult<()> {
        trace!(kind = command.kind(), "Submitting command");
        self.tx.send(command).map_err(|_| RelayError::QueueClosed)
    }

    pub fn start(&self, session_id: SessionId) -> RelayResult<()> {
        self.submit(Command::Start { session_id })
    }

    pub fn stop(&self, session_id: SessionId) -> RelayResult<()> {
        self.submit(Command::Stop { session_id })
    }

    pub fn audio(&self, session_id: SessionId, payload: Bytes) -> RelayResult<()> {
        self.submit(Command::Audio {
            session_id,
            payload,
        })
    }

    pub fn shutdown(&self) -> RelayResult<()> {
        self.submit(Command::Shutdown)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer half, owned by exactly one dispatcher.
#[derive(Debug)]
pub struct CommandReceiver {
    rx: mpsc::UnboundedReceiver<Command>,
}

impl CommandReceiver {
    /// Wait for the next command.
    ///
    /// Once every sender is dropped there is nobody left to feed the
    /// dispatcher, so a closed queue reads as [`Command::Shutdown`].
    pub async fn take(&mut self) -> Command {
        self.rx.recv().await.unwrap_or(Command::Shutdown)
    }

    /// Number of commands waiting to be taken.
    pub fn pending(&self) -> usize {
        self.rx.len()
    }
}
