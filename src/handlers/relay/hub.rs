//! Per-connection delivery of emissions.

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::trace;

use crate::core::{Emission, EmissionSink, SessionId};

/// Routes emissions to the socket that owns each session id.
#[derive(Debug, Default)]
pub struct ClientHub {
    clients: DashMap<SessionId, mpsc::UnboundedSender<Emission>>,
}

impl ClientHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection and get the stream of its emissions.
    pub fn attach(&self, session_id: SessionId) -> mpsc::UnboundedReceiver<Emission> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.clients.insert(session_id, tx);
        rx
    }

    /// Drop a connection. Its emission stream ends once drained.
    pub fn detach(&self, session_id: &SessionId) -> bool {
        self.clients.remove(session_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

impl EmissionSink for ClientHub {
    fn emit(&self, session_id: &SessionId, emission: Emission) {
        match self.clients.get(session_id) {
            Some(client) => {
                let _ = client.send(emission);
            }
            None => trace!(session_id = %session_id, "No socket for emission, dropping"),
        }
    }
}
