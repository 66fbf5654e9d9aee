//! Session registry
//!
//! Tracks every client connection known to the transport together with a
//! liveness flag. The transport writes it on connect/disconnect and on
//! start/stop requests; streaming sessions only read it, except for the
//! epoch-guarded [`SessionRegistry::expire`] performed during teardown.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tracing::debug;

/// Opaque identity of a client connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(Arc<str>);

impl SessionId {
    /// Generate a fresh random identifier (UUID v4).
    pub fn generate() -> Self {
        Self(Arc::from(uuid::Uuid::new_v4().to_string()))
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(Arc::from(value))
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

#[derive(Debug, Clone, Copy)]
struct SessionEntry {
    connected: bool,
    epoch: u64,
}

/// Thread-safe map of session id to liveness.
///
/// Every transition from "not live" to "live" stamps the entry with a new
/// epoch. A streaming session remembers the epoch it was launched under so
/// its teardown cannot clear the flag of a newer stream for the same client.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<SessionId, SessionEntry>,
    epochs: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_epoch(&self) -> u64 {
        self.epochs.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Register a newly connected client as live.
    ///
    /// Re-registering an existing id resets it to live under a new epoch.
    pub fn register(&self, session_id: SessionId) -> u64 {
        let epoch = self.next_epoch();
        debug!(session_id = %session_id, epoch, "Registering session");
        self.sessions.insert(
            session_id,
            SessionEntry {
                connected: true,
                epoch,
            },
        );
        epoch
    }

    /// Mark a registered client live again, returning the current epoch.
    ///
    /// An already live entry keeps its epoch. Returns `None` for unknown ids.
    pub fn mark_connected(&self, session_id: &SessionId) -> Option<u64> {
        let mut entry = self.sessions.get_mut(session_id)?;
        if !entry.connected {
            entry.connected = true;
            entry.epoch = self.next_epoch();
        }
        Some(entry.epoch)
    }

    /// Clear the liveness flag. Returns `false` for unknown ids.
    pub fn mark_disconnected(&self, session_id: &SessionId) -> bool {
        match self.sessions.get_mut(session_id) {
            Some(mut entry) => {
                entry.connected = false;
                true
            }
            None => false,
        }
    }

    /// Whether the client is registered and currently live.
    pub fn is_live(&self, session_id: &SessionId) -> bool {
        self.sessions
            .get(session_id)
            .is_some_and(|entry| entry.connected)
    }

    /// Epoch of a live client, `None` when unknown or not live.
    pub fn epoch(&self, session_id: &SessionId) -> Option<u64> {
        self.sessions
            .get(session_id)
            .filter(|entry| entry.connected)
            .map(|entry| entry.epoch)
    }

    /// Clear the liveness flag only if the entry is still at `epoch`.
    pub fn expire(&self, session_id: &SessionId, epoch: u64) -> bool {
        match self.sessions.get_mut(session_id) {
            Some(mut entry) if entry.epoch == epoch && entry.connected => {
                entry.connected = false;
                true
            }
            _ => false,
        }
    }

    /// Remove the entry entirely.
    pub fn unregister(&self, session_id: &SessionId) -> bool {
        self.sessions.remove(session_id).is_some()
    }

    pub fn is_registered(&self, session_id: &SessionId) -> bool {
        self.sessions.contains_key(session_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
