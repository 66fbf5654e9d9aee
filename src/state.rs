use std::sync::Arc;

use crate::core::RelayBridge;
use crate::handlers::relay::ClientHub;

/// Shared state handed to every request handler.
pub struct AppState {
    pub bridge: RelayBridge,
    pub hub: Arc<ClientHub>,
}

impl AppState {
    pub fn new(bridge: RelayBridge, hub: Arc<ClientHub>) -> Arc<Self> {
        Arc::new(Self { bridge, hub })
    }
}
