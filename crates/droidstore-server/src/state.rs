//! Shared application state.

use std::sync::Arc;

use droidstore_store::Store;

use crate::auth::AccessGate;
use crate::orchestrator::Orchestrator;

/// State shared by every request handler.
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub orchestrator: Arc<dyn Orchestrator>,
    pub gate: AccessGate,
}

impl AppState {
    pub fn new(
        store: Arc<dyn Store>,
        orchestrator: Arc<dyn Orchestrator>,
        gate: AccessGate,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            orchestrator,
            gate,
        })
    }
}
