//! Application state shared across handlers.

use std::sync::Arc;

use arawn_orchestrator::OrchestratorContext;

use crate::config::ServerConfig;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// The core orchestrator context (sessions, pools, oracle, servers).
    pub orchestrator: Arc<OrchestratorContext>,

    /// HTTP adapter configuration.
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(orchestrator: Arc<OrchestratorContext>, config: ServerConfig) -> Self {
        Self {
            orchestrator,
            config: Arc::new(config),
        }
    }
}
