//! A thin reference HTTP adapter for the orchestrator core.
//!
//! The HTTP/CLI surface is explicitly out of scope for the core (§1); this
//! crate exists only to demonstrate the boundary described in §6.2 — an
//! axum SSE route that accepts a `RequestEnvelope` and streams back its
//! NDJSON event sequence — grounded in the teacher's `routes::chat` shape.
//! There is no auth, rate limiting, or persistence layer here: those are
//! concerns of whatever production surface wraps the core, not the core
//! itself.

pub mod config;
pub mod error;
pub mod routes;
pub mod state;

pub use config::ServerConfig;
pub use error::{Result, ServerError};
pub use state::AppState;

use std::net::SocketAddr;
use std::sync::Arc;

use arawn_orchestrator::OrchestratorContext;
use axum::{Router, routing::post};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

/// The reference HTTP server wrapping one [`OrchestratorContext`].
pub struct Server {
    state: AppState,
}

impl Server {
    pub fn new(orchestrator: Arc<OrchestratorContext>, config: ServerConfig) -> Self {
        Self {
            state: AppState::new(orchestrator, config),
        }
    }

    pub fn from_state(state: AppState) -> Self {
        Self { state }
    }

    /// Build the router: health check plus the one streaming request route.
    pub fn router(&self) -> Router {
        Router::new()
            .merge(routes::health_routes())
            .route("/api/v1/requests/stream", post(routes::request_stream_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    pub async fn run(self) -> Result<()> {
        self.run_on(self.state.config.bind_address).await
    }

    pub async fn run_on(self, addr: SocketAddr) -> Result<()> {
        let router = self.router();
        info!(%addr, "starting server");

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Internal(format!("failed to bind: {e}")))?;

        axum::serve(listener, router)
            .await
            .map_err(|e| ServerError::Internal(format!("server error: {e}")))?;

        Ok(())
    }

    pub fn bind_address(&self) -> SocketAddr {
        self.state.config.bind_address
    }
}
