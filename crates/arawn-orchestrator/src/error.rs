//! Error types for the orchestrator crate.

use thiserror::Error;

/// Result type alias using the orchestrator error type.
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// The terminal failure kinds exposed to the client event stream.
///
/// `startup_timeout`, `broken_client`, and `transport_reset` are logged
/// internally but never surfaced verbatim; they all map to [`FailureKind::Internal`]
/// or [`FailureKind::ToolError`] at the boundary (see [`OrchestratorError::failure_kind`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    PoolExhausted,
    ToolError,
    PolicyViolation,
    Cancelled,
    Internal,
}

/// Error type for orchestrator operations.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The per-request wall-clock deadline elapsed.
    #[error("request deadline exceeded after {0:?}")]
    Timeout(std::time::Duration),

    /// A pool `acquire` could not be satisfied before its deadline.
    #[error("pool exhausted: {0}")]
    PoolExhausted(String),

    /// Three successive failed calls to the same tool in one turn.
    #[error("tool error: {0}")]
    ToolError(String),

    /// Three successive sanitizer blocks in one turn.
    #[error("policy violation: {0}")]
    PolicyViolation(String),

    /// The client disconnected or the request was otherwise cancelled.
    #[error("cancelled")]
    Cancelled,

    /// An empty user turn, or any other state the orchestrator refuses to act on.
    #[error("internal error: {0}")]
    Internal(String),

    /// MCP transport/pool error, bridged from `arawn-mcp`.
    #[error("mcp error: {0}")]
    Mcp(#[from] arawn_mcp::McpError),

    /// Session store error, bridged from `arawn-session`.
    #[error("session error: {0}")]
    Session(#[from] arawn_session::SessionError),

    /// LLM backend error, bridged from `arawn-llm`.
    #[error("llm error: {0}")]
    Llm(#[from] arawn_llm::LlmError),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl OrchestratorError {
    pub fn pool_exhausted(msg: impl Into<String>) -> Self {
        Self::PoolExhausted(msg.into())
    }

    pub fn tool_error(msg: impl Into<String>) -> Self {
        Self::ToolError(msg.into())
    }

    pub fn policy_violation(msg: impl Into<String>) -> Self {
        Self::PolicyViolation(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Map this error onto the wire-level `failed.kind` taxonomy of the
    /// client event stream.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Timeout(_) => FailureKind::Timeout,
            Self::PoolExhausted(_) => FailureKind::PoolExhausted,
            Self::ToolError(_) => FailureKind::ToolError,
            Self::PolicyViolation(_) => FailureKind::PolicyViolation,
            Self::Cancelled => FailureKind::Cancelled,
            Self::Internal(_) | Self::Serialization(_) => FailureKind::Internal,
            // A broken/unreachable MCP client surfaces as a tool error for the
            // current request; the pool repairs itself lazily on next acquire.
            Self::Mcp(arawn_mcp::McpError::PoolExhausted(..))
            | Self::Mcp(arawn_mcp::McpError::PoolShuttingDown(..)) => FailureKind::PoolExhausted,
            Self::Mcp(_) => FailureKind::ToolError,
            Self::Session(_) => FailureKind::Internal,
            Self::Llm(_) => FailureKind::Internal,
        }
    }
}
