//! Error types for MCP operations.

use thiserror::Error;

/// Result type for MCP operations.
pub type Result<T> = std::result::Result<T, McpError>;

/// Error type for MCP operations.
#[derive(Debug, Error)]
pub enum McpError {
    /// Failed to spawn the MCP server process.
    #[error("failed to spawn MCP server: {0}")]
    SpawnFailed(String),

    /// Failed to communicate with the MCP server.
    #[error("transport error: {0}")]
    Transport(String),

    /// JSON-RPC protocol error.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Server returned an error response.
    #[error("server error {code}: {message}")]
    ServerError {
        /// Error code from the server.
        code: i64,
        /// Error message from the server.
        message: String,
        /// Optional additional data.
        data: Option<serde_json::Value>,
    },

    /// Tool execution failed.
    #[error("tool error: {0}")]
    ToolError(String),

    /// Server not initialized.
    #[error("server not initialized - call initialize() first")]
    NotInitialized,

    /// Connection closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// Timeout waiting for response.
    #[error("timeout waiting for response")]
    Timeout,

    /// The initialize handshake did not complete within the startup budget.
    #[error("startup timeout after {0:?}")]
    StartupTimeout(std::time::Duration),

    /// No idle or spawnable client became available before the acquire deadline.
    #[error("pool exhausted for server '{0}' after waiting {1:?}")]
    PoolExhausted(String, std::time::Duration),

    /// The pool is tearing down and will not service new acquires.
    #[error("pool for server '{0}' is shutting down")]
    PoolShuttingDown(String),

    /// Two distinct `ServerConfig`s were registered under the same pool key.
    #[error("server config key '{0}' is already registered with a different configuration")]
    DuplicateKey(String),
}

impl McpError {
    /// Create a spawn failed error.
    pub fn spawn_failed(msg: impl Into<String>) -> Self {
        Self::SpawnFailed(msg.into())
    }

    /// Create a transport error.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a protocol error.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a server error from an error response.
    pub fn server_error(
        code: i64,
        message: impl Into<String>,
        data: Option<serde_json::Value>,
    ) -> Self {
        Self::ServerError {
            code,
            message: message.into(),
            data,
        }
    }

    /// Create a tool error.
    pub fn tool_error(msg: impl Into<String>) -> Self {
        Self::ToolError(msg.into())
    }

    /// True if this error should cause a `PooledClient` to be marked `Broken`
    /// rather than returned to the pool.
    pub fn is_fatal_to_client(&self) -> bool {
        matches!(
            self,
            Self::Transport(_)
                | Self::Io(_)
                | Self::ConnectionClosed
                | Self::Timeout
                | Self::StartupTimeout(_)
        )
    }
}
