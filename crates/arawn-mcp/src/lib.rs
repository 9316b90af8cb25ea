//! MCP (Model Context Protocol) client and pool for Arawn.
//!
//! This crate speaks MCP's JSON-RPC 2.0 wire protocol over stdio or HTTP, and
//! manages a warm pool of initialized clients per server so the orchestrator
//! never pays a cold-start handshake on the hot path.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  PoolManager                                                 │
//! │  - one Pool per distinct ServerConfig key                    │
//! └─────────────────────────────────────────────────────────────┘
//!                           │
//!                           ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Pool                                                        │
//! │  - acquire(deadline) / release(client, outcome)               │
//! │  - FIFO wait queue, created/reused/in_use/available counters │
//! └─────────────────────────────────────────────────────────────┘
//!                           │
//!                           ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  McpClient                                                   │
//! │  - initialize, tools/list, tools/call                        │
//! └─────────────────────────────────────────────────────────────┘
//!                           │
//!                           ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  McpTransport                                                │
//! │  - JSON-RPC 2.0 with Content-Length framing (stdio)           │
//! │  - JSON-RPC 2.0 over HTTP POST                                │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use arawn_mcp::{PoolManager, McpServerConfig, PoolOutcome};
//! use std::time::Duration;
//!
//! let manager = PoolManager::default();
//! let config = McpServerConfig::new("sqlite", "mcp-server-sqlite")
//!     .with_arg("--db")
//!     .with_arg("/path/to/database.db");
//!
//! let pool = manager.get_or_create(config).await?;
//! let pooled = pool.acquire(Duration::from_secs(10)).await?;
//! let result = pooled.client().call_tool("query", None).await?;
//! pool.release(pooled, PoolOutcome::Healthy).await;
//! ```
//!
//! # MCP Protocol
//!
//! MCP uses JSON-RPC 2.0 over stdio with Content-Length framing:
//!
//! ```text
//! Content-Length: <length>\r\n
//! \r\n
//! {"jsonrpc": "2.0", "id": 1, "method": "...", "params": {...}}
//! ```
//!
//! The protocol flow is:
//! 1. Client sends `initialize` with capabilities
//! 2. Server responds with its capabilities
//! 3. Client sends `notifications/initialized`
//! 4. Client can now call `tools/list` and `tools/call`

pub mod client;
pub mod error;
pub mod pool;
pub mod pool_manager;
pub mod protocol;
pub mod transport;

pub use client::{McpClient, McpServerConfig, TransportType};
pub use error::{McpError, Result};
pub use pool::{Pool, PoolCounters, PoolOutcome, PooledClient};
pub use pool_manager::{DEFAULT_POOL_CAPACITY, PoolManager};
pub use protocol::{
    CallToolParams, CallToolResult, InitializeParams, InitializeResult, JsonRpcError,
    JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, ListToolsResult, ServerCapabilities,
    ServerInfo, ToolContent, ToolInfo, ToolsCapability,
};
pub use transport::{DEFAULT_STARTUP_TIMEOUT, HttpTransportConfig, McpTransport};
