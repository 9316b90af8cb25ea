//! Orchestrator-level data model: server configuration, tool calls, and the
//! request envelope consumed at the boundary.

use arawn_mcp::McpServerConfig;
use arawn_session::Mode;
use serde::{Deserialize, Serialize};

/// Substrings that mark a tool name as mutating. Any tool whose
/// fully-qualified name contains one of these is denied regardless of mode.
pub const DEFAULT_DENY_SUBSTRINGS: &[&str] = &[
    "create_resource",
    "update_resource",
    "delete_resource",
    "apply",
    "destroy",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Stdio,
    Http,
}

/// Serde-friendly mirror of [`McpServerConfig`]'s construction inputs, used
/// to deserialize the `SERVERS` configuration entry before it is turned into
/// a live [`McpServerConfig`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerConfigDef {
    pub key: String,
    pub transport: TransportKind,
    /// Command (stdio) or URL (http), per `transport`.
    pub command_or_url: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: Vec<(String, String)>,
}

/// Identity of an MCP tool-server plus the sanitizer-relevant policy that
/// applies to it. Wraps [`McpServerConfig`] (the transport/pool identity)
/// with the allow/deny fields the MCP pool itself doesn't need.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(flatten)]
    pub mcp: McpServerConfigDef,
    /// Tool name prefixes this server's tools are allowed under (e.g. `awsdocs_`).
    pub allow_prefixes: Vec<String>,
    /// Extra deny substrings beyond [`DEFAULT_DENY_SUBSTRINGS`], specific to this server.
    #[serde(default)]
    pub deny_substrings: Vec<String>,
}

impl ServerConfig {
    /// Build the live [`McpServerConfig`] this server's pool is keyed on.
    pub fn to_mcp_config(&self) -> McpServerConfig {
        let mut config = match self.mcp.transport {
            TransportKind::Stdio => {
                let mut cfg = McpServerConfig::new(&self.mcp.key, &self.mcp.command_or_url);
                for arg in &self.mcp.args {
                    cfg = cfg.with_arg(arg);
                }
                cfg
            }
            TransportKind::Http => McpServerConfig::http(&self.mcp.key, &self.mcp.command_or_url),
        };
        config = config.with_env(self.mcp.env.clone());
        config
    }

    pub fn key(&self) -> &str {
        &self.mcp.key
    }
}

/// A single planned invocation, produced by the [`crate::oracle::Oracle`]
/// and checked by the sanitizer before it is dispatched via a pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Stable id correlating `tool_invoked`/`tool_result` events for this call.
    pub call_id: String,
    /// Fully-qualified tool name (e.g. `awsdocs_search`).
    pub tool: String,
    pub arguments: serde_json::Value,
}

impl ToolCallRequest {
    /// The server this call must be routed to, derived from its tool-name
    /// prefix against the configured servers.
    pub fn resolve_server<'a>(&self, servers: &'a [ServerConfig]) -> Option<&'a ServerConfig> {
        servers
            .iter()
            .find(|s| s.allow_prefixes.iter().any(|p| self.tool.starts_with(p)))
    }
}

/// Each request carries a session id (created if absent), a mode, and the
/// free-form user input, plus mode-specific optional fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub session_id: Option<String>,
    pub mode: Mode,
    pub input: String,
    /// Generate-mode revision requests carry the prior template verbatim.
    #[serde(default)]
    pub existing_template: Option<String>,
    /// Analyze-mode constraints (e.g. target region).
    #[serde(default)]
    pub constraints: Option<serde_json::Value>,
}
