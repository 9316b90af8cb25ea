//! Typed core configuration (§4.9, §6.4): pool sizing, timeout budgets, and
//! the `SERVERS` list, assembled from an optional TOML file layer with
//! environment variables taking precedence over it.
//!
//! ```toml
//! pool_size = 10
//! pool_max_wait_seconds = 30.0
//!
//! [[servers]]
//! key = "docs"
//! transport = "stdio"
//! command_or_url = "awslabs.aws-documentation-mcp-server"
//! allow_prefixes = ["awsdocs_"]
//! ```
//!
//! # Environment variables
//!
//! - `POOL_SIZE` (default 10)
//! - `POOL_MAX_WAIT_SECONDS` (default 30)
//! - `MCP_STARTUP_TIMEOUT_SECONDS` (default 60)
//! - `MCP_TOOL_TIMEOUT_SECONDS` (default 60)
//! - `SESSION_IDLE_TTL_SECONDS` (default 3600)
//! - `CONTEXT_BUDGET_CHARS` (default 32000)

use std::path::Path;
use std::str::FromStr;

use arawn_orchestrator::ServerConfig;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

const DEFAULT_POOL_SIZE: usize = 10;
const DEFAULT_POOL_MAX_WAIT_SECONDS: f64 = 30.0;
const DEFAULT_MCP_STARTUP_TIMEOUT_SECONDS: u64 = 60;
const DEFAULT_MCP_TOOL_TIMEOUT_SECONDS: u64 = 60;
const DEFAULT_SESSION_IDLE_TTL_SECONDS: u64 = 3600;
const DEFAULT_CONTEXT_BUDGET_CHARS: usize = 32_000;

/// The process-wide configuration assembled at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub pool_size: usize,
    pub pool_max_wait_seconds: f64,
    pub mcp_startup_timeout_seconds: u64,
    pub mcp_tool_timeout_seconds: u64,
    pub session_idle_ttl_seconds: u64,
    pub context_budget_chars: usize,
    pub servers: Vec<ServerConfig>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_POOL_SIZE,
            pool_max_wait_seconds: DEFAULT_POOL_MAX_WAIT_SECONDS,
            mcp_startup_timeout_seconds: DEFAULT_MCP_STARTUP_TIMEOUT_SECONDS,
            mcp_tool_timeout_seconds: DEFAULT_MCP_TOOL_TIMEOUT_SECONDS,
            session_idle_ttl_seconds: DEFAULT_SESSION_IDLE_TTL_SECONDS,
            context_budget_chars: DEFAULT_CONTEXT_BUDGET_CHARS,
            servers: Vec::new(),
        }
    }
}

impl CoreConfig {
    /// Load the TOML file at `path` if it exists, then overlay any of the
    /// recognized environment variables on top of it. `servers` always comes
    /// from the file layer; there is no env-var encoding for a structured list.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) if path.exists() => {
                let text =
                    std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
                        path: path.display().to_string(),
                        source,
                    })?;
                toml::from_str(&text).map_err(|source| ConfigError::Parse {
                    path: path.display().to_string(),
                    source,
                })?
            }
            _ => Self::default(),
        };
        config.overlay_env()?;
        Ok(config)
    }

    fn overlay_env(&mut self) -> Result<()> {
        if let Some(v) = env_parsed("POOL_SIZE")? {
            self.pool_size = v;
        }
        if let Some(v) = env_parsed("POOL_MAX_WAIT_SECONDS")? {
            self.pool_max_wait_seconds = v;
        }
        if let Some(v) = env_parsed("MCP_STARTUP_TIMEOUT_SECONDS")? {
            self.mcp_startup_timeout_seconds = v;
        }
        if let Some(v) = env_parsed("MCP_TOOL_TIMEOUT_SECONDS")? {
            self.mcp_tool_timeout_seconds = v;
        }
        if let Some(v) = env_parsed("SESSION_IDLE_TTL_SECONDS")? {
            self.session_idle_ttl_seconds = v;
        }
        if let Some(v) = env_parsed("CONTEXT_BUDGET_CHARS")? {
            self.context_budget_chars = v;
        }
        Ok(())
    }
}

fn env_parsed<T: FromStr>(var: &str) -> Result<Option<T>> {
    match std::env::var(var) {
        Ok(value) => value
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnvVar { var: var.to_string(), value }),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(std::env::VarError::NotUnicode(_)) => Err(ConfigError::InvalidEnvVar {
            var: var.to_string(),
            value: "<non-unicode>".to_string(),
        }),
    }
}
