//! Mode orchestrator for Arawn.
//!
//! This crate drives the three request modes (Brainstorm, Analyze, Generate)
//! against a pluggable [`Oracle`] and a pool of MCP tool servers, producing
//! one newline-delimited JSON [`Event`] stream per request.
//!
//! # Core components
//!
//! - [`mode`]: the three state machines and the shared tool-dispatch loop
//!   that drives them.
//! - [`oracle`]: the LLM abstraction the state machines plan against.
//! - [`sanitizer`]: the allow/deny policy applied to every tool call before
//!   it reaches the pool.
//! - [`event`]: the wire shape of the client-facing event stream.
//! - [`stream`]: NDJSON encoding of a mode's event stream, enforcing exactly
//!   one terminal event.
//! - [`types`]: server configuration, tool calls, and the request envelope.
//!
//! Session state (the context buffer, idle-TTL eviction) and MCP transport
//! pooling live in `arawn-session` and `arawn-mcp` respectively; this crate
//! consumes both rather than reimplementing either.

pub mod error;
pub mod event;
pub mod mode;
pub mod oracle;
pub mod sanitizer;
pub mod stream;
pub mod types;

pub use error::{FailureKind, OrchestratorError, Result};
pub use event::{ArtifactKind, ArtifactPayload, Event, ToolResultStatus};
pub use mode::{EventStream, MAX_PARALLEL_TOOL_CALLS, OrchestratorContext, handle_request};
pub use oracle::{BackendOracle, MockOracle, Oracle, PlanChunk, PlanStream, Turn};
pub use sanitizer::{BlockTracker, Blocked, POLICY_VIOLATION_THRESHOLD};
pub use stream::{EncodedStream, encode_events};
pub use types::{
    DEFAULT_DENY_SUBSTRINGS, McpServerConfigDef, RequestEnvelope, ServerConfig, ToolCallRequest,
    TransportKind,
};
