//! LLM client abstraction for Arawn.
//!
//! This crate provides the vendor-agnostic types the orchestrator's Oracle
//! abstraction is built on: a wire-shaped [`CompletionRequest`]/[`CompletionResponse`]
//! pair, and the [`LlmBackend`] trait a concrete provider would implement.
//!
//! No concrete provider backend ships here — the orchestrating core treats the
//! model purely as a pluggable planning function (see `arawn_orchestrator::oracle`).
//! [`MockBackend`] is the deterministic test double used throughout the
//! workspace's test suites.
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │  LlmBackend trait                       │
//! │  - complete() -> CompletionResponse     │
//! │  - complete_stream() -> Stream<Event>   │
//! └─────────────────────────────────────────┘
//! ```

pub mod backend;
pub mod error;
pub mod types;

pub use backend::{
    ContentDelta, LlmBackend, MockBackend, ParsedToolCall, ResponseStream, SharedBackend,
    StreamEvent, default_format_tool_definitions, default_format_tool_result, with_retry,
};
pub use error::{LlmError, ResponseValidationError, Result, is_retryable};
pub use types::{
    CacheControl, CompletionRequest, CompletionResponse, Content, ContentBlock, Message, Role,
    StopReason, SystemPrompt, ToolChoice, ToolDefinition, ToolResultBlock, ToolResultContent,
    ToolUseBlock, Usage,
};
