//! In-memory session store and context buffer for Arawn.
//!
//! This crate provides the per-conversation state the orchestrator needs
//! between requests:
//! - An atomic `id -> Session` registry ([`SessionStore`]) with idle-TTL
//!   eviction.
//! - A bounded, budget-enforcing conversation history ([`ContextBuffer`])
//!   attached to each session.
//!
//! The store is in-memory only; there is no persistence backend and no
//! generic hook for one, by design.
//!
//! # Example
//!
//! ```rust,ignore
//! use arawn_session::{SessionConfig, SessionStore};
//!
//! let store = SessionStore::new(SessionConfig::new());
//! let session = store.get_or_create("session-1").await;
//! ```

mod config;
mod context;
mod error;
mod session;

pub use config::{
    DEFAULT_CONTEXT_BUDGET_CHARS, DEFAULT_IDLE_TTL, DEFAULT_SWEEP_INTERVAL, SessionConfig,
};
pub use context::{ContextBuffer, Role, ToolCallDigest, Turn};
pub use error::{Result, SessionError};
pub use session::{Mode, Session, SessionStore, SideState};
