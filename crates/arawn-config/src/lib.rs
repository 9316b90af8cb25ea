//! Configuration for the Arawn orchestrator core.
//!
//! A single [`CoreConfig`] assembles the environment-driven options of §6.4
//! (pool sizing, timeout budgets, the `SERVERS` list) from an optional TOML
//! file layer with environment variables taking precedence, following the
//! shape of the teacher's layered config loader without its named-profile
//! machinery.

pub mod config;
pub mod error;

pub use config::CoreConfig;
pub use error::{ConfigError, Result};
