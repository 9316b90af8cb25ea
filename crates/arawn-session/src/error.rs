//! Error types for session store operations.

/// Error type for session store operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Session was not found in the store.
    #[error("session not found: {0}")]
    NotFound(String),

    /// Session existed but its idle TTL has elapsed.
    #[error("session expired: {0}")]
    Expired(String),
}

/// Result type for session store operations.
pub type Result<T> = std::result::Result<T, SessionError>;
