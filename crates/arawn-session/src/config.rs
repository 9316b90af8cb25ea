//! Configuration for the session store.

use std::time::Duration;

/// Default idle TTL before a session is swept (`SESSION_IDLE_TTL_SECONDS`).
pub const DEFAULT_IDLE_TTL: Duration = Duration::from_secs(3600);

/// Default character budget for a session's [`crate::ContextBuffer`] (`CONTEXT_BUDGET_CHARS`).
pub const DEFAULT_CONTEXT_BUDGET_CHARS: usize = 32_000;

/// Default interval between TTL sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Configuration for the session store.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Idle duration after which a session with no activity is evicted.
    pub idle_ttl: Duration,

    /// Character budget enforced on every session's context buffer.
    pub context_budget_chars: usize,

    /// Whether to run a periodic background sweep of expired sessions.
    pub enable_sweep: bool,

    /// Interval for the background sweep task (if enabled).
    pub sweep_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_ttl: DEFAULT_IDLE_TTL,
            context_budget_chars: DEFAULT_CONTEXT_BUDGET_CHARS,
            enable_sweep: true,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

impl SessionConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the idle TTL.
    pub fn with_idle_ttl(mut self, ttl: Duration) -> Self {
        self.idle_ttl = ttl;
        self
    }

    /// Set the context buffer character budget.
    pub fn with_context_budget_chars(mut self, budget: usize) -> Self {
        self.context_budget_chars = budget;
        self
    }

    /// Enable or disable the background sweep task.
    pub fn with_sweep(mut self, enabled: bool) -> Self {
        self.enable_sweep = enabled;
        self
    }

    /// Set the sweep interval.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }
}
