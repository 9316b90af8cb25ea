//! Static allow/deny policy applied to every candidate tool call before it
//! reaches the pool. Enforces the read-only guarantee (§4.5).

use arawn_session::Mode;

use crate::types::{DEFAULT_DENY_SUBSTRINGS, ServerConfig, ToolCallRequest};

/// A call was rejected by the sanitizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blocked {
    pub reason: String,
}

impl Blocked {
    fn deny_substring(tool: &str, substring: &str) -> Self {
        Self {
            reason: format!("tool '{tool}' matches denied substring '{substring}'"),
        }
    }

    fn not_allowed_for_mode(tool: &str, mode: Mode) -> Self {
        Self {
            reason: format!("tool '{tool}' is not in the allow-list for mode {mode:?}"),
        }
    }

    fn no_server(tool: &str) -> Self {
        Self {
            reason: format!("tool '{tool}' does not match any configured server"),
        }
    }
}

/// Checks one tool call against the deny-substring list and the mode's
/// allow-list of tool-name prefixes.
///
/// The deny list always wins: a mutation-looking name is blocked even if a
/// mode's allow-list would otherwise admit its prefix.
pub fn check(
    call: &ToolCallRequest,
    mode: Mode,
    servers: &[ServerConfig],
) -> Result<(), Blocked> {
    let Some(server) = call.resolve_server(servers) else {
        return Err(Blocked::no_server(&call.tool));
    };

    for substring in DEFAULT_DENY_SUBSTRINGS
        .iter()
        .copied()
        .chain(server.deny_substrings.iter().map(String::as_str))
    {
        if call.tool.contains(substring) {
            return Err(Blocked::deny_substring(&call.tool, substring));
        }
    }

    let mode_allows = server
        .allow_prefixes
        .iter()
        .any(|prefix| call.tool.starts_with(prefix) && mode_permits_prefix(mode, prefix, server));
    if !mode_allows {
        return Err(Blocked::not_allowed_for_mode(&call.tool, mode));
    }

    Ok(())
}

/// Whether `mode` is allowed to use tools under `prefix` on `server`.
///
/// Brainstorm is restricted to documentation-search servers; Analyze and
/// Generate may use any configured server's prefixes (they draw on the
/// broader set of documentation/diagram/pricing/template servers).
fn mode_permits_prefix(mode: Mode, _prefix: &str, server: &ServerConfig) -> bool {
    match mode {
        Mode::Brainstorm => server.key() == "docs" || server.mcp.key.contains("docs"),
        Mode::Analyze | Mode::Generate => true,
    }
}

/// Tracks successive `Blocked` responses within one orchestrator turn so the
/// caller can escalate to `Event.Failed{kind=PolicyViolation}` after three in
/// a row (§4.5, §7).
#[derive(Debug, Default)]
pub struct BlockTracker {
    consecutive: u32,
}

/// Number of successive blocks in one turn that escalates to a policy
/// violation failure.
pub const POLICY_VIOLATION_THRESHOLD: u32 = 3;

impl BlockTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a block and report whether the threshold has now been reached.
    pub fn record_block(&mut self) -> bool {
        self.consecutive += 1;
        self.consecutive >= POLICY_VIOLATION_THRESHOLD
    }

    /// Record a successful (non-blocked) call, resetting the streak.
    pub fn record_success(&mut self) {
        self.consecutive = 0;
    }
}
