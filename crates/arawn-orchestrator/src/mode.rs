//! The mode orchestrator: the three Brainstorm/Analyze/Generate state
//! machines that drive an [`Oracle`] and a set of MCP tool servers to
//! produce one [`Event`] stream per request (§4.3).

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use arawn_llm::ToolDefinition;
use arawn_mcp::{PoolManager, PoolOutcome};
use arawn_session::{ContextBuffer, Mode, SessionStore, SideState, Turn as SessionTurn, ToolCallDigest};
use futures::{Stream, StreamExt};
use tokio::sync::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::{FailureKind, OrchestratorError, Result};
use crate::event::{ArtifactKind, ArtifactPayload, Event, ToolResultStatus, digest};
use crate::oracle::Oracle;
use crate::sanitizer::{self, BlockTracker};
use crate::types::{RequestEnvelope, ServerConfig, ToolCallRequest};

/// Upper bound on concurrently in-flight tool calls within one planning step.
pub const MAX_PARALLEL_TOOL_CALLS: usize = 4;

/// Upper bound on plan/dispatch round-trips within one request, guarding
/// against a misbehaving model that never stops calling tools.
const MAX_PLANNING_STEPS: u32 = 6;

/// Number of consecutive failed calls to the same tool, in one turn, that
/// escalates to `Event.Failed{kind=ToolError}` (§7). Distinct from
/// [`sanitizer::POLICY_VIOLATION_THRESHOLD`], which counts sanitizer blocks
/// rather than dispatch failures.
const TOOL_ERROR_THRESHOLD: u32 = 3;

const DEFAULT_BRAINSTORM_DEADLINE: Duration = Duration::from_secs(30);
const DEFAULT_ANALYZE_DEADLINE: Duration = Duration::from_secs(120);
const DEFAULT_GENERATE_DEADLINE: Duration = Duration::from_secs(180);

const BRAINSTORM_SYSTEM_PROMPT: &str = "\
You are an AWS solutions brainstorming assistant. Use the documentation \
search tools available to you to ground your answer, then give a concise \
answer. End your answer with a section titled 'Follow-ups:' listing two or \
three short follow-up questions, one per line.";

const ANALYZE_RESEARCH_SYSTEM_PROMPT: &str = "\
You are researching AWS services and architecture patterns relevant to the \
user's request. Use the documentation, diagram, and pricing tools available \
to you as needed. When you are done researching, summarize what you found \
in prose.";

const ANALYZE_STRUCTURING_SYSTEM_PROMPT: &str = "\
Produce a single JSON object (no surrounding prose) with exactly these \
fields: executive_summary (string), service_recommendations (array), \
architecture_sections (object or array), and cost_insights (object or \
array), drawn from the research above.";

const GENERATE_PLANNING_SYSTEM_PROMPT: &str = "\
You are planning the AWS resources needed to satisfy the user's \
infrastructure request. Use the documentation, diagram, and pricing tools \
available to you as needed. Tools that would create, modify, or delete \
cloud resources are not available to you; only read-only/informational \
tools are. When done, summarize the resources you plan to provision.";

const GENERATE_TEMPLATE_SYSTEM_PROMPT: &str = "\
Produce a single CloudFormation template in YAML (no surrounding prose) \
that provisions the resources described above. If a prior template was \
supplied, revise it rather than starting over.";

/// The stream of [`Event`]s produced for one request.
pub type EventStream = Pin<Box<dyn Stream<Item = Event> + Send>>;

/// Shared dependencies for running any mode. Cheap to clone (everything
/// behind an `Arc`), constructed once per process.
pub struct OrchestratorContext {
    pub sessions: Arc<SessionStore>,
    pub pools: Arc<PoolManager>,
    pub oracle: Arc<dyn Oracle>,
    pub servers: Vec<ServerConfig>,
    pub pool_acquire_deadline: Duration,
    pub tool_call_timeout: Duration,
    /// Per-server `list_tools` results, cached for the context's lifetime so
    /// every request doesn't pay a pool acquire/release just to re-list a
    /// tool set that never changes at runtime.
    tool_cache: RwLock<HashMap<String, Vec<ToolDefinition>>>,
}

impl OrchestratorContext {
    pub fn new(
        sessions: Arc<SessionStore>,
        pools: Arc<PoolManager>,
        oracle: Arc<dyn Oracle>,
        servers: Vec<ServerConfig>,
    ) -> Self {
        Self {
            sessions,
            pools,
            oracle,
            servers,
            pool_acquire_deadline: Duration::from_secs(30),
            tool_call_timeout: Duration::from_secs(60),
            tool_cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_pool_acquire_deadline(mut self, deadline: Duration) -> Self {
        self.pool_acquire_deadline = deadline;
        self
    }

    pub fn with_tool_call_timeout(mut self, timeout: Duration) -> Self {
        self.tool_call_timeout = timeout;
        self
    }
}

/// Entry point: dispatch a request envelope to its mode's state machine.
pub fn handle_request(
    ctx: Arc<OrchestratorContext>,
    envelope: RequestEnvelope,
    cancel: CancellationToken,
) -> EventStream {
    match envelope.mode {
        Mode::Brainstorm => run_brainstorm(ctx, envelope, cancel),
        Mode::Analyze => run_analyze(ctx, envelope, cancel),
        Mode::Generate => run_generate(ctx, envelope, cancel),
    }
}

// ---------------------------------------------------------------------
// Shared tool-call dispatch
// ---------------------------------------------------------------------

/// One dispatched call's outcome, independent of how it was dispatched
/// (sanitizer-blocked vs. actually invoked).
#[derive(Debug, Clone)]
struct DispatchedCall {
    call_id: String,
    tool: String,
    args_digest: String,
    status: ToolResultStatus,
    result_value: serde_json::Value,
    text: Option<String>,
    binary: Option<(String, String)>,
    /// Set only by [`DispatchedCall::blocked`]. A sanitizer block is a
    /// policy decision, not a tool failure, so it must never feed
    /// [`ToolFailureTracker`] — that escalation path is reserved for actual
    /// dispatch failures (§4.5/§7 keep the two counters distinct).
    blocked: bool,
}

impl DispatchedCall {
    fn blocked(call: ToolCallRequest, reason: String) -> Self {
        let args_digest = digest(&call.arguments);
        Self {
            call_id: call.call_id,
            tool: call.tool,
            args_digest,
            status: ToolResultStatus::Error,
            result_value: serde_json::json!({ "blocked": reason }),
            text: None,
            binary: None,
            blocked: true,
        }
    }

    fn tool_error(call: ToolCallRequest, message: String) -> Self {
        let args_digest = digest(&call.arguments);
        Self {
            call_id: call.call_id,
            tool: call.tool,
            args_digest,
            status: ToolResultStatus::Error,
            result_value: serde_json::json!({ "error": message }),
            text: None,
            binary: None,
            blocked: false,
        }
    }

    fn from_result(call: ToolCallRequest, result: arawn_mcp::CallToolResult) -> Self {
        let args_digest = digest(&call.arguments);
        let text = result.text();
        let binary = result
            .binary_blob()
            .map(|(mime, data)| (mime.to_string(), data.to_string()));
        let status = if result.is_error() {
            ToolResultStatus::Error
        } else {
            ToolResultStatus::Ok
        };
        let result_value = text
            .clone()
            .map(|t| serde_json::json!({ "text": t }))
            .unwrap_or(serde_json::Value::Null);
        Self {
            call_id: call.call_id,
            tool: call.tool,
            args_digest,
            status,
            result_value,
            text,
            binary,
            blocked: false,
        }
    }

    fn result_event(&self) -> Event {
        Event::ToolResult {
            call_id: self.call_id.clone(),
            status: self.status,
            result_digest: digest(&self.result_value),
        }
    }

    fn tool_call_digest(&self) -> ToolCallDigest {
        ToolCallDigest {
            tool: self.tool.clone(),
            args_digest: self.args_digest.clone(),
            result_digest: digest(&self.result_value),
        }
    }
}

/// Tracks successive dispatch failures of the same tool name within one
/// turn, escalating to `Event.Failed{kind=ToolError}` at the threshold (§7).
#[derive(Debug, Default)]
struct ToolFailureTracker {
    streaks: HashMap<String, u32>,
}

impl ToolFailureTracker {
    fn new() -> Self {
        Self::default()
    }

    /// Record one call's outcome for `tool`, returning whether the streak
    /// just reached [`TOOL_ERROR_THRESHOLD`].
    fn record(&mut self, tool: &str, succeeded: bool) -> bool {
        if succeeded {
            self.streaks.remove(tool);
            false
        } else {
            let count = self.streaks.entry(tool.to_string()).or_insert(0);
            *count += 1;
            *count >= TOOL_ERROR_THRESHOLD
        }
    }
}

/// Dispatch one planning step's tool calls, honoring the sanitizer and the
/// [`MAX_PARALLEL_TOOL_CALLS`] concurrency cap. Ordering of the returned
/// events matches `calls`' original order: `buffered` preserves input order
/// while still running up to the cap concurrently, so callers get a stable
/// call-index correlation without extra bookkeeping.
///
/// Returns `Err` only for failures fatal to the whole request (pool
/// exhaustion, pool mis-configuration); a single tool invocation failing is
/// folded into its `DispatchedCall` instead, so the model can see the error
/// and try something else.
async fn dispatch_calls(
    ctx: &OrchestratorContext,
    mode: Mode,
    calls: Vec<ToolCallRequest>,
    cancel: &CancellationToken,
    blocks: &mut BlockTracker,
) -> Result<(Vec<Event>, Vec<DispatchedCall>, Option<FailureKind>)> {
    let mut invoked = Vec::with_capacity(calls.len());
    let mut steps: Vec<futures::future::BoxFuture<'_, Result<DispatchedCall>>> =
        Vec::with_capacity(calls.len());
    let mut escalate = None;

    for call in calls {
        invoked.push(Event::ToolInvoked {
            call_id: call.call_id.clone(),
            tool: call.tool.clone(),
            args_digest: digest(&call.arguments),
        });

        match sanitizer::check(&call, mode, &ctx.servers) {
            Err(blocked) => {
                if blocks.record_block() {
                    escalate = Some(FailureKind::PolicyViolation);
                }
                let dc: Result<DispatchedCall> = Ok(DispatchedCall::blocked(call, blocked.reason));
                steps.push(Box::pin(async move { dc }));
            }
            Ok(()) => {
                blocks.record_success();
                let server = call
                    .resolve_server(&ctx.servers)
                    .expect("sanitizer::check already resolved a server")
                    .clone();
                let cancel = cancel.clone();
                steps.push(Box::pin(execute_tool_call(ctx, call, server, cancel)));
            }
        }
    }

    let outcomes: Vec<Result<DispatchedCall>> = futures::stream::iter(steps)
        .buffered(MAX_PARALLEL_TOOL_CALLS)
        .collect()
        .await;

    let mut events = invoked;
    let mut results = Vec::with_capacity(outcomes.len());
    for outcome in outcomes {
        let dispatched = outcome?;
        events.push(dispatched.result_event());
        results.push(dispatched);
    }

    Ok((events, results, escalate))
}

/// Acquire a pooled client for `server` and invoke `call`, releasing the
/// client Healthy or Broken as appropriate. Acquire failures that indicate
/// the pool is actually exhausted propagate as fatal; every other failure
/// (a broken transport, a tool-level error, a timeout) is folded into a
/// [`DispatchedCall`] so the request can continue.
async fn execute_tool_call(
    ctx: &OrchestratorContext,
    call: ToolCallRequest,
    server: ServerConfig,
    cancel: CancellationToken,
) -> Result<DispatchedCall> {
    let pool = ctx.pools.get_or_create(server.to_mcp_config()).await?;

    let pooled = match pool.acquire(ctx.pool_acquire_deadline).await {
        Ok(pooled) => pooled,
        Err(e) => {
            let err = OrchestratorError::from(e);
            if err.failure_kind() == FailureKind::PoolExhausted {
                return Err(err);
            }
            return Ok(DispatchedCall::tool_error(call, err.to_string()));
        }
    };

    let outcome = tokio::time::timeout(
        ctx.tool_call_timeout,
        pooled
            .client()
            .call_tool_cancellable(&call.tool, Some(call.arguments.clone()), cancel),
    )
    .await;

    match outcome {
        Ok(Ok(result)) => {
            pool.release(pooled, PoolOutcome::Healthy).await;
            Ok(DispatchedCall::from_result(call, result))
        }
        Ok(Err(e)) => {
            pool.release(pooled, PoolOutcome::Broken).await;
            Ok(DispatchedCall::tool_error(call, e.to_string()))
        }
        Err(_) => {
            pool.release(pooled, PoolOutcome::Broken).await;
            Ok(DispatchedCall::tool_error(
                call,
                format!("tool call timed out after {:?}", ctx.tool_call_timeout),
            ))
        }
    }
}

/// Which servers a mode may draw tools from, mirroring
/// [`sanitizer::mode_permits_prefix`]'s Brainstorm-restricted-to-docs rule.
fn relevant_servers(mode: Mode, servers: &[ServerConfig]) -> Vec<&ServerConfig> {
    servers
        .iter()
        .filter(|s| match mode {
            Mode::Brainstorm => s.key().contains("docs"),
            Mode::Analyze | Mode::Generate => true,
        })
        .collect()
}

/// List the tools a mode may offer the oracle, drawn from every relevant
/// server and filtered to each server's configured allow-prefixes. A server
/// that fails to answer `list_tools` is skipped (logged), not fatal: the
/// model simply won't see that server's tools this turn.
async fn list_allowed_tools(ctx: &OrchestratorContext, mode: Mode) -> Vec<ToolDefinition> {
    let mut tools = Vec::new();
    for server in relevant_servers(mode, &ctx.servers) {
        match list_server_tools(ctx, server).await {
            Ok(defs) => tools.extend(defs),
            Err(e) => warn!(server = %server.key(), error = %e, "failed to list tools for server"),
        }
    }
    tools
}

async fn list_server_tools(ctx: &OrchestratorContext, server: &ServerConfig) -> Result<Vec<ToolDefinition>> {
    if let Some(cached) = ctx.tool_cache.read().await.get(server.key()) {
        return Ok(cached.clone());
    }

    let pool = ctx.pools.get_or_create(server.to_mcp_config()).await?;
    let pooled = pool.acquire(ctx.pool_acquire_deadline).await?;

    let tools = match pooled.client().list_tools().await {
        Ok(listed) => {
            pool.release(pooled, PoolOutcome::Healthy).await;
            listed
                .into_iter()
                .filter(|t| server.allow_prefixes.iter().any(|p| t.name.starts_with(p)))
                .map(|t| {
                    ToolDefinition::new(
                        t.name,
                        t.description.unwrap_or_default(),
                        t.input_schema.unwrap_or(serde_json::json!({})),
                    )
                })
                .collect::<Vec<_>>()
        }
        Err(e) => {
            pool.release(pooled, PoolOutcome::Broken).await;
            return Err(e.into());
        }
    };

    ctx.tool_cache
        .write()
        .await
        .insert(server.key().to_string(), tools.clone());
    Ok(tools)
}

// ---------------------------------------------------------------------
// The research loop shared by all three modes: repeatedly plan, dispatch
// any requested tool calls, feed the results back, until the model settles
// on a final textual answer.
// ---------------------------------------------------------------------

struct ResearchOutcome {
    events: Vec<Event>,
    final_text: String,
    tool_digests: Vec<ToolCallDigest>,
    citation_candidates: Vec<String>,
    diagram_artifact: Option<(ArtifactKind, ArtifactPayload)>,
}

/// Drive `ctx.oracle` against `working` until it returns a turn with no
/// further tool calls, dispatching any tool calls it does request along the
/// way. `working` accumulates a running summary of each tool result so the
/// next planning step can see it; this scratch buffer is never committed to
/// the session directly, only its outcome is.
///
/// On error, returns the events accumulated before the failure alongside it,
/// so the caller can still emit whatever partial progress happened.
async fn run_research_loop(
    ctx: &OrchestratorContext,
    mode: Mode,
    system_prompt: &str,
    working: &mut ContextBuffer,
    allowed_tools: &[ToolDefinition],
    cancel: &CancellationToken,
) -> std::result::Result<ResearchOutcome, (Vec<Event>, OrchestratorError)> {
    let mut events = Vec::new();
    let mut tool_digests = Vec::new();
    let mut citation_candidates = Vec::new();
    let mut diagram_artifact = None;
    let mut failures = ToolFailureTracker::new();
    let mut blocks = BlockTracker::new();

    for _ in 0..MAX_PLANNING_STEPS {
        let turn = match ctx.oracle.plan(system_prompt, working, allowed_tools, cancel).await {
            Ok(turn) => turn,
            Err(e) => return Err((events, e)),
        };

        let calls = turn.tool_calls().to_vec();
        if calls.is_empty() {
            return Ok(ResearchOutcome {
                events,
                final_text: turn.text().unwrap_or_default().to_string(),
                tool_digests,
                citation_candidates,
                diagram_artifact,
            });
        }

        let (batch_events, results, escalate) =
            match dispatch_calls(ctx, mode, calls, cancel, &mut blocks).await {
                Ok(v) => v,
                Err(e) => return Err((events, e)),
            };
        events.extend(batch_events);

        if let Some(kind) = escalate {
            return Err((
                events,
                match kind {
                    FailureKind::PolicyViolation => {
                        OrchestratorError::policy_violation("three consecutive blocked tool calls")
                    }
                    _ => OrchestratorError::internal("tool dispatch escalation"),
                },
            ));
        }

        for result in &results {
            if result.blocked {
                continue;
            }

            if failures.record(&result.tool, result.status == ToolResultStatus::Ok) {
                return Err((
                    events,
                    OrchestratorError::tool_error(format!(
                        "tool '{}' failed {TOOL_ERROR_THRESHOLD} times in a row",
                        result.tool
                    )),
                ));
            }

            if let Some((mime, data)) = &result.binary {
                if let Some(bytes) = decode_base64(data) {
                    diagram_artifact = Some((ArtifactKind::Diagram, ArtifactPayload::Bytes(bytes)));
                }
                let _ = mime;
            } else if result.tool.contains("diagram") {
                if let Some(text) = &result.text {
                    diagram_artifact = Some((ArtifactKind::Diagram, ArtifactPayload::Text(text.clone())));
                }
            }

            citation_candidates.extend(extract_urls(result.text.as_deref().unwrap_or_default()));
            tool_digests.push(result.tool_call_digest());
            working.push(SessionTurn::agent(format!(
                "[{}] {}",
                result.tool,
                result.text.clone().unwrap_or_default()
            )));
        }
    }

    Err((events, OrchestratorError::internal("exceeded maximum planning steps")))
}

fn decode_base64(data: &str) -> Option<Vec<u8>> {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.decode(data).ok()
}

fn extract_urls(text: &str) -> Vec<String> {
    text.split_whitespace()
        .filter(|tok| tok.starts_with("http://") || tok.starts_with("https://"))
        .map(|tok| {
            tok.trim_matches(|c: char| {
                !c.is_ascii_alphanumeric() && !matches!(c, '/' | ':' | '.' | '-' | '_' | '?' | '=' | '&')
            })
            .to_string()
        })
        .collect()
}

const FOLLOW_UPS_MARKER: &str = "Follow-ups:";

fn extract_follow_ups(text: &str) -> Vec<String> {
    let Some(idx) = text.find(FOLLOW_UPS_MARKER) else {
        return Vec::new();
    };
    text[idx + FOLLOW_UPS_MARKER.len()..]
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| line.trim_start_matches(['-', '*', ' ']).to_string())
        .take(3)
        .collect()
}

// ---------------------------------------------------------------------
// Brainstorm
// ---------------------------------------------------------------------

fn run_brainstorm(
    ctx: Arc<OrchestratorContext>,
    envelope: RequestEnvelope,
    cancel: CancellationToken,
) -> EventStream {
    Box::pin(async_stream::stream! {
        if envelope.input.trim().is_empty() {
            yield Event::failed(FailureKind::Internal, "empty user input");
            return;
        }

        let deadline_at = Instant::now() + DEFAULT_BRAINSTORM_DEADLINE;
        let session_id = envelope.session_id.clone().unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let session = ctx.sessions.get_or_create(&session_id).await;

        let mut working = {
            let mut guard = session.lock().await;
            guard.touch();
            guard.buffer.push(SessionTurn::user(envelope.input.clone()));
            guard.buffer.clone()
        };

        yield Event::thinking("researching", "searching documentation");
        let allowed_tools = list_allowed_tools(&ctx, Mode::Brainstorm).await;

        let outcome = tokio::select! {
            result = run_research_loop(&ctx, Mode::Brainstorm, BRAINSTORM_SYSTEM_PROMPT, &mut working, &allowed_tools, &cancel) => result,
            _ = tokio::time::sleep_until(deadline_at) => {
                yield Event::failed(FailureKind::Timeout, "brainstorm deadline exceeded");
                return;
            }
        };

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err((events, e)) => {
                for event in events {
                    yield event;
                }
                yield Event::failed(e.failure_kind(), e.to_string());
                return;
            }
        };
        for event in outcome.events {
            yield event;
        }

        yield Event::thinking("answering", "composing answer");
        let citations: Vec<String> = outcome
            .citation_candidates
            .into_iter()
            .filter(|url| outcome.final_text.contains(url.as_str()))
            .collect();
        let follow_ups = extract_follow_ups(&outcome.final_text);

        {
            let mut guard = session.lock().await;
            guard.touch();
            guard.buffer.push(
                SessionTurn::agent(outcome.final_text.clone())
                    .with_tool_calls(outcome.tool_digests)
                    .with_citations(citations.clone()),
            );
            guard.mode = Some(Mode::Brainstorm);
        }

        yield Event::Complete {
            payload: serde_json::json!({
                "answer": outcome.final_text,
                "citations": citations,
                "follow_ups": follow_ups,
            }),
        };
    })
}

// ---------------------------------------------------------------------
// Analyze
// ---------------------------------------------------------------------

fn parse_structuring_output(text: &str) -> std::result::Result<serde_json::Value, String> {
    let value: serde_json::Value =
        serde_json::from_str(text.trim()).map_err(|e| format!("structuring output was not valid JSON: {e}"))?;
    for field in ["executive_summary", "service_recommendations", "architecture_sections", "cost_insights"] {
        if value.get(field).is_none() {
            return Err(format!("structuring output missing required field '{field}'"));
        }
    }
    Ok(value)
}

fn run_analyze(
    ctx: Arc<OrchestratorContext>,
    envelope: RequestEnvelope,
    cancel: CancellationToken,
) -> EventStream {
    Box::pin(async_stream::stream! {
        if envelope.input.trim().is_empty() {
            yield Event::failed(FailureKind::Internal, "empty user input");
            return;
        }

        let deadline_at = Instant::now() + DEFAULT_ANALYZE_DEADLINE;
        let session_id = envelope.session_id.clone().unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let session = ctx.sessions.get_or_create(&session_id).await;

        let mut working = {
            let mut guard = session.lock().await;
            guard.touch();
            guard.buffer.push(SessionTurn::user(envelope.input.clone()));
            guard.buffer.clone()
        };
        if let Some(constraints) = &envelope.constraints {
            working.push(SessionTurn::system(format!("Constraints: {constraints}")));
        }

        yield Event::thinking("researching", "gathering service documentation");
        let allowed_tools = list_allowed_tools(&ctx, Mode::Analyze).await;

        let research = tokio::select! {
            result = run_research_loop(&ctx, Mode::Analyze, ANALYZE_RESEARCH_SYSTEM_PROMPT, &mut working, &allowed_tools, &cancel) => result,
            _ = tokio::time::sleep_until(deadline_at) => {
                yield Event::failed(FailureKind::Timeout, "analyze deadline exceeded");
                return;
            }
        };
        let research = match research {
            Ok(outcome) => outcome,
            Err((events, e)) => {
                for event in events {
                    yield event;
                }
                yield Event::failed(e.failure_kind(), e.to_string());
                return;
            }
        };
        for event in research.events.clone() {
            yield event;
        }

        yield Event::thinking("structuring", "producing structured analysis");
        working.push(SessionTurn::agent(research.final_text.clone()));

        let structure_turn = tokio::select! {
            result = ctx.oracle.plan(ANALYZE_STRUCTURING_SYSTEM_PROMPT, &working, &[], &cancel) => result,
            _ = tokio::time::sleep_until(deadline_at) => {
                yield Event::failed(FailureKind::Timeout, "analyze deadline exceeded");
                return;
            }
        };
        let structure_turn = match structure_turn {
            Ok(turn) => turn,
            Err(e) => {
                yield Event::failed(e.failure_kind(), e.to_string());
                return;
            }
        };

        let structured = match parse_structuring_output(structure_turn.text().unwrap_or_default()) {
            Ok(value) => value,
            Err(message) => {
                yield Event::failed(FailureKind::Internal, message);
                return;
            }
        };

        yield Event::thinking("diagramming", "rendering architecture diagram");
        if let Some((kind, payload)) = research.diagram_artifact.clone() {
            yield Event::artifact(kind, payload);
        }

        yield Event::thinking("costing", "estimating monthly cost");
        let cost_insights = structured.get("cost_insights").cloned().unwrap_or(serde_json::Value::Null);

        {
            let mut guard = session.lock().await;
            guard.touch();
            guard.buffer.push(
                SessionTurn::agent(research.final_text.clone()).with_tool_calls(research.tool_digests.clone()),
            );
            guard.side_state = SideState::Analysis(structured.clone());
            guard.mode = Some(Mode::Analyze);
        }

        yield Event::Complete {
            payload: serde_json::json!({
                "executive_summary": structured.get("executive_summary").cloned().unwrap_or(serde_json::Value::Null),
                "service_recommendations": structured.get("service_recommendations").cloned().unwrap_or(serde_json::json!([])),
                "architecture_sections": structured.get("architecture_sections").cloned().unwrap_or(serde_json::Value::Null),
                "cost_insights": cost_insights,
            }),
        };
    })
}

// ---------------------------------------------------------------------
// Generate
// ---------------------------------------------------------------------

struct TemplateSummary {
    resources: Vec<String>,
    parameters: Vec<String>,
    outputs: Vec<String>,
    deploy_command_hint: String,
}

/// Heuristic extraction of a CloudFormation template's top-level section
/// keys, without pulling in a YAML parser just to summarize three sections.
fn extract_yaml_section_keys(template: &str, header: &str) -> Vec<String> {
    let Some(start) = template.find(header) else {
        return Vec::new();
    };
    template[start + header.len()..]
        .lines()
        .take_while(|line| line.is_empty() || line.starts_with(' '))
        .filter(|line| line.len() - line.trim_start().len() == 2)
        .filter_map(|line| line.trim().trim_end_matches(':').split(':').next().map(str::to_string))
        .collect()
}

fn summarize_template(template: &str) -> TemplateSummary {
    TemplateSummary {
        resources: extract_yaml_section_keys(template, "Resources:"),
        parameters: extract_yaml_section_keys(template, "Parameters:"),
        outputs: extract_yaml_section_keys(template, "Outputs:"),
        deploy_command_hint: "aws cloudformation deploy --template-file template.yaml --stack-name <stack>".to_string(),
    }
}

fn run_generate(
    ctx: Arc<OrchestratorContext>,
    envelope: RequestEnvelope,
    cancel: CancellationToken,
) -> EventStream {
    Box::pin(async_stream::stream! {
        if envelope.input.trim().is_empty() {
            yield Event::failed(FailureKind::Internal, "empty user input");
            return;
        }

        let deadline_at = Instant::now() + DEFAULT_GENERATE_DEADLINE;
        let session_id = envelope.session_id.clone().unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let session = ctx.sessions.get_or_create(&session_id).await;

        let (mut working, prior_template) = {
            let mut guard = session.lock().await;
            guard.touch();
            guard.buffer.push(SessionTurn::user(envelope.input.clone()));
            let prior = match &guard.side_state {
                SideState::Template(template) => Some(template.clone()),
                _ => None,
            };
            (guard.buffer.clone(), prior)
        };

        // Revision requests carry the prior template forward verbatim,
        // whichever of the envelope or the session side-state supplied it.
        if let Some(template) = envelope.existing_template.clone().or(prior_template) {
            working.push(SessionTurn::system(format!(
                "Prior template (revise, do not discard unless asked):\n{template}"
            )));
        }

        yield Event::thinking("planning", "planning required resources");
        let allowed_tools = list_allowed_tools(&ctx, Mode::Generate).await;

        let plan_outcome = tokio::select! {
            result = run_research_loop(&ctx, Mode::Generate, GENERATE_PLANNING_SYSTEM_PROMPT, &mut working, &allowed_tools, &cancel) => result,
            _ = tokio::time::sleep_until(deadline_at) => {
                yield Event::failed(FailureKind::Timeout, "generate deadline exceeded");
                return;
            }
        };
        let plan_outcome = match plan_outcome {
            Ok(outcome) => outcome,
            Err((events, e)) => {
                for event in events {
                    yield event;
                }
                yield Event::failed(e.failure_kind(), e.to_string());
                return;
            }
        };
        for event in plan_outcome.events.clone() {
            yield event;
        }

        yield Event::thinking("generating", "generating infrastructure-as-code template");
        working.push(SessionTurn::agent(plan_outcome.final_text.clone()));

        let generate_turn = tokio::select! {
            result = ctx.oracle.plan(GENERATE_TEMPLATE_SYSTEM_PROMPT, &working, &[], &cancel) => result,
            _ = tokio::time::sleep_until(deadline_at) => {
                yield Event::failed(FailureKind::Timeout, "generate deadline exceeded");
                return;
            }
        };
        let template_text = match generate_turn {
            Ok(turn) => turn.text().unwrap_or_default().to_string(),
            Err(e) => {
                yield Event::failed(e.failure_kind(), e.to_string());
                return;
            }
        };

        yield Event::thinking("validating", "validating generated template");
        let summary = summarize_template(&template_text);
        if template_text.trim().is_empty() || summary.resources.is_empty() {
            yield Event::failed(FailureKind::Internal, "generated template has no resources");
            return;
        }

        if let Some((kind, payload)) = plan_outcome.diagram_artifact.clone() {
            yield Event::artifact(kind, payload);
        }

        {
            let mut guard = session.lock().await;
            guard.touch();
            guard.buffer.push(
                SessionTurn::agent(plan_outcome.final_text.clone()).with_tool_calls(plan_outcome.tool_digests.clone()),
            );
            guard.side_state = SideState::Template(template_text.clone());
            guard.mode = Some(Mode::Generate);
        }

        yield Event::Complete {
            payload: serde_json::json!({
                "template": template_text,
                "resources": summary.resources,
                "parameters": summary.parameters,
                "outputs": summary.outputs,
                "deploy_command_hint": summary.deploy_command_hint,
            }),
        };
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{McpServerConfigDef, TransportKind};

    fn docs_server() -> ServerConfig {
        ServerConfig {
            mcp: McpServerConfigDef {
                key: "docs".to_string(),
                transport: TransportKind::Stdio,
                command_or_url: "mcp-server-docs".to_string(),
                args: vec![],
                env: vec![],
            },
            allow_prefixes: vec!["awsdocs_".to_string()],
            deny_substrings: vec![],
        }
    }

    fn cfn_server() -> ServerConfig {
        ServerConfig {
            mcp: McpServerConfigDef {
                key: "cfn".to_string(),
                transport: TransportKind::Stdio,
                command_or_url: "mcp-server-cfn".to_string(),
                args: vec![],
                env: vec![],
            },
            allow_prefixes: vec!["cfn_".to_string()],
            deny_substrings: vec![],
        }
    }

    #[test]
    fn test_relevant_servers_restricts_brainstorm_to_docs() {
        let servers = vec![docs_server(), cfn_server()];
        let relevant = relevant_servers(Mode::Brainstorm, &servers);
        assert_eq!(relevant.len(), 1);
        assert_eq!(relevant[0].key(), "docs");
    }

    #[test]
    fn test_relevant_servers_analyze_sees_all() {
        let servers = vec![docs_server(), cfn_server()];
        assert_eq!(relevant_servers(Mode::Analyze, &servers).len(), 2);
    }

    #[test]
    fn test_extract_urls_finds_http_tokens_only() {
        let text = "See https://docs.aws.amazon.com/s3/ and also plain text.";
        let urls = extract_urls(text);
        assert_eq!(urls, vec!["https://docs.aws.amazon.com/s3/".to_string()]);
    }

    #[test]
    fn test_extract_follow_ups_parses_marker_section() {
        let text = "Some answer.\n\nFollow-ups:\n- What about cost?\n- What about latency?\n";
        let follow_ups = extract_follow_ups(text);
        assert_eq!(follow_ups, vec!["What about cost?", "What about latency?"]);
    }

    #[test]
    fn test_extract_follow_ups_empty_without_marker() {
        assert!(extract_follow_ups("just an answer").is_empty());
    }

    #[test]
    fn test_parse_structuring_output_accepts_complete_json() {
        let json = r#"{"executive_summary":"x","service_recommendations":[],"architecture_sections":{},"cost_insights":{}}"#;
        assert!(parse_structuring_output(json).is_ok());
    }

    #[test]
    fn test_parse_structuring_output_rejects_missing_field() {
        let json = r#"{"executive_summary":"x"}"#;
        assert!(parse_structuring_output(json).is_err());
    }

    #[test]
    fn test_summarize_template_extracts_top_level_keys() {
        let template = "Resources:\n  Bucket:\n    Type: AWS::S3::Bucket\n  Queue:\n    Type: AWS::SQS::Queue\nOutputs:\n  BucketName:\n    Value: !Ref Bucket\n";
        let summary = summarize_template(template);
        assert_eq!(summary.resources, vec!["Bucket", "Queue"]);
        assert_eq!(summary.outputs, vec!["BucketName"]);
        assert!(summary.parameters.is_empty());
    }

    #[test]
    fn test_tool_failure_tracker_escalates_after_three_same_tool() {
        let mut tracker = ToolFailureTracker::new();
        assert!(!tracker.record("docs_search", false));
        assert!(!tracker.record("docs_search", false));
        assert!(tracker.record("docs_search", false));
    }

    #[test]
    fn test_tool_failure_tracker_resets_on_success() {
        let mut tracker = ToolFailureTracker::new();
        tracker.record("docs_search", false);
        tracker.record("docs_search", true);
        assert!(!tracker.record("docs_search", false));
    }

    #[test]
    fn test_tool_failure_tracker_is_per_tool() {
        let mut tracker = ToolFailureTracker::new();
        tracker.record("docs_search", false);
        tracker.record("docs_search", false);
        assert!(!tracker.record("cfn_generate_template", false));
    }

    #[tokio::test]
    async fn test_brainstorm_end_to_end_with_mock_oracle_and_no_servers() {
        use crate::oracle::MockOracle;
        use arawn_session::SessionConfig;

        let oracle = Arc::new(MockOracle::with_text(
            "S3 is a good fit.\n\nFollow-ups:\n- What about durability?\n- What about cost?",
        ));
        let sessions = Arc::new(SessionStore::new(SessionConfig::new().with_sweep(false)));
        let pools = Arc::new(PoolManager::default());
        let ctx = Arc::new(OrchestratorContext::new(sessions, pools, oracle, vec![]));

        let envelope = RequestEnvelope {
            session_id: Some("s1".to_string()),
            mode: Mode::Brainstorm,
            input: "What should I use for object storage?".to_string(),
            existing_template: None,
            constraints: None,
        };

        let mut stream = handle_request(ctx.clone(), envelope, CancellationToken::new());
        let mut last = None;
        while let Some(event) = stream.next().await {
            last = Some(event);
        }

        match last.expect("stream produced no events") {
            Event::Complete { payload } => {
                assert_eq!(payload["follow_ups"].as_array().unwrap().len(), 2);
            }
            other => panic!("expected Complete, got {other:?}"),
        }

        let session = ctx.sessions.get("s1").await.unwrap();
        assert_eq!(session.lock().await.buffer.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_input_is_internal_failure_without_touching_session() {
        use crate::oracle::MockOracle;
        use arawn_session::SessionConfig;

        let oracle = Arc::new(MockOracle::with_text("unused"));
        let sessions = Arc::new(SessionStore::new(SessionConfig::new().with_sweep(false)));
        let pools = Arc::new(PoolManager::default());
        let ctx = Arc::new(OrchestratorContext::new(sessions, pools, oracle, vec![]));

        let envelope = RequestEnvelope {
            session_id: Some("s2".to_string()),
            mode: Mode::Brainstorm,
            input: "   ".to_string(),
            existing_template: None,
            constraints: None,
        };

        let mut stream = handle_request(ctx.clone(), envelope, CancellationToken::new());
        let event = stream.next().await.unwrap();
        assert!(matches!(event, Event::Failed { kind: FailureKind::Internal, .. }));
        assert!(stream.next().await.is_none());
        assert!(ctx.sessions.get("s2").await.is_err());
    }
}
