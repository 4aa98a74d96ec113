//! Orchestrator / Runtime Loop (spec §4.11): the per-session state
//! machine that composes history, invokes the LLM, dispatches tool
//! calls through hooks and capability policy, and emits trace entries.
//!
//! Generalizes the teacher's `AgentRuntime::run_turn_cancellable` —
//! assemble context, stream a completion, accumulate tool calls,
//! execute them, loop — from its single flat `Vec<LlmMessage>` session
//! and direct `ToolRegistry::execute_cancellable` call onto the
//! branching session model, hook-gated dispatch, and retry/compaction
//! ordering the expanded runtime needs. `CancellationToken`-driven
//! preemption is unchanged; the teacher's `AgentEvent` channel is
//! replaced by [`crate::trace::TraceFabric`] since every consumer here
//! (UIs, the bridge) reads trace events rather than a live stream.

use crate::session::SessionManager;
use crate::trace::TraceFabric;
use crate::transform::{self, BranchStatus};
use loom_core::error::{ErrorCode, LoomError, Result, TerminalStatus};
use loom_core::types::{EntryId, EntryRole, InvocationEnvelope, Lease, SessionKey, SessionStatus, ToolCallMeta, ToolResultMeta, TraceKind, VerifyPolicy};
use loom_hooks::HookRunner;
use loom_llm::types::LlmRequest;
use loom_llm::{LlmError, LlmProviderRegistry, ProfileResolver};
use loom_tools::{ToolContractRegistry, ToolProvider, ToolProviderRegistry};
use std::collections::VecDeque;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub struct OrchestratorConfig {
    /// Per-turn LLM role resolved through the `ProfileResolver`.
    pub role: String,
    /// Hard ceiling on turns within one `start`/`resume` before `max_steps`.
    pub max_steps: usize,
    /// How many times an overflowing request is retried before compaction runs.
    pub overflow_retry_cap: u32,
    /// How many retryable tool failures the retry circuit tolerates before `failed_execute`.
    pub tool_retry_cap: u32,
    /// Consecutive repeats of the same action fingerprint before `loop.no_progress` fires.
    pub no_progress_threshold: usize,
    /// How long a lease acquired through [`Orchestrator::acquire_lease`] stays valid.
    pub lease_ttl_secs: i64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self { role: "default".into(), max_steps: 64, overflow_retry_cap: 2, tool_retry_cap: 3, no_progress_threshold: 3, lease_ttl_secs: 60 }
    }
}

enum StepOutcome {
    Continue,
    Terminal(TerminalStatus),
}

/// Owns everything a running session needs: the session/entry store,
/// tool routing, hooks, the LLM layer, and the trace fabric. One
/// instance serves every session in the process (spec §5: share the
/// provider registries, hook runner, and event bus across sessions).
pub struct Orchestrator {
    sessions: Arc<SessionManager>,
    contracts: Arc<ToolContractRegistry>,
    providers: Arc<ToolProviderRegistry>,
    hooks: Arc<HookRunner>,
    llm_providers: Arc<LlmProviderRegistry>,
    profiles: Arc<ProfileResolver>,
    trace: Arc<TraceFabric>,
    config: OrchestratorConfig,
    cancellations: dashmap::DashMap<SessionKey, CancellationToken>,
    no_progress: dashmap::DashMap<SessionKey, VecDeque<String>>,
    retry_counts: dashmap::DashMap<SessionKey, u32>,
    /// Generic lease table for `requires_lease` capabilities (spec §3,
    /// §4.6), keyed by the call's lease target (a `tab_id`, `path`, or
    /// other identifier the capability scopes exclusivity to). This is
    /// a session-level gate in front of whatever a provider enforces
    /// internally — e.g. the browser engine's own per-tab lease check —
    /// so a capability that forgets to enforce its own lease still
    /// can't run without one.
    leases: dashmap::DashMap<String, Lease>,
}

impl Orchestrator {
    pub fn new(
        sessions: Arc<SessionManager>,
        contracts: Arc<ToolContractRegistry>,
        providers: Arc<ToolProviderRegistry>,
        hooks: Arc<HookRunner>,
        llm_providers: Arc<LlmProviderRegistry>,
        profiles: Arc<ProfileResolver>,
        trace: Arc<TraceFabric>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            sessions,
            contracts,
            providers,
            hooks,
            llm_providers,
            profiles,
            trace,
            config,
            cancellations: dashmap::DashMap::new(),
            no_progress: dashmap::DashMap::new(),
            retry_counts: dashmap::DashMap::new(),
            leases: dashmap::DashMap::new(),
        }
    }

    /// Acquire or renew a lease on `target` for `session`. Fails
    /// `E_LEASE` if another session already holds an unexpired lease
    /// on the same target (spec §3: Lease, §4.8).
    pub fn acquire_lease(&self, target: &str, session: &SessionKey) -> Result<()> {
        let now = chrono::Utc::now();
        if let Some(existing) = self.leases.get(target) {
            if !existing.is_valid_for(session.as_str(), now) && existing.expiry > now {
                return Err(LoomError::coded(ErrorCode::ELease, format!("lease on '{}' is held by another session", target)));
            }
        }
        self.leases.insert(
            target.to_string(),
            Lease { tab_id: target.to_string(), owner_id: session.as_str().to_string(), session_id: session.clone(), expiry: now + chrono::Duration::seconds(self.config.lease_ttl_secs) },
        );
        Ok(())
    }

    /// Release a lease held by `session`. A no-op if `session` doesn't
    /// hold it.
    pub fn release_lease(&self, target: &str, session: &SessionKey) {
        let holds = self.leases.get(target).map(|l| l.owner_id == session.as_str()).unwrap_or(false);
        if holds {
            self.leases.remove(target);
        }
    }

    /// The generic gate for `requires_lease` capabilities (spec §4.6:
    /// "if requires lease, caller must hold lease"). A capability with
    /// no lease target in its arguments can never satisfy this.
    fn ensure_lease_held(&self, target: Option<&str>, session: &SessionKey) -> Result<()> {
        let target = target.ok_or_else(|| LoomError::coded(ErrorCode::EArgs, "capability requires a lease but the call carries no lease target"))?;
        let now = chrono::Utc::now();
        match self.leases.get(target) {
            Some(lease) if lease.is_valid_for(session.as_str(), now) => Ok(()),
            _ => Err(LoomError::coded(ErrorCode::ELease, format!("no active lease held for '{}'", target))),
        }
    }

    /// `brain.run.start`: append the user entry and run the loop to a
    /// terminal status. Idle → Running per spec §4.11.
    pub async fn start(&self, session: &SessionKey, user_message: &str) -> Result<TerminalStatus> {
        self.sessions.append_entry(session, EntryRole::User, user_message, vec![], None).await?;
        self.trace.emit(session, TraceKind::InputUser, serde_json::json!({ "content": user_message }));
        self.sessions.set_status(session, SessionStatus::Running).await?;
        self.run_loop(session, BranchStatus::Compacted).await
    }

    /// `brain.run.resume`: re-enter the loop on a session left
    /// mid-flight (e.g. after a process restart) without appending a
    /// new user entry. History is built with `BranchStatus::Abandoned`
    /// so any assistant entry with unresolved tool_calls gets synthetic
    /// aborted results rather than silently dropped declarations.
    pub async fn resume(&self, session: &SessionKey) -> Result<TerminalStatus> {
        self.sessions.set_status(session, SessionStatus::Running).await?;
        self.run_loop(session, BranchStatus::Abandoned).await
    }

    /// `brain.run.pause`: cancel the in-flight suspension point and
    /// mark the session Paused. The loop's cancellation check (see
    /// [`Self::run_loop`]) observes this on its next suspension point.
    pub async fn pause(&self, session: &SessionKey) -> Result<()> {
        if let Some(token) = self.cancellations.get(session) {
            token.cancel();
        }
        self.sessions.set_status(session, SessionStatus::Paused).await
    }

    /// `brain.run.stop`: same cancellation, terminal Stopped status.
    pub async fn stop(&self, session: &SessionKey) -> Result<()> {
        if let Some(token) = self.cancellations.get(session) {
            token.cancel();
        }
        self.sessions.set_status(session, SessionStatus::Stopped).await
    }

    /// `brain.run.regenerate`: replay from `target_entry`. Same-session
    /// new leaf if it's the branch's current leaf (the last assistant
    /// entry); a forked session otherwise (spec §4.11: "historical
    /// assistant"). Emits a placeholder trace event immediately so UIs
    /// can show a spinner before the first token.
    pub async fn regenerate(&self, session: &SessionKey, target_entry: &EntryId) -> Result<SessionKey> {
        let branch = self.sessions.get_branch(session, None).await?;
        let target = branch
            .iter()
            .find(|e| &e.id == target_entry)
            .ok_or_else(|| LoomError::coded(ErrorCode::EArgs, "regenerate target not found on branch"))?;
        let parent = target.parent_id.clone();
        let meta = self.sessions.meta(session).await?;

        let result_session = if meta.leaf.as_ref() == Some(target_entry) {
            let mut updated = meta.clone();
            updated.leaf = parent;
            updated.status = SessionStatus::Idle;
            self.sessions.store().write_meta(&updated)?;
            session.clone()
        } else {
            let fork_point = parent.ok_or_else(|| LoomError::coded(ErrorCode::EArgs, "cannot regenerate the root entry"))?;
            self.sessions.fork(session, &fork_point, format!("{} (regenerated)", meta.title)).await?.id
        };

        self.trace.emit(&result_session, TraceKind::InputRegenerate, serde_json::json!({ "target_entry": target_entry.as_str() }));
        Ok(result_session)
    }

    async fn run_loop(&self, session: &SessionKey, mut history_status: BranchStatus) -> Result<TerminalStatus> {
        let cancel = CancellationToken::new();
        self.cancellations.insert(session.clone(), cancel.clone());
        self.no_progress.remove(session);
        self.retry_counts.remove(session);

        let mut steps = 0usize;
        let terminal = loop {
            if cancel.is_cancelled() {
                break TerminalStatus::Stopped;
            }
            steps += 1;
            if steps > self.config.max_steps {
                break TerminalStatus::MaxSteps;
            }

            self.trace.emit(session, TraceKind::StepStarted, serde_json::json!({ "step": steps }));
            let outcome = self.run_step(session, history_status, &cancel).await;
            self.trace.emit(session, TraceKind::StepFinished, serde_json::json!({ "step": steps }));
            // Every step after the first sees a fully-resolved branch;
            // only a resumed run's first step can have dangling tool_calls.
            history_status = BranchStatus::Compacted;

            match outcome {
                Ok(StepOutcome::Continue) => continue,
                Ok(StepOutcome::Terminal(status)) => break status,
                Err(e) => {
                    self.trace.emit(session, TraceKind::LoopError, serde_json::json!({ "error": e.to_string() }));
                    break TerminalStatus::FailedExecute;
                }
            }
        };

        self.cancellations.remove(session);
        let status = match terminal {
            TerminalStatus::Done | TerminalStatus::MaxSteps => SessionStatus::Idle,
            TerminalStatus::Stopped => SessionStatus::Stopped,
            TerminalStatus::FailedExecute | TerminalStatus::FailedVerify | TerminalStatus::ProgressUncertain => SessionStatus::FailedExecute,
        };
        self.sessions.set_status(session, status).await?;
        self.trace.emit(session, TraceKind::LoopDone, serde_json::json!({ "status": format!("{:?}", terminal) }));
        Ok(terminal)
    }

    /// One full turn: assemble context, call the LLM (with overflow
    /// retry-then-compaction), parse the response, and either append a
    /// final assistant entry or dispatch tool calls.
    async fn run_step(&self, session: &SessionKey, history_status: BranchStatus, cancel: &CancellationToken) -> Result<StepOutcome> {
        let tools = self.contracts.list_for_llm();
        let ctx = self.sessions.build_session_context(session, "").await?;
        let messages = transform::transform(&ctx.entries, history_status);

        let mut request = LlmRequest { messages, tools: Some(tools), ..Default::default() };
        let mut overflow_attempts = 0u32;

        let response = loop {
            let before_payload = serde_json::json!({
                "model": request.model,
                "system": request.system,
                "message_count": request.messages.len(),
            });
            if let Some(patch) = self.hooks.run_phase("llm.before_request", session.as_str(), before_payload).await? {
                if let Some(system) = patch.get("system").and_then(|v| v.as_str()) {
                    request.system = Some(system.to_string());
                }
            }

            self.trace.emit(session, TraceKind::LlmRequest, serde_json::json!({ "message_count": request.messages.len() }));

            match loom_llm::complete_with_profile(&self.llm_providers, &self.profiles, &self.config.role, request.clone(), Some(cancel.clone())).await {
                Ok(resp) => break resp,
                Err(LlmError::ContextOverflow(_)) if overflow_attempts < self.config.overflow_retry_cap => {
                    overflow_attempts += 1;
                    self.trace.emit(session, TraceKind::AutoRetryStart, serde_json::json!({ "reason": "context_overflow" }));
                    self.trace.emit(session, TraceKind::AutoRetryEnd, serde_json::json!({ "reason": "context_overflow" }));
                }
                Err(LlmError::ContextOverflow(_)) => {
                    self.compact(session).await?;
                    let ctx = self.sessions.build_session_context(session, "").await?;
                    request.messages = transform::transform(&ctx.entries, BranchStatus::Compacted);
                    overflow_attempts = 0;
                }
                Err(LlmError::Cancelled) => return Ok(StepOutcome::Terminal(TerminalStatus::Stopped)),
                Err(e) => {
                    self.trace.emit(session, TraceKind::LoopError, serde_json::json!({ "error": e.to_string() }));
                    return Ok(StepOutcome::Terminal(TerminalStatus::FailedExecute));
                }
            }
        };

        let after_payload = serde_json::json!({
            "text": response.text,
            "tool_call_count": response.tool_calls.len(),
            "stop_reason": response.stop_reason,
        });
        let mut response = response;
        if let Some(patch) = self.hooks.run_phase("llm.after_response", session.as_str(), after_payload).await? {
            if let Some(text) = patch.get("text").and_then(|v| v.as_str()) {
                response.text = text.to_string();
            }
        }
        self.trace.emit(session, TraceKind::LlmResponseParsed, serde_json::json!({ "has_tool_calls": response.has_tool_calls() }));

        if !response.has_tool_calls() {
            self.sessions.append_entry(session, EntryRole::Assistant, response.text, vec![], None).await?;
            return Ok(StepOutcome::Terminal(TerminalStatus::Done));
        }

        let tool_calls: Vec<ToolCallMeta> = response
            .tool_calls
            .iter()
            .map(|c| ToolCallMeta { id: c.id.clone(), name: c.name.clone(), arguments: c.parse_arguments().unwrap_or(serde_json::Value::Null) })
            .collect();
        self.sessions.append_entry(session, EntryRole::Assistant, response.text.clone(), tool_calls.clone(), None).await?;

        self.dispatch_tool_calls(session, &tool_calls, cancel).await
    }

    /// Sequential, declaration-order dispatch (spec §5: "a blocking or
    /// failing earlier call does not execute later calls"). Each call
    /// passes through `tool.before_call`/`tool.after_result`, capability
    /// policy routing, the retry circuit, and no-progress fingerprinting.
    async fn dispatch_tool_calls(&self, session: &SessionKey, calls: &[ToolCallMeta], cancel: &CancellationToken) -> Result<StepOutcome> {
        let mut short_circuited = false;

        for call in calls {
            if cancel.is_cancelled() {
                return Ok(StepOutcome::Terminal(TerminalStatus::Stopped));
            }

            if short_circuited {
                self.sessions
                    .append_entry(
                        session,
                        EntryRole::Tool,
                        "not attempted: an earlier tool call in this turn failed",
                        vec![],
                        Some(ToolResultMeta { tool_call_id: call.id.clone(), ok: false, payload: serde_json::Value::Null }),
                    )
                    .await?;
                continue;
            }

            let Some(canonical) = self.contracts.resolve(&call.name).map(|s| s.to_string()) else {
                self.sessions
                    .append_entry(
                        session,
                        EntryRole::Tool,
                        format!("unknown tool '{}'", call.name),
                        vec![],
                        Some(ToolResultMeta { tool_call_id: call.id.clone(), ok: false, payload: serde_json::Value::Null }),
                    )
                    .await?;
                short_circuited = true;
                continue;
            };

            let Some(policy) = self.providers.policy(&canonical).await else {
                return Err(LoomError::coded(ErrorCode::ENoProvider, format!("capability '{}' has no policy", canonical)));
            };

            let before_payload = serde_json::json!({ "tool": canonical, "arguments": call.arguments });
            let mut arguments = call.arguments.clone();
            if let Some(patch) = self.hooks.run_phase("tool.before_call", session.as_str(), before_payload).await? {
                if let Some(patched_args) = patch.get("arguments") {
                    arguments = patched_args.clone();
                }
            }
            self.trace.emit(session, TraceKind::ToolBeforeCall, serde_json::json!({ "tool": canonical, "arguments": arguments }));

            let target = arguments
                .get("tab_id")
                .or_else(|| arguments.get("path"))
                .or_else(|| arguments.get("target"))
                .and_then(|v| v.as_str())
                .map(|s| s.to_string());
            let fp = fingerprint(&canonical, &arguments);

            let outcome = self.invoke_checked(session, &policy, &canonical, target.as_deref(), &call.id, &arguments).await;

            match outcome {
                Ok((provider, envelope, mut result)) => {
                    if policy.verify_policy != VerifyPolicy::Never {
                        let verify = provider.verify(&envelope, &result).await;
                        match verify {
                            Ok(v) if !v.verified => {
                                self.trace.emit(session, TraceKind::LoopError, serde_json::json!({ "reason": "verify_failed", "tool": canonical }));
                                self.sessions
                                    .append_entry(
                                        session,
                                        EntryRole::Tool,
                                        "action was not verified",
                                        vec![],
                                        Some(ToolResultMeta { tool_call_id: call.id.clone(), ok: false, payload: result }),
                                    )
                                    .await?;
                                return Ok(StepOutcome::Terminal(if v.hard_failure { TerminalStatus::FailedVerify } else { TerminalStatus::ProgressUncertain }));
                            }
                            Err(e) => {
                                self.trace.emit(session, TraceKind::LoopError, serde_json::json!({ "reason": "verify_error", "error": e.to_string() }));
                                self.sessions
                                    .append_entry(
                                        session,
                                        EntryRole::Tool,
                                        e.to_string(),
                                        vec![],
                                        Some(ToolResultMeta { tool_call_id: call.id.clone(), ok: false, payload: serde_json::Value::Null }),
                                    )
                                    .await?;
                                return Ok(StepOutcome::Terminal(TerminalStatus::FailedVerify));
                            }
                            Ok(_) => {}
                        }
                    }

                    self.retry_counts.remove(session);
                    let repeated = self.track_fingerprint(session, fp);

                    let after_payload = serde_json::json!({ "tool": canonical, "ok": true, "result": result });
                    if let Some(patch) = self.hooks.run_phase("tool.after_result", session.as_str(), after_payload).await? {
                        if let Some(patched) = patch.get("result") {
                            result = patched.clone();
                        }
                    }
                    self.trace.emit(session, TraceKind::ToolAfterResult, serde_json::json!({ "tool": canonical, "ok": true }));
                    self.sessions
                        .append_entry(
                            session,
                            EntryRole::Tool,
                            serde_json::to_string(&result).unwrap_or_default(),
                            vec![],
                            Some(ToolResultMeta { tool_call_id: call.id.clone(), ok: true, payload: result }),
                        )
                        .await?;

                    if repeated {
                        self.trace.emit(session, TraceKind::LoopNoProgress, serde_json::json!({ "tool": canonical }));
                        return Ok(StepOutcome::Terminal(if policy.mutating { TerminalStatus::FailedVerify } else { TerminalStatus::ProgressUncertain }));
                    }
                }
                Err(e) => {
                    self.trace.emit(session, TraceKind::ToolAfterResult, serde_json::json!({ "tool": canonical, "ok": false, "error": e.to_string() }));
                    let retryable = e.retryable();
                    let blocked = matches!(e.code(), Some(ErrorCode::EHookBlock));
                    self.sessions
                        .append_entry(
                            session,
                            EntryRole::Tool,
                            e.to_string(),
                            vec![],
                            Some(ToolResultMeta { tool_call_id: call.id.clone(), ok: false, payload: serde_json::Value::Null }),
                        )
                        .await?;

                    if retryable {
                        let count = {
                            let mut entry = self.retry_counts.entry(session.clone()).or_insert(0);
                            *entry += 1;
                            *entry
                        };
                        if count > self.config.tool_retry_cap {
                            self.trace.emit(session, TraceKind::LoopError, serde_json::json!({ "reason": "retry_circuit_open" }));
                            return Ok(StepOutcome::Terminal(TerminalStatus::FailedExecute));
                        }
                    }

                    if blocked {
                        return Ok(StepOutcome::Terminal(TerminalStatus::FailedExecute));
                    }
                    short_circuited = true;
                }
            }
        }

        if short_circuited {
            return Ok(StepOutcome::Terminal(TerminalStatus::FailedExecute));
        }
        Ok(StepOutcome::Continue)
    }

    /// Check the lease gate (if the capability requires one), route to
    /// a provider, and invoke it. Returns the provider and envelope
    /// alongside the result so the caller can run a post-action verify
    /// step against the same provider without re-routing.
    async fn invoke_checked(
        &self,
        session: &SessionKey,
        policy: &loom_core::types::CapabilityPolicy,
        canonical: &str,
        target: Option<&str>,
        call_id: &str,
        arguments: &serde_json::Value,
    ) -> Result<(Arc<dyn ToolProvider>, InvocationEnvelope, serde_json::Value)> {
        if policy.requires_lease {
            self.ensure_lease_held(target, session)?;
        }
        let provider = self.providers.route(canonical, target).await?;
        let envelope = InvocationEnvelope {
            invocation_id: call_id.to_string(),
            session_id: session.clone(),
            parent_session_id: None,
            agent_id: None,
            requested_tool_name: canonical.to_string(),
            canonical_tool_name: canonical.to_string(),
            arguments: arguments.clone(),
            fingerprint: fingerprint(canonical, arguments),
        };
        let result = provider.invoke(&envelope).await?;
        Ok((provider, envelope, result))
    }

    /// Returns `true` once the same fingerprint has repeated
    /// `no_progress_threshold` times in a row for this session.
    fn track_fingerprint(&self, session: &SessionKey, fp: String) -> bool {
        let mut window = self.no_progress.entry(session.clone()).or_default();
        window.push_back(fp);
        while window.len() > self.config.no_progress_threshold {
            window.pop_front();
        }
        window.len() == self.config.no_progress_threshold && window.iter().all(|f| f == window.front().unwrap())
    }

    /// Runs the `compaction.summary` hook (spec §4.11: "whose listener
    /// is the LLM layer requesting a bounded summary") and appends the
    /// result as a `SystemSummary` entry. A phase with no registered
    /// listener returns `Ok(None)` rather than an error (see
    /// `HookRunner::run_phase`); compaction capability is structurally
    /// absent in that case, so it's treated as a hook block.
    async fn compact(&self, session: &SessionKey) -> Result<()> {
        self.trace.emit(session, TraceKind::AutoCompactionStart, serde_json::json!({}));
        let patch = self
            .hooks
            .run_phase("compaction.summary", session.as_str(), serde_json::json!({ "session_id": session.as_str() }))
            .await?;
        let summary = patch
            .as_ref()
            .and_then(|v| v.get("summary"))
            .and_then(|v| v.as_str())
            .ok_or_else(|| LoomError::coded(ErrorCode::EHookBlock, "no compaction.summary listener produced a summary"))?;
        self.sessions.append_entry(session, EntryRole::SystemSummary, summary, vec![], None).await?;
        self.trace.emit(session, TraceKind::AutoCompactionEnd, serde_json::json!({}));
        self.trace.emit(session, TraceKind::SessionCompact, serde_json::json!({}));
        Ok(())
    }
}

/// `(canonical_tool, normalized_target, expected_evidence_digest)` per
/// spec §9 design note — the digest stands in for "expected change"; a
/// deterministic hash of the call's arguments, not a crypto hash.
fn fingerprint(canonical_tool: &str, arguments: &serde_json::Value) -> String {
    let target = arguments.get("path").or_else(|| arguments.get("target")).and_then(|v| v.as_str()).unwrap_or("");
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    arguments.to_string().hash(&mut hasher);
    format!("{}::{}::{:016x}", canonical_tool, target, hasher.finish())
}
