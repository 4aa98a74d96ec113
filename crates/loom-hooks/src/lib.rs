//! Hook Runner (spec §4.7): ordered, timeout-isolated interception at
//! named phases with {continue, patch, block} decisions.
//!
//! Dispatch is table-driven — a map from phase name to a priority-sorted
//! vector of listener handles — rather than inheritance-based
//! interception, per the design note in SPEC_FULL.md §9. There is no
//! direct teacher analog; this crate is structured the way the teacher
//! structures its own registries (register/remove/list), see
//! `loom-tools::registry` and DESIGN.md.

use async_trait::async_trait;
use loom_core::error::{ErrorCode, LoomError};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Context passed to every hook on a phase invocation.
#[derive(Clone, Debug)]
pub struct HookContext {
    pub phase: &'static str,
    pub session_id: String,
    /// The mutable payload hooks may patch (e.g. request body, tool args,
    /// a parsed response). Hooks never see the fields listed in
    /// `NON_PATCHABLE_FIELDS` — those are stripped from both the context
    /// view and any patch a hook returns.
    pub payload: Value,
}

/// Decision returned by a single hook listener (spec §4.7).
#[derive(Clone, Debug)]
pub enum HookDecision {
    Continue,
    Patch(Value),
    Block { code: ErrorCode, message: String },
}

#[async_trait]
pub trait Hook: Send + Sync {
    async fn call(&self, ctx: &HookContext) -> HookDecision;
}

/// Fields no hook patch may touch, regardless of phase (spec §4.7:
/// "a documented subset of fields is non-patchable").
pub const NON_PATCHABLE_FIELDS: &[&str] = &["lease", "verification", "auth_headers"];

fn strip_non_patchable(mut value: Value) -> Value {
    if let Value::Object(map) = &mut value {
        for field in NON_PATCHABLE_FIELDS {
            map.remove(*field);
        }
    }
    value
}

fn merge_patch(base: &mut Value, patch: Value) {
    let patch = strip_non_patchable(patch);
    match (base, patch) {
        (Value::Object(base_map), Value::Object(patch_map)) => {
            for (k, v) in patch_map {
                base_map.insert(k, v);
            }
        }
        (base_slot, patch_value) => {
            *base_slot = patch_value;
        }
    }
}

/// Per-phase timeout classification (spec §4.7: 200ms fast / 500ms slow).
fn phase_timeout(phase: &str) -> Duration {
    const SLOW_PHASES: &[&str] = &[
        "llm.before_request",
        "llm.after_response",
        "bridge.before_invoke",
        "bridge.after_invoke",
        "compaction.summary",
    ];
    if SLOW_PHASES.contains(&phase) {
        Duration::from_millis(500)
    } else {
        Duration::from_millis(200)
    }
}

struct Registration {
    priority: i32,
    seq: u64,
    hook: Arc<dyn Hook>,
}

/// Table-driven phase dispatcher.
pub struct HookRunner {
    phases: RwLock<HashMap<&'static str, Vec<Registration>>>,
    seq: AtomicU64,
}

impl Default for HookRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl HookRunner {
    pub fn new() -> Self {
        Self {
            phases: RwLock::new(HashMap::new()),
            seq: AtomicU64::new(0),
        }
    }

    /// Register a hook at a phase. Ties in priority break by insertion
    /// order (spec §8: "execution order is stable under repeated
    /// registrations with equal priority").
    pub async fn register(&self, phase: &'static str, priority: i32, hook: Arc<dyn Hook>) {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        let mut phases = self.phases.write().await;
        let entries = phases.entry(phase).or_default();
        entries.push(Registration { priority, seq, hook });
        entries.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.seq.cmp(&b.seq)));
    }

    /// Run every hook registered at `phase` in priority-descending,
    /// insertion-order-stable sequence. Returns the merged patch (if
    /// any hook patched) or an `E_HOOK_BLOCK` error on the first block.
    /// A per-hook timeout is enforced; a timed-out hook is treated as a
    /// failure (spec §4.7: "timeout = failure").
    pub async fn run_phase(
        &self,
        phase: &'static str,
        session_id: &str,
        payload: Value,
    ) -> Result<Option<Value>, LoomError> {
        let registrations_exist = {
            let phases = self.phases.read().await;
            phases.get(phase).map(|v| !v.is_empty()).unwrap_or(false)
        };
        if !registrations_exist {
            return Ok(None);
        }

        let base_payload = strip_non_patchable(payload);
        let mut merged: Option<Value> = None;
        let timeout = phase_timeout(phase);

        let hooks: Vec<Arc<dyn Hook>> = {
            let phases = self.phases.read().await;
            phases
                .get(phase)
                .map(|v| v.iter().map(|r| r.hook.clone()).collect())
                .unwrap_or_default()
        };

        for hook in hooks {
            let ctx = HookContext {
                phase,
                session_id: session_id.to_string(),
                payload: merged.clone().unwrap_or_else(|| base_payload.clone()),
            };
            let decision = match tokio::time::timeout(timeout, hook.call(&ctx)).await {
                Ok(decision) => decision,
                Err(_) => {
                    tracing::warn!(phase, session_id, "hook timed out");
                    return Err(LoomError::coded(
                        ErrorCode::EHookBlock,
                        format!("hook on phase {} timed out", phase),
                    ));
                }
            };
            match decision {
                HookDecision::Continue => {}
                HookDecision::Patch(patch) => {
                    let mut target = merged.take().unwrap_or_else(|| base_payload.clone());
                    merge_patch(&mut target, patch);
                    merged = Some(target);
                }
                HookDecision::Block { code, message } => {
                    tracing::info!(phase, session_id, code = %code, "hook blocked");
                    return Err(LoomError::coded(ErrorCode::EHookBlock, message));
                }
            }
        }

        Ok(merged)
    }

    pub async fn listener_count(&self, phase: &str) -> usize {
        self.phases.read().await.get(phase).map(|v| v.len()).unwrap_or(0)
    }
}
