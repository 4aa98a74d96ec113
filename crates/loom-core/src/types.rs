//! The data model shared by every crate (spec §3): sessions, entries,
//! trace events, tool contracts, provider registrations, capability
//! policy, leases, snapshots, invocation envelopes, conversation context.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Session identifier — cheaply cloneable across tasks.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct SessionKey(Arc<str>);

impl SessionKey {
    pub fn new(s: impl Into<String>) -> Self {
        Self(Arc::from(s.into()))
    }

    pub fn generate() -> Self {
        Self::new(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SessionKey {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for SessionKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Entry identifier — monotonic within a session, globally unique.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct EntryId(pub Arc<str>);

impl EntryId {
    pub fn generate() -> Self {
        Self(Arc::from(Uuid::new_v4().to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Entry role (spec §3: Entry).
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EntryRole {
    User,
    Assistant,
    Tool,
    SystemSummary,
}

/// Tool-call metadata attached to an assistant entry.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolCallMeta {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// Tool-result metadata attached to a tool entry.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolResultMeta {
    pub tool_call_id: String,
    pub ok: bool,
    pub payload: serde_json::Value,
}

/// One node in a session's branch (spec §3: Entry). Immutable once
/// appended; mutation happens only by appending a new entry and moving
/// the leaf pointer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Entry {
    pub id: EntryId,
    pub parent_id: Option<EntryId>,
    pub role: EntryRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallMeta>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_result: Option<ToolResultMeta>,
    pub timestamp: DateTime<Utc>,
}

/// Session metadata (spec §3: Session).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionMeta {
    pub id: SessionKey,
    pub title: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forked_from: Option<ForkOrigin>,
    pub shared_tab_hint: Option<String>,
    pub llm_route: Option<String>,
    pub leaf: Option<EntryId>,
    #[serde(default)]
    pub status: SessionStatus,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ForkOrigin {
    pub session_id: SessionKey,
    pub leaf_id: EntryId,
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Idle,
    Running,
    Paused,
    Stopped,
    FailedExecute,
}

/// Trace event kinds (spec §3: Trace Event).
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TraceKind {
    InputUser,
    InputRegenerate,
    LlmRequest,
    LlmResponseParsed,
    LlmResponseRaw,
    StepStarted,
    StepFinished,
    ToolBeforeCall,
    ToolAfterResult,
    LoopNoProgress,
    AutoRetryStart,
    AutoRetryEnd,
    AutoCompactionStart,
    AutoCompactionEnd,
    SessionCompact,
    LoopDone,
    LoopError,
    HookDecision,
}

/// Append-only structured record attached to a session (spec §3, §4.12).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TraceEvent {
    pub session_id: SessionKey,
    pub trace_id: Uuid,
    pub sequence: u64,
    pub kind: TraceKind,
    pub timestamp: DateTime<Utc>,
    pub payload: serde_json::Value,
}

/// Declarative tool definition (spec §3: Tool Contract).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolContract {
    pub canonical_name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    pub argument_schema: serde_json::Value,
    pub capability: String,
    pub default_provider_hint: Option<String>,
    #[serde(default)]
    pub side_effect_tags: Vec<String>,
}

/// Verification policy for a capability (spec §3: Capability Policy).
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VerifyPolicy {
    Never,
    OnCritical,
    Always,
}

/// Per-capability policy record (spec §3, §4.6). Every registered
/// capability must carry one — see DESIGN.md open question (a).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CapabilityPolicy {
    pub requires_lease: bool,
    pub verify_policy: VerifyPolicy,
    pub mutating: bool,
    pub max_retries: u32,
    /// No-progress signature class, e.g. "fs", "browser", "command".
    pub signature_class: String,
}

/// Exclusive mutation token scoped to a browser tab (spec §3: Lease).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Lease {
    pub tab_id: String,
    pub owner_id: String,
    pub session_id: SessionKey,
    pub expiry: DateTime<Utc>,
}

impl Lease {
    pub fn is_valid_for(&self, owner: &str, now: DateTime<Utc>) -> bool {
        self.owner_id == owner && self.expiry > now
    }
}

/// A node observed in a page snapshot (spec §3: Snapshot).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SnapshotNode {
    pub r#ref: String,
    pub backend_node_id: u64,
    #[serde(default)]
    pub selector_hints: Vec<String>,
    pub role: Option<String>,
    pub name: Option<String>,
    pub frame_id: String,
}

/// A page observation (spec §3: Snapshot).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Snapshot {
    pub snapshot_id: String,
    pub nodes: Vec<SnapshotNode>,
    pub frame_tree: serde_json::Value,
}

/// Bridge invocation envelope (spec §3, §6).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InvocationEnvelope {
    pub invocation_id: String,
    pub session_id: SessionKey,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_session_id: Option<SessionKey>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    pub requested_tool_name: String,
    pub canonical_tool_name: String,
    pub arguments: serde_json::Value,
    pub fingerprint: String,
}

/// The ordered sequence of entries assembled for an LLM call (spec §3,
/// §4.2: `build_session_context`).
#[derive(Clone, Debug, Default)]
pub struct ConversationContext {
    pub entries: Vec<Entry>,
    pub compaction_summary: Option<Entry>,
    pub system_prompt: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lease_validity_checks_owner_and_expiry() {
        let now = Utc::now();
        let lease = Lease {
            tab_id: "t1".into(),
            owner_id: "sess-a".into(),
            session_id: SessionKey::new("sess-a"),
            expiry: now + chrono::Duration::seconds(2),
        };
        assert!(lease.is_valid_for("sess-a", now));
        assert!(!lease.is_valid_for("sess-b", now));
        assert!(!lease.is_valid_for("sess-a", now + chrono::Duration::seconds(3)));
    }
}
