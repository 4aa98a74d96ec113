//! Bridge wire protocol (spec §6).
//!
//! Wire format:
//!
//! Client → Server (invoke request):
//!   { "type": "invoke", "id": "...", "tool": "fs.read_text", "args": {...}, "sessionId": "..." }
//!
//! Server → Client (success):
//!   { "id": "...", "ok": true, "data": {...}, "sessionId": "..." }
//!
//! Server → Client (failure):
//!   { "id": "...", "ok": false, "error": {"code": "E_PATH", "message": "..."} }
//!
//! Server → Client (event push):
//!   { "type": "event", "event": "invoke.started", "ts": "...", "id": "...", "data": {...} }
//!
//! Authentication: shared token via `token` query parameter or
//! `x-bridge-token` header, verified on handshake.

use crate::error::ErrorCode;
use serde::{Deserialize, Serialize};

/// Request frame (spec §6 table).
#[derive(Debug, Clone, Deserialize)]
pub struct InvokeRequest {
    #[serde(rename = "type")]
    pub kind: InvokeRequestKind,
    pub id: String,
    pub tool: String,
    #[serde(default)]
    pub args: serde_json::Value,
    #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(rename = "parentSessionId", skip_serializing_if = "Option::is_none")]
    pub parent_session_id: Option<String>,
    #[serde(rename = "agentId", skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InvokeRequestKind {
    Invoke,
}

/// Response frame — success variant.
#[derive(Debug, Clone, Serialize)]
pub struct InvokeSuccess {
    pub id: String,
    pub ok: bool,
    pub data: serde_json::Value,
    #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(rename = "agentId", skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
}

impl InvokeSuccess {
    pub fn new(id: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            ok: true,
            data,
            session_id: None,
            agent_id: None,
        }
    }
}

/// Response frame — failure variant.
#[derive(Debug, Clone, Serialize)]
pub struct InvokeFailure {
    pub id: String,
    pub ok: bool,
    pub error: InvokeErrorDetail,
    #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(rename = "agentId", skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InvokeErrorDetail {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl InvokeFailure {
    pub fn new(id: impl Into<String>, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ok: false,
            error: InvokeErrorDetail {
                code,
                message: message.into(),
                details: None,
            },
            session_id: None,
            agent_id: None,
        }
    }
}

/// Streaming / lifecycle events (spec §4.9).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BridgeEventName {
    InvokeStarted,
    InvokeStdout,
    InvokeStderr,
    InvokeFinished,
}

/// Event frame (spec §6 table).
#[derive(Debug, Clone, Serialize)]
pub struct BridgeEvent {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub event: BridgeEventName,
    pub ts: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(rename = "parentSessionId", skip_serializing_if = "Option::is_none")]
    pub parent_session_id: Option<String>,
    #[serde(rename = "agentId", skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    pub data: serde_json::Value,
}

impl BridgeEvent {
    pub fn new(event: BridgeEventName, id: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            kind: "event",
            event,
            ts: chrono::Utc::now(),
            id: Some(id.into()),
            session_id: None,
            parent_session_id: None,
            agent_id: None,
            data,
        }
    }

    pub fn finished(id: impl Into<String>, deduped: bool, cache_hit: bool) -> Self {
        Self::new(
            BridgeEventName::InvokeFinished,
            id,
            serde_json::json!({ "deduped": deduped, "cacheHit": cache_hit }),
        )
    }
}

/// Canonical tool names and their aliases (spec §6).
pub fn canonical_tool_name(requested: &str) -> &str {
    match requested {
        "read_file" => "fs.read_text",
        "write_file" => "fs.write_text",
        "edit_file" => "fs.patch_text",
        "bash" => "command.run",
        other => other,
    }
}

/// Runtime message surface — in-process namespaced operation names (spec
/// §6). These are method-name constants, not a wire struct; the runtime
/// loop dispatches on them directly.
pub mod runtime_surface {
    pub const RUN_START: &str = "brain.run.start";
    pub const RUN_STOP: &str = "brain.run.stop";
    pub const RUN_PAUSE: &str = "brain.run.pause";
    pub const RUN_RESUME: &str = "brain.run.resume";
    pub const RUN_REGENERATE: &str = "brain.run.regenerate";

    pub const SESSION_LIST: &str = "brain.session.list";
    pub const SESSION_VIEW: &str = "brain.session.view";
    pub const SESSION_FORK: &str = "brain.session.fork";
    pub const SESSION_TITLE_REFRESH: &str = "brain.session.title.refresh";
    pub const SESSION_DELETE: &str = "brain.session.delete";

    pub const STEP_EXECUTE: &str = "brain.step.execute";
    pub const STEP_STREAM: &str = "brain.step.stream";

    pub const STORAGE_ARCHIVE: &str = "brain.storage.archive";
    pub const STORAGE_RESET: &str = "brain.storage.reset";
    pub const STORAGE_INIT: &str = "brain.storage.init";

    pub const DEBUG_DUMP: &str = "brain.debug.dump";
    pub const DEBUG_BUMP: &str = "brain.debug.bump";

    pub const LEASE_ACQUIRE: &str = "lease.acquire";
    pub const LEASE_HEARTBEAT: &str = "lease.heartbeat";
    pub const LEASE_RELEASE: &str = "lease.release";
    pub const LEASE_STATUS: &str = "lease.status";

    pub const CDP_OBSERVE: &str = "cdp.observe";
    pub const CDP_SNAPSHOT: &str = "cdp.snapshot";
    pub const CDP_ACTION: &str = "cdp.action";
    pub const CDP_VERIFY: &str = "cdp.verify";
    pub const CDP_EXECUTE: &str = "cdp.execute";
    pub const CDP_DETACH: &str = "cdp.detach";
}
