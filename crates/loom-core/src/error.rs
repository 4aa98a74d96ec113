//! Stable error codes shared across every crate boundary.
//!
//! `ErrorCode` is the wire-level vocabulary tool results and bridge
//! responses carry to the LLM and to other processes; `LoomError` is the
//! in-process error type. Every `LoomError` that can reach a tool result
//! or bridge response maps to exactly one `ErrorCode`; ambient failures
//! (plain I/O, serde) stay `Other` and never leave the process boundary
//! un-translated.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable error codes (spec §7). Never renamed across versions — callers
/// match on these, not on message text.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Caller input violates a contract.
    #[serde(rename = "E_ARGS")]
    EArgs,
    /// Unknown or disabled canonical tool.
    #[serde(rename = "E_TOOL")]
    ETool,
    /// Filesystem guard rejection.
    #[serde(rename = "E_PATH")]
    EPath,
    /// Command whitelist/strict-mode rejection.
    #[serde(rename = "E_CMD")]
    ECmd,
    /// Concurrency gate (max_concurrency reached).
    #[serde(rename = "E_BUSY")]
    EBusy,
    /// Bounded wait exceeded.
    #[serde(rename = "E_TIMEOUT")]
    ETimeout,
    /// Patch apply failed (context mismatch, overlap, malformed header).
    #[serde(rename = "E_PATCH")]
    EPatch,
    /// Write attempted without a valid lease.
    #[serde(rename = "E_LEASE")]
    ELease,
    /// Capability has no matching provider.
    #[serde(rename = "E_NO_PROVIDER")]
    ENoProvider,
    /// A hook refused (block decision).
    #[serde(rename = "E_HOOK_BLOCK")]
    EHookBlock,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::EArgs => "E_ARGS",
            ErrorCode::ETool => "E_TOOL",
            ErrorCode::EPath => "E_PATH",
            ErrorCode::ECmd => "E_CMD",
            ErrorCode::EBusy => "E_BUSY",
            ErrorCode::ETimeout => "E_TIMEOUT",
            ErrorCode::EPatch => "E_PATCH",
            ErrorCode::ELease => "E_LEASE",
            ErrorCode::ENoProvider => "E_NO_PROVIDER",
            ErrorCode::EHookBlock => "E_HOOK_BLOCK",
        }
    }

    /// Whether this error category feeds the retry circuit (spec §7/§4.11).
    pub fn retryable(&self) -> bool {
        matches!(self, ErrorCode::EBusy | ErrorCode::ETimeout)
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Terminal loop statuses (spec §4.11/§7).
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TerminalStatus {
    Done,
    FailedExecute,
    FailedVerify,
    ProgressUncertain,
    MaxSteps,
    Stopped,
}

#[derive(Error, Debug)]
pub enum LoomError {
    #[error("{code}: {message}")]
    Coded {
        code: ErrorCode,
        message: String,
        retryable: bool,
        repair_hint: Option<String>,
    },

    #[error("authentication failed: {reason}")]
    AuthFailed { reason: String },

    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("corruption detected: {0}")]
    Corruption(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, LoomError>;

impl LoomError {
    pub fn coded(code: ErrorCode, message: impl Into<String>) -> Self {
        let retryable = code.retryable();
        Self::Coded {
            code,
            message: message.into(),
            retryable,
            repair_hint: None,
        }
    }

    pub fn coded_with_hint(
        code: ErrorCode,
        message: impl Into<String>,
        repair_hint: impl Into<String>,
    ) -> Self {
        let retryable = code.retryable();
        Self::Coded {
            code,
            message: message.into(),
            retryable,
            repair_hint: Some(repair_hint.into()),
        }
    }

    pub fn auth_failed(reason: impl Into<String>) -> Self {
        Self::AuthFailed {
            reason: reason.into(),
        }
    }

    /// The stable code this error maps to, if any (spec §7 propagation).
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            LoomError::Coded { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub fn retryable(&self) -> bool {
        match self {
            LoomError::Coded { retryable, .. } => *retryable,
            _ => false,
        }
    }
}

/// The envelope every tool result carries to the LLM on failure (spec §7).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolErrorPayload {
    pub canonical_tool: String,
    pub error_code: ErrorCode,
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repair_hint: Option<String>,
}
