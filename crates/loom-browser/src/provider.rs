//! Tool Provider adapter wiring the execution engine into the tool
//! provider registry (spec §4.6, §4.8). A single [`BrowserProvider`]
//! is registered against the three canonical browser capabilities
//! (`browser.snapshot`, `browser.act`, `browser.verify`); it dispatches
//! on `envelope.canonical_tool_name` rather than needing one adapter
//! struct per capability.

use async_trait::async_trait;
use loom_core::error::{ErrorCode, LoomError};
use loom_core::types::InvocationEnvelope;
use loom_tools::providers::{ToolProvider, VerifyOutcome};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::engine::ExecutionEngine;
use crate::types::{Action, VerifyFailureClass, VerifyPredicate};

pub struct BrowserProvider {
    provider_id: String,
    engine: Arc<ExecutionEngine>,
}

impl BrowserProvider {
    pub fn new(provider_id: impl Into<String>, engine: Arc<ExecutionEngine>) -> Self {
        Self { provider_id: provider_id.into(), engine }
    }

    fn tab_id(arguments: &Value) -> Result<&str, LoomError> {
        arguments
            .get("tab_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| LoomError::coded(ErrorCode::EArgs, "browser tool call is missing 'tab_id'"))
    }

    fn field(arguments: &Value, name: &str) -> Result<Value, LoomError> {
        arguments
            .get(name)
            .cloned()
            .ok_or_else(|| LoomError::coded(ErrorCode::EArgs, format!("browser tool call is missing '{}'", name)))
    }
}

#[async_trait]
impl ToolProvider for BrowserProvider {
    fn provider_id(&self) -> &str {
        &self.provider_id
    }

    fn scope(&self) -> &str {
        "browser"
    }

    /// A single debugging-protocol transport backs every tab; target
    /// routing (which tab, which session) happens in `invoke`'s
    /// arguments, not here.
    fn can_handle(&self, _target: Option<&str>) -> bool {
        true
    }

    async fn invoke(&self, envelope: &InvocationEnvelope) -> Result<Value, LoomError> {
        let tab_id = Self::tab_id(&envelope.arguments)?;
        match envelope.canonical_tool_name.as_str() {
            "browser.snapshot" => {
                let snapshot = self.engine.snapshot(tab_id).await?;
                serde_json::to_value(snapshot).map_err(LoomError::from)
            }
            "browser.act" => {
                let action: Action = serde_json::from_value(Self::field(&envelope.arguments, "action")?)
                    .map_err(|e| LoomError::coded(ErrorCode::EArgs, format!("invalid action payload: {}", e)))?;
                let result = self.engine.act(tab_id, envelope.session_id.as_str(), action).await?;
                serde_json::to_value(result).map_err(LoomError::from)
            }
            "browser.verify" => {
                let predicate: VerifyPredicate = serde_json::from_value(Self::field(&envelope.arguments, "predicate")?)
                    .map_err(|e| LoomError::coded(ErrorCode::EArgs, format!("invalid verify predicate: {}", e)))?;
                let window = envelope.arguments.get("window_ms").and_then(|v| v.as_u64()).map(Duration::from_millis);
                let interval = envelope.arguments.get("interval_ms").and_then(|v| v.as_u64()).map(Duration::from_millis);
                let (result, class) = self.engine.verify(tab_id, predicate, window, interval).await;
                Ok(serde_json::json!({
                    "verified": result.verified,
                    "evidence": result.evidence,
                    "failure_class": match class {
                        VerifyFailureClass::HardFailure => "hard_failure",
                        VerifyFailureClass::ProgressUncertain => "progress_uncertain",
                    },
                }))
            }
            other => Err(LoomError::coded(ErrorCode::ETool, format!("browser provider cannot handle canonical tool '{}'", other))),
        }
    }

    /// `browser.act` calls carry their verify predicate alongside the
    /// action (spec §4.6: "after action the engine issues a verify
    /// step"). No embedded `verify` object means the call opted out —
    /// that's only reachable when the capability's `verify_policy` is
    /// `Never`, since the orchestrator only calls this for policies
    /// that aren't, so treat it as verified rather than failing the
    /// turn on a caller that didn't ask for checking.
    async fn verify(&self, envelope: &InvocationEnvelope, _result: &Value) -> Result<VerifyOutcome, LoomError> {
        if envelope.canonical_tool_name != "browser.act" {
            return Ok(VerifyOutcome::verified());
        }
        let Some(spec) = envelope.arguments.get("verify") else {
            return Ok(VerifyOutcome::verified());
        };
        let tab_id = Self::tab_id(&envelope.arguments)?;
        let predicate: VerifyPredicate = serde_json::from_value(
            spec.get("predicate").cloned().ok_or_else(|| LoomError::coded(ErrorCode::EArgs, "verify spec missing 'predicate'"))?,
        )
        .map_err(|e| LoomError::coded(ErrorCode::EArgs, format!("invalid verify predicate: {}", e)))?;
        let window = spec.get("window_ms").and_then(|v| v.as_u64()).map(Duration::from_millis);
        let interval = spec.get("interval_ms").and_then(|v| v.as_u64()).map(Duration::from_millis);
        let (result, class) = self.engine.verify(tab_id, predicate, window, interval).await;
        Ok(VerifyOutcome { verified: result.verified, hard_failure: matches!(class, VerifyFailureClass::HardFailure) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::DebugProtocolTransport;
    use loom_core::types::SessionKey;

    struct FakeTransport;

    #[async_trait]
    impl DebugProtocolTransport for FakeTransport {
        async fn send_command(&self, method: &str, _params: Value) -> Result<Value, LoomError> {
            match method {
                "Accessibility.getFullAXTree" => Ok(serde_json::json!({
                    "nodes": [{"backendNodeId": 1, "role": "button", "name": "Submit"}],
                })),
                _ => Ok(serde_json::json!({"matched": true})),
            }
        }
    }

    fn envelope(tool: &str, arguments: Value) -> InvocationEnvelope {
        InvocationEnvelope {
            invocation_id: "inv-1".into(),
            session_id: SessionKey::new("s1"),
            parent_session_id: None,
            agent_id: None,
            requested_tool_name: tool.into(),
            canonical_tool_name: tool.into(),
            arguments,
            fingerprint: "fp".into(),
        }
    }

    #[tokio::test]
    async fn snapshot_dispatches_to_the_engine() {
        let engine = Arc::new(ExecutionEngine::new(Arc::new(FakeTransport)));
        let provider = BrowserProvider::new("browser-local", engine);
        let result = provider.invoke(&envelope("browser.snapshot", serde_json::json!({"tab_id": "tab-1"}))).await.unwrap();
        assert!(result.get("snapshot_id").is_some());
    }

    #[tokio::test]
    async fn unknown_canonical_tool_is_rejected() {
        let engine = Arc::new(ExecutionEngine::new(Arc::new(FakeTransport)));
        let provider = BrowserProvider::new("browser-local", engine);
        let err = provider.invoke(&envelope("browser.unknown", serde_json::json!({"tab_id": "tab-1"}))).await.unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::ETool));
    }

    #[tokio::test]
    async fn missing_tab_id_is_e_args() {
        let engine = Arc::new(ExecutionEngine::new(Arc::new(FakeTransport)));
        let provider = BrowserProvider::new("browser-local", engine);
        let err = provider.invoke(&envelope("browser.snapshot", serde_json::json!({}))).await.unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::EArgs));
    }

    #[tokio::test]
    async fn act_without_an_embedded_verify_spec_passes_through_verified() {
        let engine = Arc::new(ExecutionEngine::new(Arc::new(FakeTransport)));
        let provider = BrowserProvider::new("browser-local", engine);
        let outcome = provider
            .verify(&envelope("browser.act", serde_json::json!({"tab_id": "tab-1"})), &Value::Null)
            .await
            .unwrap();
        assert!(outcome.verified);
    }

    #[tokio::test]
    async fn act_with_an_embedded_verify_spec_polls_the_engine() {
        let engine = Arc::new(ExecutionEngine::new(Arc::new(FakeTransport)));
        let provider = BrowserProvider::new("browser-local", engine);
        let args = serde_json::json!({
            "tab_id": "tab-1",
            "verify": { "predicate": { "kind": "selectorExists", "selector": "#ok" } },
        });
        let outcome = provider.verify(&envelope("browser.act", args), &Value::Null).await.unwrap();
        assert!(outcome.verified);
    }

    struct NeverMatchesTransport;

    #[async_trait]
    impl DebugProtocolTransport for NeverMatchesTransport {
        async fn send_command(&self, _method: &str, _params: Value) -> Result<Value, LoomError> {
            Ok(serde_json::json!({"matched": false}))
        }
    }

    #[tokio::test]
    async fn act_with_an_unmatched_url_changed_predicate_is_a_hard_failure() {
        let engine = Arc::new(ExecutionEngine::new(Arc::new(NeverMatchesTransport)));
        let provider = BrowserProvider::new("browser-local", engine);
        let args = serde_json::json!({
            "tab_id": "tab-1",
            "verify": {
                "predicate": { "kind": "urlChanged", "previousUrl": "https://a" },
                "window_ms": 20,
                "interval_ms": 5,
            },
        });
        let outcome = provider.verify(&envelope("browser.act", args), &Value::Null).await.unwrap();
        assert!(!outcome.verified);
        assert!(outcome.hard_failure);
    }
}
