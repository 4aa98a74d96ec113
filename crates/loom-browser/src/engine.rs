//! The execution engine: snapshot, action dispatch, verify polling and
//! lease-guarded mutation (spec §4.8).
//!
//! No teacher analog. Command dispatch/cancellation is grounded
//! structurally on the teacher's `tools::bash` cancellation-token race +
//! timeout pattern (already adapted into `loom-tools`'s `ShellTool`);
//! the action/snapshot trait shape is grounded on `other_examples`'
//! `tron-tools` `BrowserDelegate` (`execute_action`/`close_session`).

use crate::lease::LeaseTable;
use crate::transport::DebugProtocolTransport;
use crate::types::{
    Action, ActionResult, ActionTarget, Node, NodeRef, Snapshot, SnapshotId, SnapshotState,
    VerifyFailureClass, VerifyPredicate, VerifyResult,
};
use chrono::Duration as ChronoDuration;
use dashmap::DashMap;
use loom_core::error::{ErrorCode, LoomError};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const DEFAULT_LEASE_TTL_SECS: i64 = 60;
const DEFAULT_VERIFY_WINDOW: Duration = Duration::from_secs(5);
const DEFAULT_VERIFY_INTERVAL: Duration = Duration::from_millis(200);

pub struct ExecutionEngine {
    transport: Arc<dyn DebugProtocolTransport>,
    leases: LeaseTable,
    snapshots: DashMap<String, SnapshotState>,
    pending: DashMap<String, CancellationToken>,
}

impl ExecutionEngine {
    pub fn new(transport: Arc<dyn DebugProtocolTransport>) -> Self {
        Self {
            transport,
            leases: LeaseTable::new(),
            snapshots: DashMap::new(),
            pending: DashMap::new(),
        }
    }

    pub fn leases(&self) -> &LeaseTable {
        &self.leases
    }

    /// Accessibility-tree-first snapshot, falling back to a DOM walk
    /// when the tree is unavailable.
    pub async fn snapshot(&self, tab_id: &str) -> Result<Snapshot, LoomError> {
        let cancel = self.begin_pending(tab_id);
        let raw = match self.dispatch(tab_id, "Accessibility.getFullAXTree", serde_json::json!({}), &cancel).await {
            Ok(raw) => raw,
            Err(_) => self.dispatch(tab_id, "DOM.getDocument", serde_json::json!({"depth": -1}), &cancel).await?,
        };
        self.end_pending(tab_id);

        let nodes = parse_nodes(&raw);
        let snapshot_id = SnapshotId(Uuid::new_v4().to_string());
        let ref_map = nodes
            .iter()
            .map(|n| (n.node_ref.clone(), n.backend_node_id))
            .collect();
        self.snapshots.insert(
            tab_id.to_string(),
            SnapshotState { snapshot_id: snapshot_id.clone(), ref_map },
        );

        Ok(Snapshot { snapshot_id, nodes, frame_tree: raw.get("frameTree").cloned().unwrap_or(serde_json::Value::Null) })
    }

    /// Dispatch an action, preferring a backend-node command and
    /// falling back to the target's selector candidates.
    pub async fn act(&self, tab_id: &str, owner: &str, action: Action) -> Result<ActionResult, LoomError> {
        self.leases.check(tab_id, owner)?;
        let cancel = self.begin_pending(tab_id);

        let (method, params, target, used_fallback) = match &action {
            Action::Click { target } => ("Input.click", serde_json::json!({}), Some(target), false),
            Action::Fill { target, value } => {
                ("DOM.setValue", serde_json::json!({ "value": value }), Some(target), false)
            }
            Action::Navigate { url } => ("Page.navigate", serde_json::json!({ "url": url }), None, false),
            Action::Hover { target } => ("Input.dispatchMouseEvent", serde_json::json!({ "type": "mouseMoved" }), Some(target), false),
            Action::Type { target, text } => {
                ("Input.insertText", serde_json::json!({ "text": text }), Some(target), false)
            }
        };

        let (params, used_fallback) = if let Some(target) = target {
            self.resolve_target(tab_id, target, params, used_fallback)?
        } else {
            (params, used_fallback)
        };

        let evidence = self.dispatch(tab_id, method, params, &cancel).await?;
        self.end_pending(tab_id);
        Ok(ActionResult { evidence, used_fallback_selector: used_fallback })
    }

    fn resolve_target(
        &self,
        tab_id: &str,
        target: &ActionTarget,
        mut params: serde_json::Value,
        _used_fallback: bool,
    ) -> Result<(serde_json::Value, bool), LoomError> {
        if let Some(node_ref) = &target.node_ref {
            if let Some(state) = self.snapshots.get(tab_id) {
                if let Some(backend_id) = state.ref_map.get(node_ref) {
                    params["backendNodeId"] = serde_json::json!(backend_id);
                    return Ok((params, false));
                }
            }
        }
        match &target.selector {
            Some(selector) => {
                params["selector"] = serde_json::json!(selector);
                Ok((params, true))
            }
            None => Err(LoomError::coded(
                ErrorCode::EArgs,
                "action target has neither a valid ref nor a selector fallback",
            )),
        }
    }

    /// Bounded polling verify. `verified=false` after window-exhaust is
    /// classified by the caller's capability policy into hard failure
    /// vs `progress_uncertain`.
    pub async fn verify(
        &self,
        tab_id: &str,
        predicate: VerifyPredicate,
        window: Option<Duration>,
        interval: Option<Duration>,
    ) -> (VerifyResult, VerifyFailureClass) {
        let window = window.unwrap_or(DEFAULT_VERIFY_WINDOW);
        let interval = interval.unwrap_or(DEFAULT_VERIFY_INTERVAL);
        let deadline = tokio::time::Instant::now() + window;

        loop {
            if let Ok(result) = self.check_predicate(tab_id, &predicate).await {
                if result.verified {
                    return (result, VerifyFailureClass::ProgressUncertain);
                }
            }
            if tokio::time::Instant::now() >= deadline {
                let class = match &predicate {
                    VerifyPredicate::UrlChanged { .. } => VerifyFailureClass::HardFailure,
                    _ => VerifyFailureClass::ProgressUncertain,
                };
                return (
                    VerifyResult { verified: false, evidence: serde_json::json!({"reason": "window_exhausted"}) },
                    class,
                );
            }
            tokio::time::sleep(interval).await;
        }
    }

    async fn check_predicate(&self, tab_id: &str, predicate: &VerifyPredicate) -> Result<VerifyResult, LoomError> {
        let cancel = CancellationToken::new();
        let (method, params) = match predicate {
            VerifyPredicate::TextIncludes { target, text } => {
                let (params, _) = self.resolve_target(tab_id, target, serde_json::json!({"text": text}), false)?;
                ("DOM.getOuterHTML", params)
            }
            VerifyPredicate::SelectorExists { selector } => {
                ("DOM.querySelector", serde_json::json!({"selector": selector}))
            }
            VerifyPredicate::UrlChanged { previous_url } => {
                ("Page.getNavigationHistory", serde_json::json!({"previousUrl": previous_url}))
            }
            VerifyPredicate::DomAttributeEquals { target, attribute, value } => {
                let (params, _) = self.resolve_target(
                    tab_id,
                    target,
                    serde_json::json!({"attribute": attribute, "value": value}),
                    false,
                )?;
                ("DOM.getAttributes", params)
            }
        };
        let raw = self.dispatch(tab_id, method, params, &cancel).await?;
        let verified = raw.get("matched").and_then(|v| v.as_bool()).unwrap_or(false);
        Ok(VerifyResult { verified, evidence: raw })
    }

    /// Uniform cancellation of pending commands on detach.
    pub fn detach(&self, tab_id: &str) {
        if let Some((_, token)) = self.pending.remove(tab_id) {
            token.cancel();
        }
    }

    fn begin_pending(&self, tab_id: &str) -> CancellationToken {
        let token = CancellationToken::new();
        self.pending.insert(tab_id.to_string(), token.clone());
        token
    }

    fn end_pending(&self, tab_id: &str) {
        self.pending.remove(tab_id);
    }

    async fn dispatch(
        &self,
        _tab_id: &str,
        method: &str,
        params: serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<serde_json::Value, LoomError> {
        let send = self.transport.send_command(method, params);
        tokio::select! {
            result = send => result,
            _ = cancel.cancelled() => Err(LoomError::coded(ErrorCode::ETimeout, "command cancelled on detach")),
        }
    }

    pub fn default_lease_ttl() -> ChronoDuration {
        ChronoDuration::seconds(DEFAULT_LEASE_TTL_SECS)
    }
}

fn parse_nodes(raw: &serde_json::Value) -> Vec<Node> {
    raw.get("nodes")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .enumerate()
                .filter_map(|(i, n)| {
                    Some(Node {
                        node_ref: NodeRef(format!("e{}", i)),
                        backend_node_id: n.get("backendNodeId")?.as_u64()?,
                        selector_hints: n
                            .get("selectorHints")
                            .and_then(|v| v.as_array())
                            .map(|a| a.iter().filter_map(|x| x.as_str().map(str::to_string)).collect())
                            .unwrap_or_default(),
                        role: n.get("role").and_then(|v| v.as_str()).unwrap_or("").to_string(),
                        name: n.get("name").and_then(|v| v.as_str()).unwrap_or("").to_string(),
                        frame_id: n.get("frameId").and_then(|v| v.as_str()).unwrap_or("").to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeTransport {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl DebugProtocolTransport for FakeTransport {
        async fn send_command(&self, method: &str, _params: serde_json::Value) -> Result<serde_json::Value, LoomError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match method {
                "Accessibility.getFullAXTree" => Ok(serde_json::json!({
                    "nodes": [{"backendNodeId": 1, "role": "button", "name": "Submit"}],
                    "frameTree": {"id": "f1"},
                })),
                "Input.click" => Ok(serde_json::json!({"ok": true})),
                "DOM.querySelector" => Ok(serde_json::json!({"matched": true})),
                _ => Ok(serde_json::json!({"matched": false})),
            }
        }
    }

    fn engine() -> ExecutionEngine {
        ExecutionEngine::new(Arc::new(FakeTransport { calls: AtomicUsize::new(0) }))
    }

    #[tokio::test]
    async fn snapshot_builds_ref_to_backend_node_map() {
        let engine = engine();
        let snap = engine.snapshot("tab-1").await.unwrap();
        assert_eq!(snap.nodes.len(), 1);
        assert_eq!(snap.nodes[0].backend_node_id, 1);
    }

    #[tokio::test]
    async fn act_without_a_lease_fails_with_e_lease() {
        let engine = engine();
        engine.snapshot("tab-1").await.unwrap();
        let action = Action::Click { target: ActionTarget { node_ref: Some(NodeRef("e0".into())), selector: None } };
        let err = engine.act("tab-1", "session-a", action).await.unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::ELease));
    }

    #[tokio::test]
    async fn act_with_a_valid_lease_resolves_by_ref() {
        let engine = engine();
        engine.snapshot("tab-1").await.unwrap();
        engine.leases().acquire("tab-1", "session-a", ExecutionEngine::default_lease_ttl()).unwrap();
        let action = Action::Click { target: ActionTarget { node_ref: Some(NodeRef("e0".into())), selector: None } };
        let result = engine.act("tab-1", "session-a", action).await.unwrap();
        assert!(!result.used_fallback_selector);
    }

    #[tokio::test]
    async fn act_falls_back_to_selector_when_ref_is_unknown() {
        let engine = engine();
        engine.snapshot("tab-1").await.unwrap();
        engine.leases().acquire("tab-1", "session-a", ExecutionEngine::default_lease_ttl()).unwrap();
        let action = Action::Click {
            target: ActionTarget { node_ref: Some(NodeRef("e99".into())), selector: Some("#submit".into()) },
        };
        let result = engine.act("tab-1", "session-a", action).await.unwrap();
        assert!(result.used_fallback_selector);
    }

    #[tokio::test]
    async fn verify_succeeds_immediately_when_predicate_already_matches() {
        let engine = engine();
        let (result, _) = engine
            .verify("tab-1", VerifyPredicate::SelectorExists { selector: "#ok".into() }, None, None)
            .await;
        assert!(result.verified);
    }

    #[tokio::test]
    async fn verify_exhausts_window_and_classifies_url_changed_as_hard_failure() {
        let engine = engine();
        let (result, class) = engine
            .verify(
                "tab-1",
                VerifyPredicate::UrlChanged { previous_url: "https://a".into() },
                Some(Duration::from_millis(50)),
                Some(Duration::from_millis(10)),
            )
            .await;
        assert!(!result.verified);
        assert_eq!(class, VerifyFailureClass::HardFailure);
    }
}
