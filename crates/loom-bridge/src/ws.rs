//! WebSocket connection loop: one socket per connection, duplex invoke
//! dispatch with auth gating, concurrency gating and fingerprint dedup.
//!
//! Grounded on the teacher's `ws.rs` (socket split, `tokio::select!`
//! over incoming messages and a broadcast receiver, lagged/closed
//! handling) — restructured around the invoke/event frame schema in
//! spec §6 rather than the teacher's JSON-RPC method namespace, and
//! with the legacy v2 protocol dropped entirely.

use crate::auth::ResolvedAuth;
use crate::dedup::{FingerprintCache, Lookup, Outcome};
use crate::gate::ConcurrencyGate;
use crate::invoker::BridgeInvoker;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures::{SinkExt, StreamExt};
use loom_core::error::ErrorCode;
use loom_core::protocol::{
    canonical_tool_name, BridgeEvent, BridgeEventName, InvokeFailure, InvokeRequest, InvokeSuccess,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

pub struct BridgeState {
    pub auth: ResolvedAuth,
    pub invoker: Arc<dyn BridgeInvoker>,
    pub gate: Arc<ConcurrencyGate>,
    pub dedup: Arc<FingerprintCache>,
    /// Broadcast channel for lifecycle events — every connection
    /// subscribes and relays them to its client.
    pub events: broadcast::Sender<BridgeEvent>,
}

pub async fn handle_connection(socket: WebSocket, state: Arc<BridgeState>, origin: Option<String>) {
    if let Err(e) = state.auth.verify_origin(origin.as_deref()) {
        warn!("rejecting connection: {}", e);
        return;
    }

    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut events_rx = state.events.subscribe();
    let mut authenticated = state.auth_is_open();

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(WsMessage::Text(text))) => {
                        let responses = handle_text_message(&text, &state, &mut authenticated).await;
                        for json in responses {
                            if ws_tx.send(WsMessage::Text(json)).await.is_err() {
                                return;
                            }
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) => {
                        info!("client disconnected");
                        return;
                    }
                    Some(Ok(WsMessage::Ping(payload))) => {
                        let _ = ws_tx.send(WsMessage::Pong(payload)).await;
                    }
                    Some(Err(e)) => {
                        warn!("websocket error: {}", e);
                        return;
                    }
                    None => return,
                    _ => {}
                }
            }

            event = events_rx.recv() => {
                match event {
                    Ok(event) => {
                        if let Ok(json) = serde_json::to_string(&event) {
                            if ws_tx.send(WsMessage::Text(json)).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("client lagged, dropped {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        }
    }
}

impl BridgeState {
    fn auth_is_open(&self) -> bool {
        self.auth.verify_token(None).is_ok()
    }
}

async fn handle_text_message(
    text: &str,
    state: &Arc<BridgeState>,
    authenticated: &mut bool,
) -> Vec<String> {
    let req: InvokeRequest = match serde_json::from_str(text) {
        Ok(req) => req,
        Err(e) => {
            warn!("unparseable invoke frame: {}", e);
            return Vec::new();
        }
    };

    if !*authenticated {
        match extract_auth_token(text) {
            Some(token) if state.auth.verify_token(Some(&token)).is_ok() => *authenticated = true,
            _ => {
                let failure = InvokeFailure::new(&req.id, ErrorCode::EArgs, "not authenticated");
                return vec![serde_json::to_string(&failure).unwrap_or_default()];
            }
        }
    }

    vec![dispatch_invoke(req, state).await]
}

/// Invoke frames carry their token as a top-level `token` field rather
/// than a separate auth handshake message (spec §6).
fn extract_auth_token(text: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    value.get("token")?.as_str().map(str::to_string)
}

async fn dispatch_invoke(req: InvokeRequest, state: &Arc<BridgeState>) -> String {
    let tool = canonical_tool_name(&req.tool).to_string();
    let session_key = req.session_id.as_deref().unwrap_or("");
    let fingerprint = FingerprintCache::fingerprint(&tool, &req.args, req.session_id.as_deref());

    match state.dedup.lookup(session_key, &req.id, &fingerprint) {
        Lookup::Replay(outcome) => {
            let _ = state.events.send(BridgeEvent::finished(&req.id, true, true));
            return render_outcome(&req.id, outcome);
        }
        Lookup::Mismatch => {
            let failure = InvokeFailure::new(&req.id, ErrorCode::EArgs, "invocation id reused with different arguments");
            return serde_json::to_string(&failure).unwrap_or_default();
        }
        Lookup::Fresh => {}
    }

    let permit = match state.gate.try_acquire() {
        Ok(permit) => permit,
        Err(e) => {
            let code = e.code().unwrap_or(ErrorCode::EBusy);
            let failure = InvokeFailure::new(&req.id, code, e.to_string());
            return serde_json::to_string(&failure).unwrap_or_default();
        }
    };

    let _ = state.events.send(BridgeEvent::new(
        BridgeEventName::InvokeStarted,
        &req.id,
        serde_json::json!({ "tool": tool }),
    ));

    let result = state
        .invoker
        .invoke(&tool, req.args.clone(), req.session_id.as_deref())
        .await;
    drop(permit);

    let _ = state.events.send(BridgeEvent::finished(&req.id, false, false));

    match result {
        Ok(data) => {
            state.dedup.record(session_key, &req.id, &fingerprint, Outcome::Success(data.clone()));
            serde_json::to_string(&InvokeSuccess::new(&req.id, data)).unwrap_or_default()
        }
        Err(e) => {
            let code = e.code().unwrap_or(ErrorCode::EArgs);
            state.dedup.record(session_key, &req.id, &fingerprint, Outcome::Failure(code, e.to_string()));
            serde_json::to_string(&InvokeFailure::new(&req.id, code, e.to_string())).unwrap_or_default()
        }
    }
}

fn render_outcome(id: &str, outcome: Outcome) -> String {
    match outcome {
        Outcome::Success(data) => serde_json::to_string(&InvokeSuccess::new(id, data)).unwrap_or_default(),
        Outcome::Failure(code, message) => serde_json::to_string(&InvokeFailure::new(id, code, message)).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use loom_core::config::BridgeAuthConfig;
    use loom_core::error::LoomError;
    use std::time::Duration;

    struct EchoInvoker;

    #[async_trait]
    impl BridgeInvoker for EchoInvoker {
        async fn invoke(
            &self,
            _tool: &str,
            args: serde_json::Value,
            _session_id: Option<&str>,
        ) -> Result<serde_json::Value, LoomError> {
            Ok(args)
        }
    }

    fn test_state() -> Arc<BridgeState> {
        let (events, _rx) = broadcast::channel(16);
        Arc::new(BridgeState {
            auth: ResolvedAuth::from_config(&BridgeAuthConfig::default()),
            invoker: Arc::new(EchoInvoker),
            gate: Arc::new(ConcurrencyGate::new(4)),
            dedup: Arc::new(FingerprintCache::new(Duration::from_secs(30), 64)),
            events,
        })
    }

    #[tokio::test]
    async fn dispatch_invoke_echoes_args_on_success() {
        let state = test_state();
        let req = InvokeRequest {
            kind: loom_core::protocol::InvokeRequestKind::Invoke,
            id: "1".into(),
            tool: "bash".into(),
            args: serde_json::json!({"x": 1}),
            session_id: None,
            parent_session_id: None,
            agent_id: None,
        };
        let json = dispatch_invoke(req, &state).await;
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["ok"], true);
        assert_eq!(value["data"]["x"], 1);
    }

    #[tokio::test]
    async fn replaying_the_same_invocation_id_returns_the_original_result() {
        let state = test_state();
        let req = InvokeRequest {
            kind: loom_core::protocol::InvokeRequestKind::Invoke,
            id: "1".into(),
            tool: "command.run".into(),
            args: serde_json::json!({"command": "ls"}),
            session_id: Some("s1".into()),
            parent_session_id: None,
            agent_id: None,
        };
        let first = dispatch_invoke(req.clone(), &state).await;
        let second = dispatch_invoke(req, &state).await;
        let first_value: serde_json::Value = serde_json::from_str(&first).unwrap();
        let second_value: serde_json::Value = serde_json::from_str(&second).unwrap();
        assert_eq!(first_value["data"], second_value["data"]);
        assert_eq!(second_value["data"]["command"], "ls");
    }

    #[tokio::test]
    async fn reusing_an_invocation_id_with_different_arguments_is_rejected() {
        let state = test_state();
        let req = |args: serde_json::Value| InvokeRequest {
            kind: loom_core::protocol::InvokeRequestKind::Invoke,
            id: "1".into(),
            tool: "command.run".into(),
            args,
            session_id: Some("s1".into()),
            parent_session_id: None,
            agent_id: None,
        };
        let _ = dispatch_invoke(req(serde_json::json!({"command": "ls"})), &state).await;
        let second = dispatch_invoke(req(serde_json::json!({"command": "pwd"})), &state).await;
        let value: serde_json::Value = serde_json::from_str(&second).unwrap();
        assert_eq!(value["ok"], false);
        assert_eq!(value["error"]["code"], "EArgs");
    }

    #[tokio::test]
    async fn invoke_past_concurrency_cap_fails_with_e_busy() {
        let (events, _rx) = broadcast::channel(16);
        let state = Arc::new(BridgeState {
            auth: ResolvedAuth::from_config(&BridgeAuthConfig::default()),
            invoker: Arc::new(EchoInvoker),
            gate: Arc::new(ConcurrencyGate::new(1)),
            dedup: Arc::new(FingerprintCache::new(Duration::from_secs(30), 64)),
            events,
        });
        let _permit = state.gate.try_acquire().unwrap();
        let req = InvokeRequest {
            kind: loom_core::protocol::InvokeRequestKind::Invoke,
            id: "1".into(),
            tool: "bash".into(),
            args: serde_json::json!({}),
            session_id: None,
            parent_session_id: None,
            agent_id: None,
        };
        let json = dispatch_invoke(req, &state).await;
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["ok"], false);
        assert_eq!(value["error"]["code"], "EBusy");
    }
}
