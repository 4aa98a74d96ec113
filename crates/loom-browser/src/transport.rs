//! The debugging-protocol transport seam, plus a WebSocket-backed
//! implementation over the protocol's JSON command/response framing
//! (`{id, method, params}` request, `{id, result}`/`{id, error}`
//! response) — the shape every CDP-like debugging protocol shares.
//!
//! `loom-browser` never reinvents the protocol's command vocabulary
//! (spec §1 Non-goals); this is just the request/response correlation
//! every such protocol needs over a single duplex socket.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use loom_core::error::{ErrorCode, LoomError};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

#[async_trait]
pub trait DebugProtocolTransport: Send + Sync {
    /// Send a debugging-protocol command and await its result.
    async fn send_command(&self, method: &str, params: Value) -> Result<Value, LoomError>;
}

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;
type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value, LoomError>>>>>;

/// Correlates request ids against responses arriving on a background
/// read task, the way a JSON-RPC-over-websocket client must.
pub struct CdpTransport {
    next_id: AtomicU64,
    pending: Pending,
    writer: Mutex<futures::stream::SplitSink<WsStream, Message>>,
}

impl CdpTransport {
    pub async fn connect(url: &str) -> Result<Self, LoomError> {
        let (stream, _) = connect_async(url)
            .await
            .map_err(|e| LoomError::coded(ErrorCode::ETimeout, format!("debug protocol connect failed: {e}")))?;
        let (writer, mut reader) = stream.split();
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));

        let pending_reader = pending.clone();
        tokio::spawn(async move {
            while let Some(msg) = reader.next().await {
                let Ok(Message::Text(text)) = msg else { continue };
                let Ok(value) = serde_json::from_str::<Value>(&text) else { continue };
                let Some(id) = value.get("id").and_then(|v| v.as_u64()) else { continue };
                let mut pending = pending_reader.lock().await;
                if let Some(tx) = pending.remove(&id) {
                    let result = match value.get("error") {
                        Some(err) => Err(LoomError::coded(
                            ErrorCode::ETimeout,
                            err.get("message").and_then(|m| m.as_str()).unwrap_or("debug protocol error").to_string(),
                        )),
                        None => Ok(value.get("result").cloned().unwrap_or(Value::Null)),
                    };
                    let _ = tx.send(result);
                }
            }
        });

        Ok(Self { next_id: AtomicU64::new(1), pending, writer: Mutex::new(writer) })
    }
}

#[async_trait]
impl DebugProtocolTransport for CdpTransport {
    async fn send_command(&self, method: &str, params: Value) -> Result<Value, LoomError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let frame = serde_json::json!({ "id": id, "method": method, "params": params });
        let mut writer = self.writer.lock().await;
        writer
            .send(Message::Text(frame.to_string()))
            .await
            .map_err(|e| LoomError::coded(ErrorCode::ETimeout, format!("debug protocol send failed: {e}")))?;
        drop(writer);

        rx.await.map_err(|_| LoomError::coded(ErrorCode::ETimeout, "debug protocol connection closed"))?
    }
}
