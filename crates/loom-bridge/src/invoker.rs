//! The abstraction the bridge dispatches invokes through.
//!
//! The bridge is protocol-level: it knows auth, framing, concurrency and
//! dedup, but not how a tool call actually executes. `loom-agent` (or,
//! in tests, a stub) supplies the real implementation, typically backed
//! by `loom-tools`'s provider registry and `loom-hooks`'s hook runner.

use async_trait::async_trait;
use loom_core::error::LoomError;
use serde_json::Value;

#[async_trait]
pub trait BridgeInvoker: Send + Sync {
    async fn invoke(
        &self,
        tool: &str,
        args: Value,
        session_id: Option<&str>,
    ) -> Result<Value, LoomError>;
}
