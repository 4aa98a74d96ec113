//! `fs.read_text` — read a file, root-confined (spec §4.10).
//!
//! Grounded on the teacher's `read.rs` tool (line-numbered read with
//! offset/limit), adapted to the local-executor contract: whole-content
//! byte slicing with a truncated flag, rather than line slicing for an
//! LLM-facing chat tool.

use super::guard::PathGuard;
use async_trait::async_trait;
use loom_core::error::{ErrorCode, LoomError};
use loom_core::types::InvocationEnvelope;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::fs;

const DEFAULT_LIMIT: usize = 256 * 1024;

#[derive(Deserialize)]
struct ReadArgs {
    path: String,
    cwd: Option<String>,
    limit: Option<usize>,
    offset: Option<usize>,
}

pub struct ReadTool {
    guard: Arc<PathGuard>,
}

impl ReadTool {
    pub fn new(guard: Arc<PathGuard>) -> Self {
        Self { guard }
    }
}

#[async_trait]
impl crate::providers::ToolProvider for ReadTool {
    fn provider_id(&self) -> &str {
        "local_exec.read"
    }

    fn scope(&self) -> &str {
        "bridge"
    }

    fn can_handle(&self, target: Option<&str>) -> bool {
        target.map(|t| t.starts_with("local://")).unwrap_or(true)
    }

    async fn invoke(&self, envelope: &InvocationEnvelope) -> Result<Value, LoomError> {
        let args: ReadArgs = serde_json::from_value(envelope.arguments.clone())
            .map_err(|e| LoomError::coded(ErrorCode::EArgs, e.to_string()))?;

        let resolved = self.guard.resolve(&args.path, args.cwd.as_deref())?;
        let bytes = fs::read(&resolved)
            .await
            .map_err(|e| LoomError::coded(ErrorCode::EPath, e.to_string()))?;

        let limit = args.limit.unwrap_or(DEFAULT_LIMIT);
        let offset = args.offset.unwrap_or(0).min(bytes.len());
        let end = (offset + limit).min(bytes.len());
        let truncated = end < bytes.len();
        let content = String::from_utf8_lossy(&bytes[offset..end]).to_string();

        Ok(serde_json::json!({
            "content": content,
            "size": bytes.len(),
            "truncated": truncated,
            "limit": limit,
        }))
    }
}
