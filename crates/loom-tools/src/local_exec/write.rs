//! `fs.write_text` — write a file, root-confined (spec §4.10).
//!
//! Grounded on the teacher's `write.rs` (overwrite-only,
//! `create_dir_all` for parents), extended with the spec's write modes
//! — overwrite, append, create-only — and a content hash in the
//! result so callers can detect concurrent modification.

use super::guard::PathGuard;
use async_trait::async_trait;
use loom_core::error::{ErrorCode, LoomError};
use loom_core::types::InvocationEnvelope;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
enum WriteMode {
    Overwrite,
    Append,
    Create,
}

impl Default for WriteMode {
    fn default() -> Self {
        WriteMode::Overwrite
    }
}

#[derive(Deserialize)]
struct WriteArgs {
    path: String,
    content: String,
    cwd: Option<String>,
    #[serde(default)]
    mode: WriteMode,
}

pub struct WriteTool {
    guard: Arc<PathGuard>,
}

impl WriteTool {
    pub fn new(guard: Arc<PathGuard>) -> Self {
        Self { guard }
    }
}

#[async_trait]
impl crate::providers::ToolProvider for WriteTool {
    fn provider_id(&self) -> &str {
        "local_exec.write"
    }

    fn scope(&self) -> &str {
        "bridge"
    }

    fn can_handle(&self, target: Option<&str>) -> bool {
        target.map(|t| t.starts_with("local://")).unwrap_or(true)
    }

    async fn invoke(&self, envelope: &InvocationEnvelope) -> Result<Value, LoomError> {
        let args: WriteArgs = serde_json::from_value(envelope.arguments.clone())
            .map_err(|e| LoomError::coded(ErrorCode::EArgs, e.to_string()))?;

        let resolved = self.guard.resolve(&args.path, args.cwd.as_deref())?;

        if args.mode == WriteMode::Create && fs::metadata(&resolved).await.is_ok() {
            return Err(LoomError::coded(
                ErrorCode::EPath,
                format!("{} already exists", args.path),
            ));
        }

        if let Some(parent) = resolved.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| LoomError::coded(ErrorCode::EPath, e.to_string()))?;
        }

        let bytes_written = match args.mode {
            WriteMode::Append => {
                let mut file = fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&resolved)
                    .await
                    .map_err(|e| LoomError::coded(ErrorCode::EPath, e.to_string()))?;
                file.write_all(args.content.as_bytes())
                    .await
                    .map_err(|e| LoomError::coded(ErrorCode::EPath, e.to_string()))?;
                args.content.len()
            }
            WriteMode::Overwrite | WriteMode::Create => {
                fs::write(&resolved, &args.content)
                    .await
                    .map_err(|e| LoomError::coded(ErrorCode::EPath, e.to_string()))?;
                args.content.len()
            }
        };

        let digest = content_digest(args.content.as_bytes());

        Ok(serde_json::json!({
            "bytesWritten": bytes_written,
            "contentHash": digest,
            "mode": match args.mode {
                WriteMode::Overwrite => "overwrite",
                WriteMode::Append => "append",
                WriteMode::Create => "create",
            },
        }))
    }
}

/// FNV-1a: cheap, deterministic, good enough for a change-detection
/// fingerprint — not a security primitive.
fn content_digest(bytes: &[u8]) -> String {
    let mut hash: u64 = 0xcbf29ce484222325;
    for b in bytes {
        hash ^= *b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    format!("{:016x}", hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ToolProvider;

    fn test_dir() -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "loom-write-test-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn envelope(args: Value) -> InvocationEnvelope {
        InvocationEnvelope {
            invocation_id: "i1".into(),
            session_id: "s1".into(),
            parent_session_id: None,
            agent_id: None,
            requested_tool_name: "write_file".into(),
            canonical_tool_name: "fs.write_text".into(),
            arguments: args,
            fingerprint: "f".into(),
        }
    }

    #[tokio::test]
    async fn overwrite_replaces_existing_content() {
        let dir = test_dir();
        std::fs::write(dir.join("a.txt"), "old").unwrap();
        let guard = Arc::new(PathGuard::new(vec![dir.clone()], true));
        let tool = WriteTool::new(guard);
        tool.invoke(&envelope(serde_json::json!({"path": "a.txt", "content": "new"})))
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(dir.join("a.txt")).unwrap(), "new");
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn append_mode_adds_to_existing_content() {
        let dir = test_dir();
        std::fs::write(dir.join("a.txt"), "hello").unwrap();
        let guard = Arc::new(PathGuard::new(vec![dir.clone()], true));
        let tool = WriteTool::new(guard);
        tool.invoke(&envelope(
            serde_json::json!({"path": "a.txt", "content": " world", "mode": "append"}),
        ))
        .await
        .unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.join("a.txt")).unwrap(),
            "hello world"
        );
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn create_mode_fails_if_file_exists() {
        let dir = test_dir();
        std::fs::write(dir.join("a.txt"), "existing").unwrap();
        let guard = Arc::new(PathGuard::new(vec![dir.clone()], true));
        let tool = WriteTool::new(guard);
        let err = tool
            .invoke(&envelope(
                serde_json::json!({"path": "a.txt", "content": "x", "mode": "create"}),
            ))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::EPath));
        std::fs::remove_dir_all(&dir).ok();
    }
}
