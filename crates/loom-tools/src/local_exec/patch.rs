//! `fs.patch_text` — apply a unified diff to a file, root-confined
//! (spec §4.10).
//!
//! Grounded on the teacher's `edit.rs` (exact-string find/replace),
//! generalized to real unified-diff hunks: `@@ -a,b +c,d @@` headers,
//! context/delete line validation against the file's current content,
//! and rejection of overlapping or non-matching hunks with `E_PATCH`.

use super::guard::PathGuard;
use async_trait::async_trait;
use loom_core::error::{ErrorCode, LoomError};
use loom_core::types::InvocationEnvelope;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::fs;

#[derive(Deserialize)]
struct PatchArgs {
    path: String,
    patch: String,
    cwd: Option<String>,
}

pub struct PatchTool {
    guard: Arc<PathGuard>,
}

impl PatchTool {
    pub fn new(guard: Arc<PathGuard>) -> Self {
        Self { guard }
    }
}

#[async_trait]
impl crate::providers::ToolProvider for PatchTool {
    fn provider_id(&self) -> &str {
        "local_exec.patch"
    }

    fn scope(&self) -> &str {
        "bridge"
    }

    fn can_handle(&self, target: Option<&str>) -> bool {
        target.map(|t| t.starts_with("local://")).unwrap_or(true)
    }

    async fn invoke(&self, envelope: &InvocationEnvelope) -> Result<Value, LoomError> {
        let args: PatchArgs = serde_json::from_value(envelope.arguments.clone())
            .map_err(|e| LoomError::coded(ErrorCode::EArgs, e.to_string()))?;

        let resolved = self.guard.resolve(&args.path, args.cwd.as_deref())?;
        let original = fs::read_to_string(&resolved)
            .await
            .map_err(|e| LoomError::coded(ErrorCode::EPath, e.to_string()))?;

        let hunks = parse_hunks(&args.patch)?;
        let patched = apply_hunks(&original, &hunks)?;

        fs::write(&resolved, &patched)
            .await
            .map_err(|e| LoomError::coded(ErrorCode::EPath, e.to_string()))?;

        Ok(serde_json::json!({
            "hunksApplied": hunks.len(),
            "bytesWritten": patched.len(),
        }))
    }
}

#[derive(Debug, PartialEq)]
enum HunkLine {
    Context(String),
    Delete(String),
    Add(String),
}

#[derive(Debug)]
struct Hunk {
    old_start: usize,
    lines: Vec<HunkLine>,
}

/// Parse a minimal unified diff: one or more `@@ -a,b +c,d @@` headers
/// followed by ` `/`-`/`+`-prefixed lines. File headers (`---`/`+++`)
/// are skipped if present.
fn parse_hunks(diff: &str) -> Result<Vec<Hunk>, LoomError> {
    let mut hunks = Vec::new();
    let mut current: Option<Hunk> = None;

    for line in diff.lines() {
        if line.starts_with("--- ") || line.starts_with("+++ ") {
            continue;
        }
        if let Some(rest) = line.strip_prefix("@@ ") {
            if let Some(h) = current.take() {
                hunks.push(h);
            }
            let old_start = parse_hunk_header(rest)?;
            current = Some(Hunk { old_start, lines: Vec::new() });
            continue;
        }
        let hunk = current
            .as_mut()
            .ok_or_else(|| LoomError::coded(ErrorCode::EPatch, "diff body before any @@ header"))?;
        if let Some(text) = line.strip_prefix(' ') {
            hunk.lines.push(HunkLine::Context(text.to_string()));
        } else if let Some(text) = line.strip_prefix('-') {
            hunk.lines.push(HunkLine::Delete(text.to_string()));
        } else if let Some(text) = line.strip_prefix('+') {
            hunk.lines.push(HunkLine::Add(text.to_string()));
        } else if line.is_empty() {
            hunk.lines.push(HunkLine::Context(String::new()));
        } else {
            return Err(LoomError::coded(
                ErrorCode::EPatch,
                format!("malformed diff line: {}", line),
            ));
        }
    }
    if let Some(h) = current.take() {
        hunks.push(h);
    }
    if hunks.is_empty() {
        return Err(LoomError::coded(ErrorCode::EPatch, "diff contains no hunks"));
    }

    for pair in hunks.windows(2) {
        let prev_end = pair[0].old_start
            + pair[0]
                .lines
                .iter()
                .filter(|l| !matches!(l, HunkLine::Add(_)))
                .count();
        if pair[1].old_start < prev_end {
            return Err(LoomError::coded(ErrorCode::EPatch, "overlapping hunks"));
        }
    }

    Ok(hunks)
}

fn parse_hunk_header(rest: &str) -> Result<usize, LoomError> {
    // rest looks like "-a,b +c,d @@..."
    let old_field = rest
        .split_whitespace()
        .next()
        .ok_or_else(|| LoomError::coded(ErrorCode::EPatch, "malformed hunk header"))?;
    let old_field = old_field.strip_prefix('-').ok_or_else(|| {
        LoomError::coded(ErrorCode::EPatch, "hunk header missing '-' old range")
    })?;
    let start_str = old_field.split(',').next().unwrap_or(old_field);
    start_str
        .parse::<usize>()
        .map(|n| n.saturating_sub(1))
        .map_err(|_| LoomError::coded(ErrorCode::EPatch, "hunk header old range not numeric"))
}

fn apply_hunks(original: &str, hunks: &[Hunk]) -> Result<String, LoomError> {
    let source_lines: Vec<&str> = original.lines().collect();
    let mut out: Vec<String> = Vec::new();
    let mut cursor = 0usize;

    for hunk in hunks {
        if hunk.old_start < cursor || hunk.old_start > source_lines.len() {
            return Err(LoomError::coded(
                ErrorCode::EPatch,
                "hunk does not align with file content",
            ));
        }
        out.extend(source_lines[cursor..hunk.old_start].iter().map(|s| s.to_string()));
        let mut pos = hunk.old_start;
        for line in &hunk.lines {
            match line {
                HunkLine::Context(text) => {
                    let actual = source_lines.get(pos).copied().unwrap_or("");
                    if actual != text {
                        return Err(LoomError::coded(
                            ErrorCode::EPatch,
                            format!("context mismatch at line {}", pos + 1),
                        ));
                    }
                    out.push(text.clone());
                    pos += 1;
                }
                HunkLine::Delete(text) => {
                    let actual = source_lines.get(pos).copied().unwrap_or("");
                    if actual != text {
                        return Err(LoomError::coded(
                            ErrorCode::EPatch,
                            format!("delete line mismatch at line {}", pos + 1),
                        ));
                    }
                    pos += 1;
                }
                HunkLine::Add(text) => {
                    out.push(text.clone());
                }
            }
        }
        cursor = pos;
    }
    out.extend(source_lines[cursor..].iter().map(|s| s.to_string()));

    let mut result = out.join("\n");
    if original.ends_with('\n') {
        result.push('\n');
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ToolProvider;

    fn test_dir() -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "loom-patch-test-{}-{}",
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
            requested_tool_name: "edit_file".into(),
            canonical_tool_name: "fs.patch_text".into(),
            arguments: args,
            fingerprint: "f".into(),
        }
    }

    #[tokio::test]
    async fn applies_a_simple_hunk() {
        let dir = test_dir();
        std::fs::write(dir.join("a.txt"), "one\ntwo\nthree\n").unwrap();
        let guard = Arc::new(PathGuard::new(vec![dir.clone()], true));
        let tool = PatchTool::new(guard);
        let diff = "@@ -2,1 +2,1 @@\n-two\n+TWO\n";
        tool.invoke(&envelope(serde_json::json!({"path": "a.txt", "patch": diff})))
            .await
            .unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.join("a.txt")).unwrap(),
            "one\nTWO\nthree\n"
        );
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn rejects_mismatched_context() {
        let dir = test_dir();
        std::fs::write(dir.join("a.txt"), "one\ntwo\nthree\n").unwrap();
        let guard = Arc::new(PathGuard::new(vec![dir.clone()], true));
        let tool = PatchTool::new(guard);
        let diff = "@@ -2,1 +2,1 @@\n-WRONG\n+TWO\n";
        let err = tool
            .invoke(&envelope(serde_json::json!({"path": "a.txt", "patch": diff})))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::EPatch));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn rejects_overlapping_hunks() {
        let diff = "@@ -1,2 +1,2 @@\n context\n-old\n+new\n@@ -2,1 +2,1 @@\n-x\n+y\n";
        let err = parse_hunks(diff).unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::EPatch));
    }
}
