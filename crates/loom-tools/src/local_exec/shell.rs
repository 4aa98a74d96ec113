//! `command.run` — execute a whitelisted command (spec §4.10).
//!
//! Grounded on the teacher's `bash.rs` (cancellable spawn with
//! `kill_on_drop`, output truncation), restricted to a canonical
//! command id resolved through [`CommandWhitelist`] instead of an
//! arbitrary shell string, with argument validation and byte-capped
//! stdout/stderr.

use super::whitelist::{CommandRisk, CommandWhitelist};
use async_trait::async_trait;
use loom_core::error::{ErrorCode, LoomError};
use loom_core::types::InvocationEnvelope;
use serde::Deserialize;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;

const MAX_OUTPUT_BYTES: usize = 64 * 1024;
const MAX_ARG_LEN: usize = 2048;
const DEFAULT_TIMEOUT_MS: u64 = 30_000;

#[derive(Deserialize)]
struct RunArgs {
    #[serde(rename = "commandId")]
    command_id: String,
    #[serde(default)]
    argv: Vec<String>,
    #[serde(rename = "timeoutMs")]
    timeout_ms: Option<u64>,
}

pub struct ShellTool {
    whitelist: Arc<CommandWhitelist>,
    workspace_root: PathBuf,
    strict: bool,
}

impl ShellTool {
    pub fn new(whitelist: Arc<CommandWhitelist>, workspace_root: PathBuf, strict: bool) -> Self {
        Self { whitelist, workspace_root, strict }
    }
}

#[async_trait]
impl crate::providers::ToolProvider for ShellTool {
    fn provider_id(&self) -> &str {
        "local_exec.shell"
    }

    fn scope(&self) -> &str {
        "bridge"
    }

    fn can_handle(&self, target: Option<&str>) -> bool {
        target.map(|t| t.starts_with("local://")).unwrap_or(true)
    }

    async fn invoke(&self, envelope: &InvocationEnvelope) -> Result<Value, LoomError> {
        let args: RunArgs = serde_json::from_value(envelope.arguments.clone())
            .map_err(|e| LoomError::coded(ErrorCode::EArgs, e.to_string()))?;

        let entry = self.whitelist.get(&args.command_id).ok_or_else(|| {
            LoomError::coded(ErrorCode::ECmd, format!("unknown command id '{}'", args.command_id))
        })?;

        if self.strict && !entry.allow_in_strict {
            return Err(LoomError::coded(
                ErrorCode::ECmd,
                format!("command '{}' is disallowed in strict mode", args.command_id),
            ));
        }

        if args.argv.len() > entry.max_user_args {
            return Err(LoomError::coded(
                ErrorCode::EArgs,
                format!(
                    "command '{}' accepts at most {} user arguments, got {}",
                    args.command_id,
                    entry.max_user_args,
                    args.argv.len()
                ),
            ));
        }
        for a in &args.argv {
            if a.len() > MAX_ARG_LEN {
                return Err(LoomError::coded(ErrorCode::EArgs, "argument exceeds length cap"));
            }
            if a.contains('\0') {
                return Err(LoomError::coded(ErrorCode::EArgs, "argument contains NUL byte"));
            }
        }

        let timeout_ms = args.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS).min(120_000);

        let mut cmd = Command::new(&entry.executable);
        cmd.args(&entry.static_args)
            .args(&args.argv)
            .current_dir(&self.workspace_root)
            .kill_on_drop(true);

        let start = std::time::Instant::now();
        let run = async { cmd.output().await };

        let output = match tokio::time::timeout(Duration::from_millis(timeout_ms), run).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(LoomError::coded(ErrorCode::ECmd, e.to_string()));
            }
            Err(_) => {
                return Err(LoomError::coded(
                    ErrorCode::ETimeout,
                    format!("command '{}' did not complete within {}ms", args.command_id, timeout_ms),
                ));
            }
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        let (stdout, stdout_truncated) = cap_output(&output.stdout);
        let (stderr, stderr_truncated) = cap_output(&output.stderr);

        Ok(serde_json::json!({
            "exitCode": output.status.code(),
            "stdout": stdout,
            "stderr": stderr,
            "truncated": stdout_truncated || stderr_truncated,
            "durationMs": duration_ms,
            "risk": risk_str(entry.risk),
        }))
    }
}

fn risk_str(risk: CommandRisk) -> &'static str {
    match risk {
        CommandRisk::Low => "low",
        CommandRisk::Medium => "medium",
        CommandRisk::High => "high",
    }
}

fn cap_output(bytes: &[u8]) -> (String, bool) {
    if bytes.len() <= MAX_OUTPUT_BYTES {
        (String::from_utf8_lossy(bytes).to_string(), false)
    } else {
        (String::from_utf8_lossy(&bytes[..MAX_OUTPUT_BYTES]).to_string(), true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ToolProvider;
    use super::super::whitelist::CommandEntry;

    fn envelope(args: Value) -> InvocationEnvelope {
        InvocationEnvelope {
            invocation_id: "i1".into(),
            session_id: "s1".into(),
            parent_session_id: None,
            agent_id: None,
            requested_tool_name: "bash".into(),
            canonical_tool_name: "command.run".into(),
            arguments: args,
            fingerprint: "f".into(),
        }
    }

    fn whitelist_with_echo() -> Arc<CommandWhitelist> {
        let mut wl = CommandWhitelist::new();
        wl.register(
            "echo.test",
            CommandEntry {
                executable: "echo".into(),
                static_args: vec![],
                max_user_args: 2,
                risk: CommandRisk::Low,
                allow_in_strict: true,
            },
        );
        Arc::new(wl)
    }

    fn whitelist_with_sleep() -> Arc<CommandWhitelist> {
        let mut wl = CommandWhitelist::new();
        wl.register(
            "sleep.test",
            CommandEntry {
                executable: "sleep".into(),
                static_args: vec![],
                max_user_args: 1,
                risk: CommandRisk::Low,
                allow_in_strict: true,
            },
        );
        Arc::new(wl)
    }

    #[tokio::test]
    async fn runs_whitelisted_command_and_captures_stdout() {
        let tool = ShellTool::new(whitelist_with_echo(), std::env::temp_dir(), false);
        let result = tool
            .invoke(&envelope(serde_json::json!({"commandId": "echo.test", "argv": ["hi"]})))
            .await
            .unwrap();
        assert_eq!(result["exitCode"], 0);
        assert!(result["stdout"].as_str().unwrap().contains("hi"));
    }

    #[tokio::test]
    async fn unknown_command_id_is_rejected() {
        let tool = ShellTool::new(whitelist_with_echo(), std::env::temp_dir(), false);
        let err = tool
            .invoke(&envelope(serde_json::json!({"commandId": "rm.rf"})))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::ECmd));
    }

    #[tokio::test]
    async fn exceeding_max_user_args_is_rejected() {
        let tool = ShellTool::new(whitelist_with_echo(), std::env::temp_dir(), false);
        let err = tool
            .invoke(&envelope(
                serde_json::json!({"commandId": "echo.test", "argv": ["a", "b", "c"]}),
            ))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::EArgs));
    }

    #[tokio::test]
    async fn nul_byte_in_argument_is_rejected() {
        let tool = ShellTool::new(whitelist_with_echo(), std::env::temp_dir(), false);
        let err = tool
            .invoke(&envelope(
                serde_json::json!({"commandId": "echo.test", "argv": ["a\0b"]}),
            ))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::EArgs));
    }

    #[tokio::test]
    async fn argument_at_the_length_cap_succeeds() {
        let tool = ShellTool::new(whitelist_with_echo(), std::env::temp_dir(), false);
        let arg = "a".repeat(MAX_ARG_LEN);
        let result = tool
            .invoke(&envelope(serde_json::json!({"commandId": "echo.test", "argv": [arg]})))
            .await
            .unwrap();
        assert_eq!(result["exitCode"], 0);
    }

    #[tokio::test]
    async fn argument_one_byte_past_the_length_cap_is_rejected() {
        let tool = ShellTool::new(whitelist_with_echo(), std::env::temp_dir(), false);
        let arg = "a".repeat(MAX_ARG_LEN + 1);
        let err = tool
            .invoke(&envelope(serde_json::json!({"commandId": "echo.test", "argv": [arg]})))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::EArgs));
    }

    #[tokio::test]
    async fn timeout_shorter_than_the_command_raises_e_timeout() {
        let tool = ShellTool::new(whitelist_with_sleep(), std::env::temp_dir(), false);
        let err = tool
            .invoke(&envelope(serde_json::json!({"commandId": "sleep.test", "argv": ["2"], "timeoutMs": 200})))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::ETimeout));
    }
}
