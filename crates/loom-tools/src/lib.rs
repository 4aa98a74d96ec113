//! Tool contracts, capability routing, and the local executor.
//!
//! Three layers, per the runtime's tool model: [`contracts`] holds the
//! LLM-facing declarations (canonical names, aliases, schemas),
//! [`providers`] routes a capability to a concrete implementation by
//! priority and predicate, and [`local_exec`] is the one provider group
//! this crate ships — whitelisted file and command access confined to
//! a workspace root.

pub mod contracts;
pub mod local_exec;
pub mod providers;

pub use contracts::ToolContractRegistry;
pub use providers::{ToolProvider, ToolProviderRegistry};

use loom_core::types::{CapabilityPolicy, ToolContract, VerifyPolicy};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Everything needed to route and execute the built-in local tools.
pub struct LocalToolStack {
    pub contracts: ToolContractRegistry,
    pub providers: ToolProviderRegistry,
}

/// Wire up the four local-executor capabilities (`fs.read_text`,
/// `fs.write_text`, `fs.patch_text`, `command.run`) against a single
/// workspace root, registering their contracts and policies and
/// binding one in-process provider each.
pub async fn create_local_tool_stack(workspace_root: impl AsRef<Path>, strict: bool) -> LocalToolStack {
    let root: PathBuf = workspace_root.as_ref().to_path_buf();
    let guard = Arc::new(local_exec::PathGuard::new(vec![root.clone()], strict));
    let whitelist = Arc::new(local_exec::CommandWhitelist::with_defaults());

    let mut contracts = ToolContractRegistry::new();
    let providers = ToolProviderRegistry::new();

    register_fs_tool(
        &mut contracts,
        &providers,
        "fs.read_text",
        &["read_file"],
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {"type": "string"},
                "cwd": {"type": "string"},
            },
            "required": ["path"],
        }),
        CapabilityPolicy {
            requires_lease: false,
            verify_policy: VerifyPolicy::Never,
            mutating: false,
            max_retries: 2,
            signature_class: "fs.read".into(),
        },
        Arc::new(local_exec::ReadTool::new(guard.clone())),
    )
    .await;

    register_fs_tool(
        &mut contracts,
        &providers,
        "fs.write_text",
        &["write_file"],
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {"type": "string"},
                "content": {"type": "string"},
                "cwd": {"type": "string"},
            },
            "required": ["path", "content"],
        }),
        CapabilityPolicy {
            requires_lease: false,
            verify_policy: VerifyPolicy::OnCritical,
            mutating: true,
            max_retries: 1,
            signature_class: "fs.write".into(),
        },
        Arc::new(local_exec::WriteTool::new(guard.clone())),
    )
    .await;

    register_fs_tool(
        &mut contracts,
        &providers,
        "fs.patch_text",
        &["edit_file"],
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {"type": "string"},
                "patch": {"type": "string", "description": "a unified diff"},
                "cwd": {"type": "string"},
            },
            "required": ["path", "patch"],
        }),
        CapabilityPolicy {
            requires_lease: false,
            verify_policy: VerifyPolicy::OnCritical,
            mutating: true,
            max_retries: 1,
            signature_class: "fs.write".into(),
        },
        Arc::new(local_exec::PatchTool::new(guard.clone())),
    )
    .await;

    register_fs_tool(
        &mut contracts,
        &providers,
        "command.run",
        &["bash"],
        serde_json::json!({
            "type": "object",
            "properties": {
                "commandId": {"type": "string", "description": "a whitelisted command id, not a shell string"},
                "argv": {"type": "array", "items": {"type": "string"}},
                "timeoutMs": {"type": "integer"},
            },
            "required": ["commandId"],
        }),
        CapabilityPolicy {
            requires_lease: false,
            verify_policy: VerifyPolicy::Always,
            mutating: true,
            max_retries: 0,
            signature_class: "command".into(),
        },
        Arc::new(local_exec::ShellTool::new(whitelist, root, strict)),
    )
    .await;

    LocalToolStack { contracts, providers }
}

async fn register_fs_tool(
    contracts: &mut ToolContractRegistry,
    providers: &ToolProviderRegistry,
    canonical_name: &str,
    aliases: &[&str],
    argument_schema: serde_json::Value,
    policy: CapabilityPolicy,
    provider: Arc<dyn ToolProvider>,
) {
    contracts
        .register(ToolContract {
            canonical_name: canonical_name.to_string(),
            aliases: aliases.iter().map(|s| s.to_string()).collect(),
            argument_schema,
            capability: canonical_name.to_string(),
            default_provider_hint: None,
            side_effect_tags: if policy.mutating { vec!["mutating".into()] } else { vec![] },
        })
        .expect("builtin tool contracts must not collide");
    providers.register_policy(canonical_name, policy).await;
    providers
        .register_provider(canonical_name, 0, provider)
        .await
        .expect("policy was just registered above");
}
