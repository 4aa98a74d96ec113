//! loom — browser-resident LLM agent runtime.
//!
//! Usage:
//!   loom                                    → start the executor bridge on :18789
//!   loom --workspace /path --strict          → confine the local executor to /path
//!   loom --browser-debug-url ws://...        → also register the browser capabilities
//!   loom --config loom.toml                  → layer a TOML config file under env overrides

use clap::Parser;
use loom_agent::{Orchestrator, OrchestratorConfig, SessionManager, TraceFabric};
use loom_bridge::invoker::BridgeInvoker;
use loom_core::config::RuntimeConfig;
use loom_core::error::LoomError;
use loom_hooks::HookRunner;
use loom_llm::{AnthropicProvider, LlmProviderRegistry, ProfileConfig, ProfileResolver};
use loom_tools::{create_local_tool_stack, ToolContractRegistry, ToolProviderRegistry};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "loom",
    about = "Executor bridge for a browser-resident LLM agent runtime",
    version = env!("CARGO_PKG_VERSION")
)]
struct Cli {
    /// Path to a TOML config file, layered under defaults and above by env overrides.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory the local fs/command tools are confined to.
    #[arg(short, long)]
    workspace: Option<PathBuf>,

    /// Bind mode: loopback or lan.
    #[arg(short, long)]
    bind: Option<String>,

    /// Port for the bridge's websocket/health endpoints.
    #[arg(short, long)]
    port: Option<u16>,

    /// Reject filesystem/command targets outside the workspace root.
    #[arg(long, default_value_t = false)]
    strict: bool,

    /// Debugging-protocol websocket URL for a live browser tab. Omit to run without browser tools.
    #[arg(long)]
    browser_debug_url: Option<String>,

    /// Write logs to a file in addition to stderr.
    #[arg(long)]
    log_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = RuntimeConfig::load(cli.config.as_deref())?;
    if let Some(workspace) = &cli.workspace {
        config.workspace_root = workspace.clone();
    }
    if let Some(bind) = &cli.bind {
        config.bind = match bind.as_str() {
            "loopback" => loom_core::config::BindMode::Loopback,
            _ => loom_core::config::BindMode::Lan,
        };
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if cli.strict {
        config.strict.enabled = true;
    }

    let _log_guard = init_tracing(config.json_logs, cli.log_file.as_deref());

    let api_key = std::env::var("ANTHROPIC_API_KEY").map_err(|_| anyhow::anyhow!("ANTHROPIC_API_KEY not set"))?;

    std::fs::create_dir_all(&config.workspace_root)?;
    let stack = create_local_tool_stack(&config.workspace_root, config.strict.enabled).await;
    let mut contracts = stack.contracts;
    let providers = stack.providers;

    if let Some(url) = &cli.browser_debug_url {
        register_browser_tools(&mut contracts, &providers, url).await?;
    }

    let hooks = Arc::new(HookRunner::new());

    let mut llm_providers = LlmProviderRegistry::new();
    llm_providers.register(Arc::new(AnthropicProvider::new(api_key)));
    let mut profiles = ProfileResolver::new();
    profiles.register(
        "default",
        ProfileConfig {
            provider: "anthropic".into(),
            model: "claude-opus-4-6-20250929".into(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(120),
            retry_cap: 3,
            max_backoff: Duration::from_secs(20),
            escalation_target: None,
        },
    );

    let sessions = Arc::new(SessionManager::new(&config.workspace_root)?);
    let trace = Arc::new(TraceFabric::new(sessions.store().clone()));
    let contracts = Arc::new(contracts);
    let providers = Arc::new(providers);

    let orchestrator = Arc::new(Orchestrator::new(
        sessions.clone(),
        contracts.clone(),
        providers.clone(),
        hooks.clone(),
        Arc::new(llm_providers),
        Arc::new(profiles),
        trace,
        OrchestratorConfig::default(),
    ));

    let invoker: Arc<dyn BridgeInvoker> = Arc::new(DirectToolInvoker { contracts, providers, hooks, orchestrator });

    loom_bridge::serve(config, invoker).await
}

/// Connects a live debugging-protocol websocket and registers the
/// three browser capabilities against it.
async fn register_browser_tools(contracts: &mut ToolContractRegistry, providers: &ToolProviderRegistry, debug_url: &str) -> anyhow::Result<()> {
    use loom_browser::{BrowserProvider, ExecutionEngine};
    use loom_core::types::{CapabilityPolicy, ToolContract, VerifyPolicy};

    let transport = loom_browser::transport::CdpTransport::connect(debug_url).await?;
    let engine = Arc::new(ExecutionEngine::new(Arc::new(transport)));
    let provider = Arc::new(BrowserProvider::new("browser-local", engine));

    for (canonical, mutating, verify_policy) in [
        ("browser.snapshot", false, VerifyPolicy::Never),
        ("browser.act", true, VerifyPolicy::OnCritical),
        ("browser.verify", false, VerifyPolicy::Never),
    ] {
        contracts
            .register(ToolContract {
                canonical_name: canonical.into(),
                aliases: vec![],
                argument_schema: serde_json::json!({"type": "object"}),
                capability: canonical.into(),
                default_provider_hint: None,
                side_effect_tags: if mutating { vec!["mutating".into()] } else { vec![] },
            })
            .map_err(|e: LoomError| anyhow::anyhow!(e.to_string()))?;
        providers
            .register_policy(canonical, CapabilityPolicy { requires_lease: true, verify_policy, mutating, max_retries: 1, signature_class: "browser".into() })
            .await;
        providers.register_provider(canonical, 0, provider.clone()).await.map_err(|e| anyhow::anyhow!(e.to_string()))?;
    }
    Ok(())
}

/// Bridges protocol-level invokes directly onto the tool layer (spec
/// §4.9: "typically backed by `loom-tools`'s provider registry and
/// `loom-hooks`'s hook runner"). A bridge-initiated call is a single
/// tool invocation, not a full LLM turn, so this deliberately bypasses
/// the orchestrator — it's kept here so a future `run.start`-style
/// bridge method has somewhere to dispatch into.
struct DirectToolInvoker {
    contracts: Arc<ToolContractRegistry>,
    providers: Arc<ToolProviderRegistry>,
    hooks: Arc<HookRunner>,
    #[allow(dead_code)]
    orchestrator: Arc<Orchestrator>,
}

#[async_trait::async_trait]
impl BridgeInvoker for DirectToolInvoker {
    async fn invoke(&self, tool: &str, args: Value, session_id: Option<&str>) -> Result<Value, LoomError> {
        use loom_core::error::ErrorCode;
        use loom_core::types::InvocationEnvelope;

        let canonical = self
            .contracts
            .resolve(tool)
            .map(|s| s.to_string())
            .ok_or_else(|| LoomError::coded(ErrorCode::ETool, format!("unknown tool '{}'", tool)))?;
        let session_id = session_id.unwrap_or("bridge").to_string();

        let before = serde_json::json!({ "tool": canonical, "arguments": args });
        let mut arguments = args;
        if let Some(patch) = self.hooks.run_phase("tool.before_call", &session_id, before).await? {
            if let Some(patched) = patch.get("arguments") {
                arguments = patched.clone();
            }
        }

        let target = arguments.get("path").or_else(|| arguments.get("target")).and_then(|v| v.as_str()).map(str::to_string);
        let provider = self.providers.route(&canonical, target.as_deref()).await?;
        let envelope = InvocationEnvelope {
            invocation_id: uuid::Uuid::new_v4().to_string(),
            session_id: loom_core::types::SessionKey::new(session_id.clone()),
            parent_session_id: None,
            agent_id: None,
            requested_tool_name: tool.to_string(),
            canonical_tool_name: canonical.clone(),
            arguments: arguments.clone(),
            fingerprint: String::new(),
        };
        let mut result = provider.invoke(&envelope).await?;

        let after = serde_json::json!({ "tool": canonical, "ok": true, "result": result });
        if let Some(patch) = self.hooks.run_phase("tool.after_result", &session_id, after).await? {
            if let Some(patched) = patch.get("result") {
                result = patched.clone();
            }
        }
        Ok(result)
    }
}

fn init_tracing(json_logs: bool, log_file: Option<&std::path::Path>) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "loom=info,tower_http=info".into());

    match log_file {
        Some(path) => {
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| std::path::Path::new("."));
            let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_else(|| "loom.log".into());
            let file_appender = tracing_appender::rolling::never(dir, name);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let registry = tracing_subscriber::registry().with(env_filter).with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr));
            if json_logs {
                registry.with(tracing_subscriber::fmt::layer().json().with_writer(non_blocking)).init();
            } else {
                registry.with(tracing_subscriber::fmt::layer().with_writer(non_blocking).with_ansi(false)).init();
            }
            Some(guard)
        }
        None => {
            let registry = tracing_subscriber::registry().with(env_filter);
            if json_logs {
                registry.with(tracing_subscriber::fmt::layer().json()).init();
            } else {
                registry.with(tracing_subscriber::fmt::layer()).init();
            }
            None
        }
    }
}
