//! Layered runtime configuration: defaults → optional TOML file →
//! environment variable overrides. Pure types and merging only; watching
//! a config file for hot-reload, if ever needed, belongs in `loom-agent`.

use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub bind: BindMode,
    pub port: u16,
    pub workspace_root: PathBuf,
    pub strict: StrictModeConfig,
    pub bridge_auth: BridgeAuthConfig,
    pub max_concurrency: usize,
    pub dedup_ttl_secs: u64,
    pub json_logs: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            bind: BindMode::default(),
            port: default_port(),
            workspace_root: PathBuf::from("."),
            strict: StrictModeConfig::default(),
            bridge_auth: BridgeAuthConfig::default(),
            max_concurrency: 4,
            dedup_ttl_secs: 30,
            json_logs: false,
        }
    }
}

impl RuntimeConfig {
    /// Load defaults, layer a TOML file if present, then apply env
    /// overrides. Mirrors the teacher's gateway env-var resolution but
    /// without its legacy rebrand fallback chain (teacher-specific
    /// history, not carried over — see DESIGN.md).
    pub fn load(toml_path: Option<&Path>) -> crate::error::Result<Self> {
        let mut cfg = Self::default();
        if let Some(path) = toml_path {
            if path.exists() {
                let text = std::fs::read_to_string(path)?;
                cfg = toml::from_str(&text)
                    .map_err(|e| crate::error::LoomError::Internal(e.to_string()))?;
            }
        }
        cfg.apply_env();
        Ok(cfg)
    }

    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("LOOM_PORT") {
            if let Ok(p) = v.parse() {
                self.port = p;
            }
        }
        if let Ok(v) = std::env::var("LOOM_BIND") {
            self.bind = match v.as_str() {
                "loopback" => BindMode::Loopback,
                "lan" => BindMode::Lan,
                _ => self.bind,
            };
        }
        if let Ok(v) = std::env::var("LOOM_WORKSPACE_ROOT") {
            self.workspace_root = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("LOOM_STRICT") {
            self.strict.enabled = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let Ok(v) = std::env::var("LOOM_BRIDGE_TOKEN") {
            self.bridge_auth.token = Some(v);
        }
        if let Ok(v) = std::env::var("LOOM_MAX_CONCURRENCY") {
            if let Ok(n) = v.parse() {
                self.max_concurrency = n;
            }
        }
        if let Ok(v) = std::env::var("LOOM_JSON_LOGS") {
            self.json_logs = v == "1" || v.eq_ignore_ascii_case("true");
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BindMode {
    Loopback,
    #[default]
    Lan,
}

impl BindMode {
    pub fn to_addr(&self) -> &str {
        match self {
            BindMode::Loopback => "127.0.0.1",
            BindMode::Lan => "0.0.0.0",
        }
    }
}

fn default_port() -> u16 {
    18789
}

/// Local executor filesystem confinement (spec §4.10).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StrictModeConfig {
    pub enabled: bool,
    pub allowed_roots: Vec<PathBuf>,
    pub max_timeout_ms: u64,
}

/// Bridge handshake auth (spec §4.9, §6).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BridgeAuthConfig {
    pub token: Option<String>,
    pub allowed_origins: Vec<String>,
}
