//! Tool Provider Registry & Capability Policy (spec §4.6, §3).
//!
//! A capability (e.g. `fs.read_text`, `browser.action`) may have several
//! providers — an in-memory one, a bridge-backed one, a browser one.
//! Routing picks the highest-priority provider whose predicate accepts
//! the target; ties break by registration order. No direct teacher
//! analog exists for capability routing; the provider trait shape is
//! grounded on `other_examples`' `tron-tools` `BrowserDelegate`
//! (`execute_action`/`can_handle`-style dispatch) — see DESIGN.md.

use async_trait::async_trait;
use loom_core::error::{ErrorCode, LoomError};
use loom_core::types::{CapabilityPolicy, InvocationEnvelope};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A concrete implementation of a capability (spec §3: Tool Provider
/// Registration; spec §9 design note: "a small trait:
/// `invoke(envelope, ctx) -> Future<result>` plus `can_handle(target)`").
#[async_trait]
pub trait ToolProvider: Send + Sync {
    fn provider_id(&self) -> &str;

    /// Scope this provider operates in, e.g. "browser", "bridge",
    /// "in-memory" (spec §3).
    fn scope(&self) -> &str;

    /// Whether this provider can service `target` (e.g. `workspace://`,
    /// `local://`, `plugin://` prefixed identifiers). `None` target
    /// means "any".
    fn can_handle(&self, target: Option<&str>) -> bool;

    async fn invoke(&self, envelope: &InvocationEnvelope) -> Result<Value, LoomError>;

    /// Confirm a mutating invoke's effect actually took, for capabilities
    /// whose `verify_policy` (spec §3, §4.6) is not `Never`. Most
    /// capabilities have no separate verification step — the result of
    /// `invoke` already is the evidence — so the default is a pass.
    /// A provider whose effects land asynchronously (page navigation,
    /// a DOM mutation) overrides this to poll for real confirmation and
    /// classify an exhausted window as a hard failure or not.
    async fn verify(&self, _envelope: &InvocationEnvelope, _result: &Value) -> Result<VerifyOutcome, LoomError> {
        Ok(VerifyOutcome::verified())
    }
}

/// The result of a post-action verify step (spec §4.6, §4.8).
/// `hard_failure` mirrors the execution engine's
/// `VerifyFailureClass::HardFailure` distinction — it governs whether an
/// unverified mutation ends the turn as `failed_verify` outright or as
/// `progress_uncertain`.
#[derive(Clone, Copy, Debug)]
pub struct VerifyOutcome {
    pub verified: bool,
    pub hard_failure: bool,
}

impl VerifyOutcome {
    pub fn verified() -> Self {
        Self { verified: true, hard_failure: false }
    }

    pub fn unverified(hard_failure: bool) -> Self {
        Self { verified: false, hard_failure }
    }
}

struct Registration {
    priority: i32,
    order: usize,
    provider: Arc<dyn ToolProvider>,
}

/// Capability → ordered providers, plus the capability policy table.
pub struct ToolProviderRegistry {
    providers: RwLock<HashMap<String, Vec<Registration>>>,
    policies: RwLock<HashMap<String, CapabilityPolicy>>,
    next_order: std::sync::atomic::AtomicUsize,
}

impl Default for ToolProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolProviderRegistry {
    pub fn new() -> Self {
        Self {
            providers: RwLock::new(HashMap::new()),
            policies: RwLock::new(HashMap::new()),
            next_order: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    /// Register a capability policy. Required before any provider for
    /// that capability can be registered — DESIGN.md open question (a):
    /// a capability with no explicit policy record is rejected.
    pub async fn register_policy(&self, capability: &str, policy: CapabilityPolicy) {
        self.policies
            .write()
            .await
            .insert(capability.to_string(), policy);
    }

    pub async fn policy(&self, capability: &str) -> Option<CapabilityPolicy> {
        self.policies.read().await.get(capability).cloned()
    }

    pub async fn register_provider(
        &self,
        capability: &str,
        priority: i32,
        provider: Arc<dyn ToolProvider>,
    ) -> Result<(), LoomError> {
        if !self.policies.read().await.contains_key(capability) {
            return Err(LoomError::coded(
                ErrorCode::EArgs,
                format!(
                    "capability '{}' has no registered policy; register_policy first",
                    capability
                ),
            ));
        }
        let order = self.next_order.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let mut providers = self.providers.write().await;
        let entries = providers.entry(capability.to_string()).or_default();
        entries.push(Registration { priority, order, provider });
        entries.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.order.cmp(&b.order)));
        Ok(())
    }

    /// Route to the highest-priority provider whose predicate accepts
    /// `target`. `E_NO_PROVIDER` on no match — spec §4.6: "fail with
    /// 'runtime not ready' rather than silent fallback".
    pub async fn route(
        &self,
        capability: &str,
        target: Option<&str>,
    ) -> Result<Arc<dyn ToolProvider>, LoomError> {
        let providers = self.providers.read().await;
        providers
            .get(capability)
            .and_then(|entries| entries.iter().find(|r| r.provider.can_handle(target)))
            .map(|r| r.provider.clone())
            .ok_or_else(|| {
                LoomError::coded(
                    ErrorCode::ENoProvider,
                    format!("no provider registered for capability '{}'", capability),
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loom_core::types::VerifyPolicy;

    struct FakeProvider {
        id: &'static str,
        accepts_prefix: &'static str,
    }

    #[async_trait]
    impl ToolProvider for FakeProvider {
        fn provider_id(&self) -> &str {
            self.id
        }
        fn scope(&self) -> &str {
            "in-memory"
        }
        fn can_handle(&self, target: Option<&str>) -> bool {
            match target {
                Some(t) => t.starts_with(self.accepts_prefix),
                None => true,
            }
        }
        async fn invoke(&self, _: &InvocationEnvelope) -> Result<Value, LoomError> {
            Ok(serde_json::json!({ "by": self.id }))
        }
    }

    fn policy() -> CapabilityPolicy {
        CapabilityPolicy {
            requires_lease: false,
            verify_policy: VerifyPolicy::Never,
            mutating: false,
            max_retries: 1,
            signature_class: "fs".into(),
        }
    }

    #[tokio::test]
    async fn registration_without_policy_is_rejected() {
        let registry = ToolProviderRegistry::new();
        let provider = Arc::new(FakeProvider { id: "p1", accepts_prefix: "" });
        let err = registry
            .register_provider("fs.read_text", 0, provider)
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::EArgs));
    }

    #[tokio::test]
    async fn routes_to_highest_priority_matching_predicate() {
        let registry = ToolProviderRegistry::new();
        registry.register_policy("fs.read_text", policy()).await;
        registry
            .register_provider(
                "fs.read_text",
                1,
                Arc::new(FakeProvider { id: "low", accepts_prefix: "local://" }),
            )
            .await
            .unwrap();
        registry
            .register_provider(
                "fs.read_text",
                10,
                Arc::new(FakeProvider { id: "high", accepts_prefix: "local://" }),
            )
            .await
            .unwrap();
        let provider = registry.route("fs.read_text", Some("local://a")).await.unwrap();
        assert_eq!(provider.provider_id(), "high");
    }

    #[tokio::test]
    async fn no_matching_predicate_is_no_provider() {
        let registry = ToolProviderRegistry::new();
        registry.register_policy("fs.read_text", policy()).await;
        registry
            .register_provider(
                "fs.read_text",
                0,
                Arc::new(FakeProvider { id: "only", accepts_prefix: "workspace://" }),
            )
            .await
            .unwrap();
        let result = registry.route("fs.read_text", Some("local://a")).await;
        let err = match result {
            Err(err) => err,
            Ok(_) => panic!("expected no matching provider"),
        };
        assert_eq!(err.code(), Some(ErrorCode::ENoProvider));
    }
}
