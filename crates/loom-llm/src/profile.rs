//! Profile resolver (spec §4.4): maps a role — default/planner/worker/
//! reviewer — to a concrete `{provider, model, timeouts, retry cap,
//! escalation target}`. No teacher analog; table-driven the way
//! [`crate::registry::LlmProviderRegistry`] and the tool contract
//! registry are, per the design note naming hook dispatch and routing
//! tables as "data-driven" throughout.

use std::collections::HashMap;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct ProfileConfig {
    pub provider: String,
    pub model: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub retry_cap: u32,
    pub max_backoff: Duration,
    /// Role to escalate to on repeated retryable failure. Upgrade-only —
    /// there is no downgrade path.
    pub escalation_target: Option<String>,
}

#[derive(Default)]
pub struct ProfileResolver {
    profiles: HashMap<String, ProfileConfig>,
}

impl ProfileResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, role: impl Into<String>, config: ProfileConfig) {
        self.profiles.insert(role.into(), config);
    }

    pub fn resolve(&self, role: &str) -> Option<&ProfileConfig> {
        self.profiles.get(role)
    }

    /// Walk the upgrade-only escalation chain starting at `role`,
    /// stopping before it would cycle back to an already-visited role.
    pub fn escalation_chain(&self, role: &str) -> Vec<String> {
        let mut chain = Vec::new();
        let mut current = role.to_string();
        loop {
            if chain.contains(&current) {
                break;
            }
            chain.push(current.clone());
            match self.profiles.get(&current).and_then(|p| p.escalation_target.clone()) {
                Some(next) => current = next,
                None => break,
            }
        }
        chain
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(provider: &str, escalation: Option<&str>) -> ProfileConfig {
        ProfileConfig {
            provider: provider.into(),
            model: "m".into(),
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(60),
            retry_cap: 3,
            max_backoff: Duration::from_secs(10),
            escalation_target: escalation.map(|s| s.to_string()),
        }
    }

    #[test]
    fn resolves_registered_role() {
        let mut resolver = ProfileResolver::new();
        resolver.register("worker", profile("anthropic", None));
        assert_eq!(resolver.resolve("worker").unwrap().provider, "anthropic");
    }

    #[test]
    fn escalation_chain_walks_until_no_target() {
        let mut resolver = ProfileResolver::new();
        resolver.register("worker", profile("anthropic", Some("planner")));
        resolver.register("planner", profile("anthropic", None));
        assert_eq!(resolver.escalation_chain("worker"), vec!["worker", "planner"]);
    }

    #[test]
    fn escalation_chain_does_not_loop_forever_on_a_cycle() {
        let mut resolver = ProfileResolver::new();
        resolver.register("a", profile("x", Some("b")));
        resolver.register("b", profile("x", Some("a")));
        assert_eq!(resolver.escalation_chain("a"), vec!["a", "b"]);
    }
}
