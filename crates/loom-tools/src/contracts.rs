//! Tool Contract Registry (spec §4.5): declarative tool definitions with
//! canonical names, aliases, argument schemas, default capability
//! binding. Grounded on `loom-tools::registry::ToolRegistry`'s flat
//! name→tool dispatch, extended with alias resolution — the teacher's
//! registry has no alias concept at all.

use loom_core::error::{ErrorCode, LoomError};
use loom_core::types::ToolContract;
use loom_llm::LlmTool;
use std::collections::HashMap;

#[derive(Default)]
pub struct ToolContractRegistry {
    contracts: HashMap<String, ToolContract>,
    /// alias -> canonical name
    aliases: HashMap<String, String>,
    /// canonical name -> at least one enabled provider
    enabled: HashMap<String, bool>,
}

impl ToolContractRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a contract. Fails if any alias collides with an
    /// existing canonical name or a different tool's alias.
    pub fn register(&mut self, contract: ToolContract) -> Result<(), LoomError> {
        for alias in &contract.aliases {
            if self.contracts.contains_key(alias) {
                return Err(LoomError::coded(
                    ErrorCode::EArgs,
                    format!("alias '{}' collides with an existing canonical name", alias),
                ));
            }
            if let Some(existing) = self.aliases.get(alias) {
                if existing != &contract.canonical_name {
                    return Err(LoomError::coded(
                        ErrorCode::EArgs,
                        format!(
                            "alias '{}' already resolves to '{}'",
                            alias, existing
                        ),
                    ));
                }
            }
        }
        for alias in &contract.aliases {
            self.aliases.insert(alias.clone(), contract.canonical_name.clone());
        }
        self.enabled.insert(contract.canonical_name.clone(), true);
        self.contracts.insert(contract.canonical_name.clone(), contract);
        Ok(())
    }

    /// Replace an existing contract in place.
    pub fn r#override(&mut self, contract: ToolContract) -> Result<(), LoomError> {
        self.unregister(&contract.canonical_name);
        self.register(contract)
    }

    pub fn unregister(&mut self, canonical_name: &str) -> bool {
        self.aliases.retain(|_, v| v != canonical_name);
        self.enabled.remove(canonical_name);
        self.contracts.remove(canonical_name).is_some()
    }

    pub fn set_enabled(&mut self, canonical_name: &str, enabled: bool) {
        self.enabled.insert(canonical_name.to_string(), enabled);
    }

    /// Resolve a requested name (alias or canonical) to the canonical
    /// tool name.
    pub fn resolve(&self, requested: &str) -> Option<&str> {
        if self.contracts.contains_key(requested) {
            return Some(self.contracts.get_key_value(requested).unwrap().0);
        }
        self.aliases.get(requested).map(|s| s.as_str())
    }

    pub fn get(&self, canonical_name: &str) -> Option<&ToolContract> {
        self.contracts.get(canonical_name)
    }

    /// Emit LLM-side tool definitions for canonical names with at least
    /// one enabled provider (spec §4.5).
    pub fn list_for_llm(&self) -> Vec<LlmTool> {
        self.contracts
            .values()
            .filter(|c| *self.enabled.get(&c.canonical_name).unwrap_or(&false))
            .map(|c| LlmTool {
                name: c.canonical_name.clone(),
                description: String::new(),
                input_schema: c.argument_schema.clone(),
            })
            .collect()
    }
}
