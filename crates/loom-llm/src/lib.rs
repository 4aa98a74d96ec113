//! LLM provider adapters, a named provider registry, a role-based
//! profile resolver, and retry/escalation orchestration on top of
//! streaming completions.

pub mod anthropic;
pub mod profile;
pub mod provider;
pub mod registry;
pub mod retry;
pub mod types;

pub use anthropic::AnthropicProvider;
pub use profile::{ProfileConfig, ProfileResolver};
pub use provider::{LlmError, LlmProvider, LlmResult, LlmStream};
pub use registry::LlmProviderRegistry;
pub use retry::complete_with_profile;
pub use types::*;
