//! Named provider registry (spec §4.4). Grounded structurally on the
//! teacher's tool registry's register-then-lookup-by-name shape,
//! applied here to `LlmProvider` instead of `Tool`.

use crate::provider::LlmProvider;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Default)]
pub struct LlmProviderRegistry {
    providers: HashMap<String, Arc<dyn LlmProvider>>,
}

impl LlmProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Arc<dyn LlmProvider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn LlmProvider>> {
        self.providers.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        self.providers.keys().map(|s| s.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{LlmError, LlmResult, LlmStream};
    use crate::types::LlmRequest;
    use tokio_util::sync::CancellationToken;

    struct FakeProvider(&'static str);

    #[async_trait::async_trait]
    impl LlmProvider for FakeProvider {
        fn name(&self) -> &str {
            self.0
        }
        fn models(&self) -> &[&str] {
            &["fake-model"]
        }
        async fn complete_stream(
            &self,
            _request: LlmRequest,
            _cancel: Option<CancellationToken>,
        ) -> LlmResult<LlmStream> {
            Err(LlmError::RequestFailed("unused in this test".into()))
        }
    }

    #[test]
    fn registers_and_looks_up_by_name() {
        let mut registry = LlmProviderRegistry::new();
        registry.register(Arc::new(FakeProvider("anthropic")));
        assert!(registry.get("anthropic").is_some());
        assert!(registry.get("missing").is_none());
    }
}
