use async_trait::async_trait;

use crate::{ChatRequest, ChatResponse};

// ---------------------------------------------------------------------------
// ProviderAdapter
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, textkg_types::KgError>;
    fn name(&self) -> &str;
    fn default_model(&self) -> &str;
    fn supports_structured_output(&self) -> bool;
}

// ---------------------------------------------------------------------------
// DynProvider
// ---------------------------------------------------------------------------

pub struct DynProvider(Box<dyn ProviderAdapter>);

impl DynProvider {
    pub fn new(provider: impl ProviderAdapter + 'static) -> Self {
        Self(Box::new(provider))
    }

    pub async fn complete(
        &self,
        request: &ChatRequest,
    ) -> Result<ChatResponse, textkg_types::KgError> {
        self.0.complete(request).await
    }

    pub fn name(&self) -> &str {
        self.0.name()
    }

    pub fn default_model(&self) -> &str {
        self.0.default_model()
    }

    pub fn supports_structured_output(&self) -> bool {
        self.0.supports_structured_output()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FinishReason, Message, Usage};

    struct MockProvider;

    #[async_trait]
    impl ProviderAdapter for MockProvider {
        async fn complete(
            &self,
            _request: &ChatRequest,
        ) -> Result<ChatResponse, textkg_types::KgError> {
            Ok(ChatResponse {
                id: "mock-resp-1".into(),
                text: "Hello from mock".into(),
                model: "mock-model".into(),
                usage: Usage::default(),
                finish_reason: FinishReason::EndTurn,
            })
        }

        fn name(&self) -> &str {
            "mock"
        }

        fn default_model(&self) -> &str {
            "mock-model"
        }

        fn supports_structured_output(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn dyn_provider_complete() {
        let provider = DynProvider::new(MockProvider);
        let req = ChatRequest::new("mock-model", vec![Message::user("hi")]);
        let resp = provider.complete(&req).await.unwrap();
        assert_eq!(resp.id, "mock-resp-1");
        assert_eq!(resp.text, "Hello from mock");
        assert_eq!(resp.finish_reason, FinishReason::EndTurn);
    }

    #[test]
    fn dyn_provider_capability_methods() {
        let provider = DynProvider::new(MockProvider);
        assert_eq!(provider.name(), "mock");
        assert_eq!(provider.default_model(), "mock-model");
        assert!(provider.supports_structured_output());
    }
}
