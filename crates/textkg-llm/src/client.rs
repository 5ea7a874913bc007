use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use textkg_types::KgError;

use crate::{
    ChatRequest, ChatResponse, DynProvider, Message, ModelSlot, ModelSlotConfig, ProviderAdapter,
};

// ---------------------------------------------------------------------------
// Middleware
// ---------------------------------------------------------------------------

pub trait Middleware: Send + Sync {
    fn before(&self, _request: &mut ChatRequest) {}
    fn after(&self, _request: &ChatRequest, _response: &mut ChatResponse) {}
}

// ---------------------------------------------------------------------------
// Built-in middleware: LoggingMiddleware
// ---------------------------------------------------------------------------

pub struct LoggingMiddleware;

impl Middleware for LoggingMiddleware {
    fn before(&self, request: &mut ChatRequest) {
        tracing::info!(
            model = %request.model,
            messages = request.messages.len(),
            structured = request.response_schema.is_some(),
            "LLM request"
        );
    }

    fn after(&self, _request: &ChatRequest, response: &mut ChatResponse) {
        tracing::info!(
            model = %response.model,
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            finish = ?response.finish_reason,
            "LLM response"
        );
    }
}

// ---------------------------------------------------------------------------
// Built-in middleware: CostTrackingMiddleware
// ---------------------------------------------------------------------------

pub struct CostTrackingMiddleware {
    total_input: Arc<AtomicU64>,
    total_output: Arc<AtomicU64>,
}

impl CostTrackingMiddleware {
    pub fn new() -> Self {
        Self {
            total_input: Arc::new(AtomicU64::new(0)),
            total_output: Arc::new(AtomicU64::new(0)),
        }
    }

    /// A handle that shares counters with this middleware.
    pub fn handle(&self) -> Self {
        Self {
            total_input: self.total_input.clone(),
            total_output: self.total_output.clone(),
        }
    }

    pub fn total_input_tokens(&self) -> u64 {
        self.total_input.load(Ordering::Relaxed)
    }

    pub fn total_output_tokens(&self) -> u64 {
        self.total_output.load(Ordering::Relaxed)
    }
}

impl Default for CostTrackingMiddleware {
    fn default() -> Self {
        Self::new()
    }
}

impl Middleware for CostTrackingMiddleware {
    fn after(&self, _request: &ChatRequest, response: &mut ChatResponse) {
        self.total_input
            .fetch_add(response.usage.input_tokens, Ordering::Relaxed);
        self.total_output
            .fetch_add(response.usage.output_tokens, Ordering::Relaxed);
    }
}

// ---------------------------------------------------------------------------
// LlmClient
// ---------------------------------------------------------------------------

/// Chat client wrapping one provider, the model slot configuration, and a
/// middleware chain applied around every call.
pub struct LlmClient {
    provider: DynProvider,
    slots: ModelSlotConfig,
    middleware: Vec<Box<dyn Middleware>>,
}

impl LlmClient {
    pub fn new(provider: impl ProviderAdapter + 'static, slots: ModelSlotConfig) -> Self {
        Self {
            provider: DynProvider::new(provider),
            slots,
            middleware: Vec::new(),
        }
    }

    pub fn with_middleware(mut self, m: impl Middleware + 'static) -> Self {
        self.middleware.push(Box::new(m));
        self
    }

    pub fn slots(&self) -> &ModelSlotConfig {
        &self.slots
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, KgError> {
        let mut req = request.clone();

        for m in &self.middleware {
            m.before(&mut req);
        }

        let mut resp = self.provider.complete(&req).await?;

        for m in &self.middleware {
            m.after(&req, &mut resp);
        }

        Ok(resp)
    }

    /// Complete a request against the model assigned to a slot.
    pub async fn complete_slot(
        &self,
        slot: ModelSlot,
        messages: Vec<Message>,
        response_schema: Option<serde_json::Value>,
    ) -> Result<ChatResponse, KgError> {
        let model = self.slots.model_for(slot)?.to_string();
        let mut request = ChatRequest::new(model, messages);
        request.response_schema = response_schema;
        self.complete(&request).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FinishReason, Usage};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    struct MockProvider {
        call_count: Arc<AtomicUsize>,
    }

    impl MockProvider {
        fn new() -> Self {
            Self {
                call_count: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl ProviderAdapter for MockProvider {
        async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, KgError> {
            self.call_count.fetch_add(1, Ordering::Relaxed);
            Ok(ChatResponse {
                id: "mock-resp".into(),
                text: "Hello from mock".into(),
                model: request.model.clone(),
                usage: Usage {
                    input_tokens: 10,
                    output_tokens: 20,
                    total_tokens: 30,
                },
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

    fn slot_config() -> ModelSlotConfig {
        ModelSlotConfig::uniform("mock-chat", "mock-embed")
    }

    #[tokio::test]
    async fn complete_passes_through_provider() {
        let client = LlmClient::new(MockProvider::new(), slot_config());
        let req = ChatRequest::new("mock-chat", vec![Message::user("hello")]);
        let resp = client.complete(&req).await.unwrap();
        assert_eq!(resp.id, "mock-resp");
        assert_eq!(resp.text, "Hello from mock");
    }

    #[tokio::test]
    async fn complete_slot_resolves_model() {
        let slots = slot_config().with(ModelSlot::SchemaSelection, "mock-small");
        let client = LlmClient::new(MockProvider::new(), slots);

        let resp = client
            .complete_slot(ModelSlot::SchemaSelection, vec![Message::user("x")], None)
            .await
            .unwrap();
        assert_eq!(resp.model, "mock-small");
    }

    #[tokio::test]
    async fn complete_slot_unassigned_is_config_error() {
        let client = LlmClient::new(MockProvider::new(), ModelSlotConfig::new());
        let err = client
            .complete_slot(ModelSlot::GraphGeneration, vec![Message::user("x")], None)
            .await
            .unwrap_err();
        assert!(matches!(err, KgError::ConfigError(_)));
    }

    #[tokio::test]
    async fn middleware_before_after_called() {
        let before_count = Arc::new(AtomicUsize::new(0));
        let after_count = Arc::new(AtomicUsize::new(0));

        struct CountingMiddleware {
            before_count: Arc<AtomicUsize>,
            after_count: Arc<AtomicUsize>,
        }

        impl Middleware for CountingMiddleware {
            fn before(&self, _request: &mut ChatRequest) {
                self.before_count.fetch_add(1, Ordering::Relaxed);
            }
            fn after(&self, _request: &ChatRequest, _response: &mut ChatResponse) {
                self.after_count.fetch_add(1, Ordering::Relaxed);
            }
        }

        let client = LlmClient::new(MockProvider::new(), slot_config()).with_middleware(
            CountingMiddleware {
                before_count: before_count.clone(),
                after_count: after_count.clone(),
            },
        );

        let req = ChatRequest::new("mock-chat", vec![Message::user("hi")]);
        let _resp = client.complete(&req).await.unwrap();

        assert_eq!(before_count.load(Ordering::Relaxed), 1);
        assert_eq!(after_count.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn cost_tracking_middleware_accumulates() {
        let cost = CostTrackingMiddleware::new();
        let client = LlmClient::new(MockProvider::new(), slot_config()).with_middleware(cost.handle());

        let req = ChatRequest::new("mock-chat", vec![Message::user("hi")]);
        let _resp = client.complete(&req).await.unwrap();

        assert_eq!(cost.total_input_tokens(), 10);
        assert_eq!(cost.total_output_tokens(), 20);

        let _resp = client.complete(&req).await.unwrap();
        assert_eq!(cost.total_input_tokens(), 20);
        assert_eq!(cost.total_output_tokens(), 40);
    }
}
