//! The five pipeline stages.

mod entity_extraction;
mod graph_generation;
mod schema_mapping;
mod topic_labeling;
mod validation;

pub use entity_extraction::EntityExtractionStage;
pub use graph_generation::GraphGenerationStage;
pub use schema_mapping::SchemaMappingStage;
pub use topic_labeling::TopicLabelingStage;
pub use validation::ValidationStage;

use std::sync::Arc;
use std::time::Instant;

use textkg_llm::{ChatResponse, LlmClient, Message, ModelSlot};
use textkg_types::{KgError, StageName};

use crate::call_log::{CallRecord, CallSink};

/// Complete a slot request and record the call, success or failure.
pub(crate) async fn logged_complete(
    client: &LlmClient,
    sink: &Arc<dyn CallSink>,
    run_id: uuid::Uuid,
    stage: StageName,
    slot: ModelSlot,
    messages: Vec<Message>,
    response_schema: Option<serde_json::Value>,
) -> Result<ChatResponse, KgError> {
    let model = client
        .slots()
        .model_for(slot)
        .map(str::to_string)
        .unwrap_or_default();
    let started = Instant::now();
    let result = client.complete_slot(slot, messages, response_schema).await;
    let latency_ms = started.elapsed().as_millis() as u64;

    match &result {
        Ok(resp) => sink.record(CallRecord::new(
            run_id,
            stage,
            &resp.model,
            resp.usage.input_tokens,
            resp.usage.output_tokens,
            latency_ms,
            true,
        )),
        Err(_) => sink.record(CallRecord::new(run_id, stage, model, 0, 0, latency_ms, false)),
    }

    result
}
