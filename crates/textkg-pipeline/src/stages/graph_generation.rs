//! Graph generation: produce a JSON-LD document from the extracted entities
//! and their mapped vocabulary types.

use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;

use textkg_llm::{LlmClient, Message, ModelSlot};
use textkg_types::{GraphDocument, PipelineState, StageFailure, StageName, StageUpdate, Verdict};

use crate::call_log::CallSink;
use crate::retry::{retry_with_backoff, BackoffPolicy};
use crate::stage::Stage;
use crate::stages::logged_complete;
use crate::vocabulary::VocabularyCatalog;

const SYSTEM_PROMPT: &str = "You convert extracted entities and relations into one JSON-LD \
object using @context https://schema.org. Use only the vocabulary types listed. Respond with \
a single JSON object and nothing else.";

pub struct GraphGenerationStage {
    client: Arc<LlmClient>,
    catalog: Arc<VocabularyCatalog>,
    sink: Arc<dyn CallSink>,
}

impl GraphGenerationStage {
    pub fn new(
        client: Arc<LlmClient>,
        catalog: Arc<VocabularyCatalog>,
        sink: Arc<dyn CallSink>,
    ) -> Self {
        Self {
            client,
            catalog,
            sink,
        }
    }

    fn build_prompt(&self, state: &PipelineState) -> String {
        let mut prompt = String::new();
        if let Some(summary) = &state.summary {
            let _ = writeln!(prompt, "Summary:\n{summary}\n");
        }

        let _ = writeln!(prompt, "Entities and their vocabulary types:");
        for entity in &state.entities {
            let mapped = state
                .schema_candidates
                .get(&entity.type_label)
                .and_then(|ranked| ranked.first())
                .map(|c| c.vocabulary_type.as_str())
                .unwrap_or("Thing");
            let _ = writeln!(
                prompt,
                "- {} ({} -> {mapped})",
                entity.surface_form, entity.type_label
            );
            if let Some(definition) = self.catalog.definition_for(mapped) {
                if !definition.is_empty() {
                    let _ = writeln!(prompt, "  {mapped}: {definition}");
                }
            }
        }

        if !state.relations.is_empty() {
            let _ = writeln!(prompt, "\nRelations:");
            for relation in &state.relations {
                let _ = writeln!(
                    prompt,
                    "- {} {} {}",
                    relation.subject, relation.predicate, relation.object
                );
            }
        }

        // On a retry, show the rejected document and why it was rejected.
        if state.retry_count > 0 {
            if let Some(previous) = &state.graph_document {
                let _ = writeln!(
                    prompt,
                    "\nYour previous attempt was rejected by the validator:\n{}",
                    previous.to_json()
                );
            }
            if let Verdict::RecoverableErrors { violations } = &state.validation_verdict {
                let _ = writeln!(prompt, "\nValidation errors to fix:");
                for violation in violations {
                    let _ = writeln!(
                        prompt,
                        "- [{}] {}: {}",
                        violation.code, violation.path, violation.message
                    );
                }
            }
        }

        prompt
    }
}

#[async_trait]
impl Stage for GraphGenerationStage {
    fn name(&self) -> StageName {
        StageName::GraphGeneration
    }

    async fn execute(&self, state: &PipelineState) -> Result<StageUpdate, StageFailure> {
        // Nothing was extracted: emit the minimal document, no model call.
        if state.entities.is_empty() || state.extraction_failed {
            return Ok(StageUpdate {
                graph_document: Some(GraphDocument::minimal()),
                ..Default::default()
            });
        }

        let messages = vec![
            Message::system(SYSTEM_PROMPT),
            Message::user(self.build_prompt(state)),
        ];

        let response = retry_with_backoff(
            || {
                logged_complete(
                    &self.client,
                    &self.sink,
                    state.run_id,
                    StageName::GraphGeneration,
                    ModelSlot::GraphGeneration,
                    messages.clone(),
                    None,
                )
            },
            3,
            &BackoffPolicy::default(),
            "graph generation",
        )
        .await
        .map_err(StageFailure::Fatal)?;

        let document = extract_document(&response.text).map_err(StageFailure::Recoverable)?;

        Ok(StageUpdate {
            graph_document: Some(document),
            ..Default::default()
        })
    }
}

/// Pull the outermost JSON object out of the response text and parse it.
fn extract_document(text: &str) -> Result<GraphDocument, String> {
    let re = Regex::new(r"(?s)\{.*\}").map_err(|e| e.to_string())?;
    let raw = re
        .find(text)
        .ok_or_else(|| "response contains no JSON object".to_string())?
        .as_str();
    let value: serde_json::Value =
        serde_json::from_str(raw).map_err(|e| format!("response JSON unparsable: {e}"))?;
    GraphDocument::from_value(value).ok_or_else(|| "response JSON is not an object".to_string())
}
