//! Schema mapping: rank vocabulary types for each extracted entity type by
//! embedding similarity, then let the model pick one from the shortlist.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use textkg_llm::{EmbedderClient, LlmClient, Message, ModelSlot};
use textkg_types::{PipelineState, SchemaCandidate, StageFailure, StageName, StageUpdate};

use crate::call_log::CallSink;
use crate::retry::{retry_with_backoff, BackoffPolicy};
use crate::stage::Stage;
use crate::stages::logged_complete;
use crate::vocabulary::VocabularyCatalog;

const CANDIDATES_PER_TYPE: usize = 5;

pub struct SchemaMappingStage {
    client: Arc<LlmClient>,
    embedder: Arc<dyn EmbedderClient>,
    catalog: Arc<VocabularyCatalog>,
    sink: Arc<dyn CallSink>,
}

impl SchemaMappingStage {
    pub fn new(
        client: Arc<LlmClient>,
        embedder: Arc<dyn EmbedderClient>,
        catalog: Arc<VocabularyCatalog>,
        sink: Arc<dyn CallSink>,
    ) -> Self {
        Self {
            client,
            embedder,
            catalog,
            sink,
        }
    }

    /// Ask the model to pick one candidate from a ranked shortlist. The picked
    /// candidate is promoted to the front; the ranked tail keeps its order.
    async fn select(
        &self,
        state: &PipelineState,
        type_label: &str,
        description: &str,
        candidates: Vec<SchemaCandidate>,
    ) -> Vec<SchemaCandidate> {
        if candidates.len() <= 1 {
            return candidates;
        }

        let listing: String = candidates
            .iter()
            .enumerate()
            .map(|(i, c)| format!("{}. {} — {}\n", i + 1, c.vocabulary_type, c.comment))
            .collect();
        let messages = vec![
            Message::system(
                "You map an entity type onto the single best matching vocabulary type \
                 from a numbered shortlist. Answer with the schema provided.",
            ),
            Message::user(format!(
                "Entity type: {type_label}\nDescription: {description}\n\nCandidates:\n{listing}"
            )),
        ];
        let schema = serde_json::json!({
            "type": "object",
            "properties": {
                "reasoning": {"type": "string"},
                "selected_class": {"type": "string"},
                "selected_number": {"type": "integer", "minimum": 1, "maximum": CANDIDATES_PER_TYPE},
            },
            "required": ["reasoning", "selected_class", "selected_number"],
            "additionalProperties": false,
        });

        let picked = retry_with_backoff(
            || {
                logged_complete(
                    &self.client,
                    &self.sink,
                    state.run_id,
                    StageName::SchemaMapping,
                    ModelSlot::SchemaSelection,
                    messages.clone(),
                    Some(schema.clone()),
                )
            },
            3,
            &BackoffPolicy::default(),
            "schema selection",
        )
        .await
        .ok()
        .and_then(|resp| serde_json::from_str::<Selection>(&resp.text).ok())
        .and_then(|sel| {
            let idx = sel.selected_number.checked_sub(1)?;
            if idx < candidates.len() {
                Some(idx)
            } else {
                None
            }
        });

        match picked {
            Some(idx) => {
                let mut reordered = candidates;
                let chosen = reordered.remove(idx);
                reordered.insert(0, chosen);
                reordered
            }
            None => {
                // Persistent selection failure falls back to the similarity ranking.
                tracing::warn!(type_label, "Schema selection failed, using top-ranked candidate");
                candidates
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct Selection {
    #[allow(dead_code)]
    reasoning: String,
    #[allow(dead_code)]
    selected_class: String,
    selected_number: usize,
}

#[async_trait]
impl Stage for SchemaMappingStage {
    fn name(&self) -> StageName {
        StageName::SchemaMapping
    }

    async fn execute(&self, state: &PipelineState) -> Result<StageUpdate, StageFailure> {
        let mut by_type: BTreeMap<String, &str> = BTreeMap::new();
        for entity in &state.entities {
            by_type
                .entry(entity.type_label.clone())
                .or_insert(entity.description.as_str());
        }

        let mut mapping: BTreeMap<String, Vec<SchemaCandidate>> = BTreeMap::new();
        for (type_label, description) in by_type {
            let query = format!("Class: {type_label}\nDescription: {description}");
            let embedding = retry_with_backoff(
                || async { self.embedder.embed(&query).await },
                3,
                &BackoffPolicy::default(),
                "schema mapping embedding",
            )
            .await
            .map_err(StageFailure::Fatal)?;

            let ranked = self.catalog.top_k(&embedding, CANDIDATES_PER_TYPE);
            let ranked = self
                .select(state, &type_label, description, ranked)
                .await;
            mapping.insert(type_label, ranked);
        }

        Ok(StageUpdate {
            schema_candidates: Some(mapping),
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call_log::NullCallSink;
    use crate::vocabulary::VocabularyEntry;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use textkg_llm::{
        ChatRequest, ChatResponse, Embedding, FinishReason, ModelSlotConfig, ProviderAdapter,
        Usage,
    };
    use textkg_types::{Entity, KgError};

    struct FixedEmbedder;

    #[async_trait]
    impl EmbedderClient for FixedEmbedder {
        async fn embed(&self, _text: &str) -> Result<Embedding, KgError> {
            Ok(vec![1.0, 0.0])
        }

        async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>, KgError> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }

        fn dim(&self) -> usize {
            2
        }
    }

    struct SelectingProvider {
        selected_number: usize,
        call_count: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ProviderAdapter for SelectingProvider {
        async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, KgError> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            Ok(ChatResponse {
                id: "r".into(),
                text: format!(
                    r#"{{"reasoning": "fits best", "selected_class": "x", "selected_number": {}}}"#,
                    self.selected_number
                ),
                model: request.model.clone(),
                usage: Usage::default(),
                finish_reason: FinishReason::EndTurn,
            })
        }

        fn name(&self) -> &str {
            "mock"
        }

        fn default_model(&self) -> &str {
            "mock"
        }

        fn supports_structured_output(&self) -> bool {
            true
        }
    }

    fn catalog() -> Arc<VocabularyCatalog> {
        let entry = |label: &str, e: Vec<f32>| VocabularyEntry {
            label: label.into(),
            comment: format!("{label} comment"),
            definition: String::new(),
            embedding: e,
        };
        Arc::new(VocabularyCatalog::from_entries(vec![
            entry("Person", vec![1.0, 0.0]),
            entry("Organization", vec![0.9, 0.1]),
            entry("Place", vec![0.8, 0.2]),
        ]))
    }

    fn state_with_entity() -> PipelineState {
        let mut state = PipelineState::new("text", 5);
        state.entities = vec![Entity::new("Rembrandt", "Painter", "a visual artist")];
        state
    }

    fn stage(selected_number: usize) -> (SchemaMappingStage, Arc<AtomicUsize>) {
        let call_count = Arc::new(AtomicUsize::new(0));
        let client = LlmClient::new(
            SelectingProvider {
                selected_number,
                call_count: call_count.clone(),
            },
            ModelSlotConfig::uniform("mock-chat", "mock-embed"),
        );
        let sink: Arc<dyn CallSink> = Arc::new(NullCallSink);
        (
            SchemaMappingStage::new(Arc::new(client), Arc::new(FixedEmbedder), catalog(), sink),
            call_count,
        )
    }

    #[tokio::test]
    async fn selection_promotes_picked_candidate() {
        let (stage, _) = stage(2);
        let update = stage.execute(&state_with_entity()).await.unwrap();

        let mapping = update.schema_candidates.unwrap();
        let ranked = &mapping["Painter"];
        assert_eq!(ranked.len(), 3);
        assert_eq!(ranked[0].vocabulary_type, "Organization");
        assert_eq!(ranked[1].vocabulary_type, "Person");
        assert_eq!(ranked[2].vocabulary_type, "Place");
    }

    #[tokio::test]
    async fn out_of_range_selection_falls_back_to_similarity_order() {
        let (stage, _) = stage(9);
        let update = stage.execute(&state_with_entity()).await.unwrap();

        let mapping = update.schema_candidates.unwrap();
        assert_eq!(mapping["Painter"][0].vocabulary_type, "Person");
    }

    #[tokio::test]
    async fn no_entities_means_empty_mapping_and_no_model_call() {
        let (stage, call_count) = stage(1);
        let state = PipelineState::new("text", 5);
        let update = stage.execute(&state).await.unwrap();

        assert!(update.schema_candidates.unwrap().is_empty());
        assert_eq!(call_count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn one_selection_call_per_distinct_type() {
        let (stage, call_count) = stage(1);
        let mut state = PipelineState::new("text", 5);
        state.entities = vec![
            Entity::new("Rembrandt", "Painter", "a visual artist"),
            Entity::new("Vermeer", "Painter", "a visual artist"),
            Entity::new("Amsterdam", "City", "a large settlement"),
        ];
        let update = stage.execute(&state).await.unwrap();

        assert_eq!(update.schema_candidates.unwrap().len(), 2);
        assert_eq!(call_count.load(Ordering::SeqCst), 2);
    }
}
