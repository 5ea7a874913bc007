//! Topic labeling: assign taxonomy categories to a validated document.
//!
//! A failure here never fails the run; the executor records the stage as
//! skipped and returns the document without labels.

use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use textkg_llm::{LlmClient, Message, ModelSlot};
use textkg_types::{PipelineState, StageFailure, StageName, StageUpdate, TopicLabel};

use crate::call_log::CallSink;
use crate::retry::{retry_with_backoff, BackoffPolicy};
use crate::stage::Stage;
use crate::stages::logged_complete;
use crate::taxonomy::TopicTaxonomy;

pub struct TopicLabelingStage {
    client: Arc<LlmClient>,
    taxonomy: Arc<TopicTaxonomy>,
    sink: Arc<dyn CallSink>,
}

impl TopicLabelingStage {
    pub fn new(
        client: Arc<LlmClient>,
        taxonomy: Arc<TopicTaxonomy>,
        sink: Arc<dyn CallSink>,
    ) -> Self {
        Self {
            client,
            taxonomy,
            sink,
        }
    }

    fn build_prompt(&self, state: &PipelineState) -> String {
        let mut prompt = String::new();
        if let Some(summary) = &state.summary {
            let _ = writeln!(prompt, "Summary:\n{summary}\n");
        }
        if let Some(document) = &state.graph_document {
            let _ = writeln!(prompt, "Document:\n{}\n", document.to_json());
        }
        let _ = writeln!(prompt, "Allowed labels:");
        for label in self.taxonomy.all_labels() {
            let _ = writeln!(prompt, "- {label}");
        }
        prompt
    }
}

#[derive(Debug, Deserialize)]
struct LabelResponse {
    labels: Vec<String>,
}

#[async_trait]
impl Stage for TopicLabelingStage {
    fn name(&self) -> StageName {
        StageName::TopicLabeling
    }

    async fn execute(&self, state: &PipelineState) -> Result<StageUpdate, StageFailure> {
        let messages = vec![
            Message::system(
                "You categorize a document against a fixed taxonomy. Pick only labels \
                 from the allowed list. Answer with the schema provided.",
            ),
            Message::user(self.build_prompt(state)),
        ];
        let schema = serde_json::json!({
            "type": "object",
            "properties": {
                "labels": {"type": "array", "items": {"type": "string"}},
            },
            "required": ["labels"],
            "additionalProperties": false,
        });

        let response = retry_with_backoff(
            || {
                logged_complete(
                    &self.client,
                    &self.sink,
                    state.run_id,
                    StageName::TopicLabeling,
                    ModelSlot::TopicLabeling,
                    messages.clone(),
                    Some(schema.clone()),
                )
            },
            3,
            &BackoffPolicy::default(),
            "topic labeling",
        )
        .await
        .map_err(|e| StageFailure::Recoverable(e.to_string()))?;

        let parsed: LabelResponse = serde_json::from_str(&response.text)
            .map_err(|e| StageFailure::Recoverable(format!("label response unparsable: {e}")))?;

        let mut labels = Vec::new();
        for label in parsed.labels {
            match self.taxonomy.dimension_of(&label) {
                Some(dimension) => labels.push(TopicLabel {
                    dimension: dimension.to_string(),
                    label,
                }),
                None => {
                    tracing::warn!(label, "Dropping label not present in the taxonomy");
                }
            }
        }

        Ok(StageUpdate {
            labels: Some(labels),
            ..Default::default()
        })
    }
}
