//! Entity extraction: summarize the input and pull out typed entities and
//! relation triples from a sectioned model response.

use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;

use textkg_llm::{LlmClient, Message, ModelSlot};
use textkg_types::{Entity, PipelineState, Relation, StageFailure, StageName, StageUpdate};

use crate::call_log::CallSink;
use crate::retry::{retry_with_backoff, BackoffPolicy};
use crate::stage::Stage;
use crate::stages::logged_complete;

const SYSTEM_PROMPT: &str = "You extract structured knowledge from text. Respond with exactly \
three sections:\n\
<summary>one-paragraph summary of the text</summary>\n\
<entities>one entity per line as: surface form | type label | short description of the type</entities>\n\
<relations>one triple per line as: subject | predicate | object</relations>\n\
Leave a section body empty when nothing applies. Do not add any other text.";

pub struct EntityExtractionStage {
    client: Arc<LlmClient>,
    sink: Arc<dyn CallSink>,
}

impl EntityExtractionStage {
    pub fn new(client: Arc<LlmClient>, sink: Arc<dyn CallSink>) -> Self {
        Self { client, sink }
    }
}

#[async_trait]
impl Stage for EntityExtractionStage {
    fn name(&self) -> StageName {
        StageName::EntityExtraction
    }

    async fn execute(&self, state: &PipelineState) -> Result<StageUpdate, StageFailure> {
        let messages = vec![
            Message::system(SYSTEM_PROMPT),
            Message::user(state.input_text.clone()),
        ];

        let response = retry_with_backoff(
            || {
                logged_complete(
                    &self.client,
                    &self.sink,
                    state.run_id,
                    StageName::EntityExtraction,
                    ModelSlot::EntityExtraction,
                    messages.clone(),
                    None,
                )
            },
            3,
            &BackoffPolicy::default(),
            "entity extraction",
        )
        .await
        .map_err(StageFailure::Fatal)?;

        let parsed = parse_extraction(&response.text)
            .map_err(StageFailure::Recoverable)?;

        Ok(StageUpdate {
            summary: Some(parsed.summary),
            entities: Some(parsed.entities),
            relations: Some(parsed.relations),
            extraction_failed: Some(false),
            ..Default::default()
        })
    }
}

#[derive(Debug)]
struct Extraction {
    summary: String,
    entities: Vec<Entity>,
    relations: Vec<Relation>,
}

fn section(text: &str, name: &str) -> Option<String> {
    // Section tags may span lines.
    let re = Regex::new(&format!(r"(?s)<{name}>(.*?)</{name}>")).ok()?;
    re.captures(text)
        .map(|caps| caps[1].trim().to_string())
}

fn parse_extraction(text: &str) -> Result<Extraction, String> {
    let summary =
        section(text, "summary").ok_or_else(|| "response missing <summary> section".to_string())?;
    let entities_body = section(text, "entities")
        .ok_or_else(|| "response missing <entities> section".to_string())?;
    // An absent relations section degrades to no relations.
    let relations_body = section(text, "relations").unwrap_or_default();

    let mut entities = Vec::new();
    for line in entities_body.lines().filter(|l| !l.trim().is_empty()) {
        let parts: Vec<&str> = line.split(" | ").map(str::trim).collect();
        match parts.as_slice() {
            [surface, type_label, description] => {
                entities.push(Entity::new(*surface, *type_label, *description));
            }
            _ => return Err(format!("malformed entity line: {line:?}")),
        }
    }

    let mut relations = Vec::new();
    for line in relations_body.lines().filter(|l| !l.trim().is_empty()) {
        let parts: Vec<&str> = line.split(" | ").map(str::trim).collect();
        match parts.as_slice() {
            [subject, predicate, object] => {
                relations.push(Relation::new(*subject, *predicate, *object));
            }
            _ => return Err(format!("malformed relation line: {line:?}")),
        }
    }

    Ok(Extraction {
        summary,
        entities,
        relations,
    })
}
