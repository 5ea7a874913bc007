//! Model slot configuration.
//!
//! Each pipeline stage resolves its model through a compile-time-known slot.
//! Unknown or missing slots are rejected at startup rather than at call time.

use std::collections::HashMap;

use textkg_types::KgError;

/// The finite set of model configuration slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelSlot {
    EntityExtraction,
    SchemaSelection,
    GraphGeneration,
    TopicLabeling,
    Embeddings,
}

impl ModelSlot {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelSlot::EntityExtraction => "entity_extraction",
            ModelSlot::SchemaSelection => "schema_selection",
            ModelSlot::GraphGeneration => "graph_generation",
            ModelSlot::TopicLabeling => "topic_labeling",
            ModelSlot::Embeddings => "embeddings",
        }
    }
}

impl std::fmt::Display for ModelSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maps every slot to a concrete model name.
///
/// [`ModelSlotConfig::validate`] fails fast before any stage executes when a
/// required slot has no assignment.
#[derive(Debug, Clone, Default)]
pub struct ModelSlotConfig {
    assignments: HashMap<ModelSlot, String>,
}

impl ModelSlotConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign the same chat model to every stage slot.
    pub fn uniform(chat_model: impl Into<String>, embedding_model: impl Into<String>) -> Self {
        let chat = chat_model.into();
        let mut config = Self::new();
        config.assign(ModelSlot::EntityExtraction, chat.clone());
        config.assign(ModelSlot::SchemaSelection, chat.clone());
        config.assign(ModelSlot::GraphGeneration, chat.clone());
        config.assign(ModelSlot::TopicLabeling, chat);
        config.assign(ModelSlot::Embeddings, embedding_model.into());
        config
    }

    pub fn assign(&mut self, slot: ModelSlot, model: impl Into<String>) {
        self.assignments.insert(slot, model.into());
    }

    pub fn with(mut self, slot: ModelSlot, model: impl Into<String>) -> Self {
        self.assign(slot, model);
        self
    }

    /// Resolve the model name for a slot.
    pub fn model_for(&self, slot: ModelSlot) -> Result<&str, KgError> {
        self.assignments
            .get(&slot)
            .map(String::as_str)
            .ok_or_else(|| KgError::ConfigError(format!("no model assigned to slot '{slot}'")))
    }

    /// Check that every slot the run will touch has an assignment.
    ///
    /// The labeling slot is required only when labeling is enabled.
    pub fn validate(&self, labeling_enabled: bool) -> Result<(), KgError> {
        let mut required = vec![
            ModelSlot::EntityExtraction,
            ModelSlot::SchemaSelection,
            ModelSlot::GraphGeneration,
            ModelSlot::Embeddings,
        ];
        if labeling_enabled {
            required.push(ModelSlot::TopicLabeling);
        }

        let missing: Vec<&str> = required
            .iter()
            .filter(|slot| !self.assignments.contains_key(slot))
            .map(|slot| slot.as_str())
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(KgError::ConfigError(format!(
                "missing model assignment for slots: {}",
                missing.join(", ")
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_config_validates_with_labeling() {
        let config = ModelSlotConfig::uniform("gpt-4o", "text-embedding-3-small");
        assert!(config.validate(true).is_ok());
        assert!(config.validate(false).is_ok());
        assert_eq!(config.model_for(ModelSlot::GraphGeneration).unwrap(), "gpt-4o");
        assert_eq!(
            config.model_for(ModelSlot::Embeddings).unwrap(),
            "text-embedding-3-small"
        );
    }

    #[test]
    fn missing_slot_fails_validation() {
        let config = ModelSlotConfig::new()
            .with(ModelSlot::EntityExtraction, "gpt-4o")
            .with(ModelSlot::SchemaSelection, "gpt-4o-mini")
            .with(ModelSlot::GraphGeneration, "gpt-4o");

        let err = config.validate(false).unwrap_err();
        match err {
            KgError::ConfigError(msg) => assert!(msg.contains("embeddings"), "got: {msg}"),
            other => panic!("expected ConfigError, got: {other:?}"),
        }
    }

    #[test]
    fn labeling_slot_required_only_when_enabled() {
        let config = ModelSlotConfig::new()
            .with(ModelSlot::EntityExtraction, "gpt-4o")
            .with(ModelSlot::SchemaSelection, "gpt-4o")
            .with(ModelSlot::GraphGeneration, "gpt-4o")
            .with(ModelSlot::Embeddings, "text-embedding-3-small");

        assert!(config.validate(false).is_ok());

        let err = config.validate(true).unwrap_err();
        assert!(err.to_string().contains("topic_labeling"));
    }

    #[test]
    fn model_for_unassigned_slot_is_config_error() {
        let config = ModelSlotConfig::new();
        let err = config.model_for(ModelSlot::TopicLabeling).unwrap_err();
        assert!(matches!(err, KgError::ConfigError(_)));
    }

    #[test]
    fn per_slot_override() {
        let config = ModelSlotConfig::uniform("gpt-4o", "text-embedding-3-small")
            .with(ModelSlot::SchemaSelection, "gpt-4o-mini");
        assert_eq!(
            config.model_for(ModelSlot::SchemaSelection).unwrap(),
            "gpt-4o-mini"
        );
        assert_eq!(
            config.model_for(ModelSlot::EntityExtraction).unwrap(),
            "gpt-4o"
        );
    }
}
