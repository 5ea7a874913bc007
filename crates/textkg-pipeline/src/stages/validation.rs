//! Validation: hand the generated document to the external validator and
//! record its verdict on the state.

use std::sync::Arc;

use async_trait::async_trait;

use textkg_types::{KgError, PipelineState, StageFailure, StageName, StageUpdate};

use crate::stage::Stage;
use crate::validator::Validator;

pub struct ValidationStage {
    validator: Arc<dyn Validator>,
}

impl ValidationStage {
    pub fn new(validator: Arc<dyn Validator>) -> Self {
        Self { validator }
    }
}

#[async_trait]
impl Stage for ValidationStage {
    fn name(&self) -> StageName {
        StageName::Validation
    }

    async fn execute(&self, state: &PipelineState) -> Result<StageUpdate, StageFailure> {
        let document = state.graph_document.as_ref().ok_or_else(|| {
            StageFailure::Fatal(KgError::Other(
                "validation requested before any document was generated".to_string(),
            ))
        })?;

        let verdict = self
            .validator
            .validate(document)
            .await
            .map_err(StageFailure::Fatal)?;

        Ok(StageUpdate {
            validation_verdict: Some(verdict),
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use textkg_types::{GraphDocument, Verdict};

    struct FixedValidator(Verdict);

    #[async_trait]
    impl Validator for FixedValidator {
        async fn validate(&self, _document: &GraphDocument) -> Result<Verdict, KgError> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn verdict_lands_on_the_update() {
        let stage = ValidationStage::new(Arc::new(FixedValidator(Verdict::Valid)));
        let mut state = PipelineState::new("text", 5);
        state.graph_document = Some(GraphDocument::minimal());

        let update = stage.execute(&state).await.unwrap();
        assert_eq!(update.validation_verdict, Some(Verdict::Valid));
        assert!(update.graph_document.is_none());
    }

    #[tokio::test]
    async fn missing_document_is_fatal() {
        let stage = ValidationStage::new(Arc::new(FixedValidator(Verdict::Valid)));
        let state = PipelineState::new("text", 5);

        let failure = stage.execute(&state).await.unwrap_err();
        assert!(matches!(failure, StageFailure::Fatal(_)));
    }
}
