//! The graph executor: drives one run through the stages to a terminal
//! outcome, owning all state mutation and the retry budget.

use std::sync::Arc;
use std::time::Instant;

use textkg_llm::{EmbedderClient, LlmClient};
use textkg_types::{
    HistoryEntry, KgError, PipelineState, RunOutcome, StageFailure, StageName, StageOutcome,
    StageUpdate, Verdict, Violation,
};

use crate::call_log::CallSink;
use crate::events::{EventEmitter, PipelineEvent};
use crate::router::{route, Decision};
use crate::stage::Stage;
use crate::stages::{
    EntityExtractionStage, GraphGenerationStage, SchemaMappingStage, TopicLabelingStage,
    ValidationStage,
};
use crate::taxonomy::TopicTaxonomy;
use crate::validator::Validator;
use crate::vocabulary::VocabularyCatalog;

const STAGE_COUNT: u32 = 5;

/// Executor configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Regeneration budget for recoverable validation errors.
    pub max_retries: u32,
    pub enable_labeling: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            enable_labeling: false,
        }
    }
}

/// The stage implementations an executor drives. Labeling is optional.
pub struct StageSet {
    pub extraction: Arc<dyn Stage>,
    pub mapping: Arc<dyn Stage>,
    pub generation: Arc<dyn Stage>,
    pub validation: Arc<dyn Stage>,
    pub labeling: Option<Arc<dyn Stage>>,
}

/// Where the executor currently is in the run graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Extracting,
    Mapping,
    Generating,
    Validating,
    Labeling,
}

pub struct Executor {
    stages: StageSet,
    config: PipelineConfig,
    events: EventEmitter,
}

impl Executor {
    pub fn new(stages: StageSet, config: PipelineConfig) -> Self {
        Self {
            stages,
            config,
            events: EventEmitter::default(),
        }
    }

    pub fn events(&self) -> &EventEmitter {
        &self.events
    }

    fn labeling_enabled(&self) -> bool {
        self.config.enable_labeling && self.stages.labeling.is_some()
    }

    /// Hard ceiling on stage invocations. Reaching it means the routing logic
    /// is broken, which is an infrastructure failure, not a content one.
    fn invocation_ceiling(&self) -> u32 {
        (self.config.max_retries + 1) * STAGE_COUNT + 2
    }

    /// Run one input through the pipeline to a terminal outcome.
    pub async fn run(&self, input_text: &str) -> RunOutcome {
        let mut state = PipelineState::new(input_text, self.config.max_retries);
        let run_id = state.run_id;
        self.events.emit(PipelineEvent::RunStarted { run_id });

        let outcome = self.drive(&mut state).await;

        match &outcome {
            RunOutcome::Succeeded { .. } => {
                self.events
                    .emit(PipelineEvent::RunCompleted { run_id, success: true });
            }
            RunOutcome::ExhaustedRetries { .. } => {
                self.events.emit(PipelineEvent::RunFailed {
                    run_id,
                    reason: "validation retries exhausted".to_string(),
                });
            }
            RunOutcome::FailedInfrastructure { reason, .. } => {
                self.events.emit(PipelineEvent::RunFailed {
                    run_id,
                    reason: reason.clone(),
                });
            }
        }
        outcome
    }

    async fn drive(&self, state: &mut PipelineState) -> RunOutcome {
        let mut current = RunState::Extracting;
        let mut invocations = 0u32;

        loop {
            if invocations >= self.invocation_ceiling() {
                return self.fail_infrastructure(
                    state,
                    format!(
                        "stage invocation ceiling of {} reached",
                        self.invocation_ceiling()
                    ),
                );
            }
            invocations += 1;

            current = match current {
                RunState::Extracting => {
                    match self.invoke(state, &self.stages.extraction).await {
                        Ok(update) => {
                            state.apply(update);
                            RunState::Mapping
                        }
                        Err(StageFailure::Recoverable(message)) => {
                            // Degrade to the empty-entity path and keep going.
                            tracing::warn!(%message, "Extraction degraded to empty entities");
                            state.apply(StageUpdate {
                                entities: Some(Vec::new()),
                                relations: Some(Vec::new()),
                                extraction_failed: Some(true),
                                ..Default::default()
                            });
                            RunState::Mapping
                        }
                        Err(StageFailure::Fatal(e)) => {
                            return self.fail_infrastructure(state, e.to_string())
                        }
                    }
                }

                RunState::Mapping => match self.invoke(state, &self.stages.mapping).await {
                    Ok(update) => {
                        state.apply(update);
                        RunState::Generating
                    }
                    Err(StageFailure::Recoverable(message)) => {
                        tracing::warn!(%message, "Schema mapping degraded to no candidates");
                        RunState::Generating
                    }
                    Err(StageFailure::Fatal(e)) => {
                        return self.fail_infrastructure(state, e.to_string())
                    }
                },

                RunState::Generating => match self.invoke(state, &self.stages.generation).await {
                    Ok(update) => {
                        state.apply(update);
                        RunState::Validating
                    }
                    Err(StageFailure::Recoverable(message)) => {
                        // Malformed model output counts against the same budget
                        // as a validation rejection.
                        let violation = Violation {
                            code: "malformed-output".to_string(),
                            path: String::new(),
                            message,
                        };
                        if state.retry_count < state.max_retries {
                            state.retry_count += 1;
                            self.events.emit(PipelineEvent::StageRetrying {
                                run_id: state.run_id,
                                stage: StageName::GraphGeneration,
                                retry_count: state.retry_count,
                            });
                            RunState::Generating
                        } else {
                            return RunOutcome::ExhaustedRetries {
                                violations: vec![violation],
                                history: std::mem::take(&mut state.history),
                            };
                        }
                    }
                    Err(StageFailure::Fatal(e)) => {
                        return self.fail_infrastructure(state, e.to_string())
                    }
                },

                RunState::Validating => match self.invoke(state, &self.stages.validation).await {
                    Ok(update) => {
                        state.apply(update);
                        match route(
                            &state.validation_verdict,
                            state.retry_count,
                            state.max_retries,
                            self.labeling_enabled(),
                        ) {
                            Decision::Label => RunState::Labeling,
                            Decision::Finish => return self.succeed(state),
                            Decision::RetryGeneration => {
                                state.retry_count += 1;
                                self.events.emit(PipelineEvent::StageRetrying {
                                    run_id: state.run_id,
                                    stage: StageName::GraphGeneration,
                                    retry_count: state.retry_count,
                                });
                                RunState::Generating
                            }
                            Decision::ExhaustedRetries => {
                                let violations = match &state.validation_verdict {
                                    Verdict::RecoverableErrors { violations } => {
                                        violations.clone()
                                    }
                                    _ => Vec::new(),
                                };
                                return RunOutcome::ExhaustedRetries {
                                    violations,
                                    history: std::mem::take(&mut state.history),
                                };
                            }
                            Decision::Infrastructure(reason) => {
                                return self.fail_infrastructure(state, reason)
                            }
                        }
                    }
                    Err(StageFailure::Recoverable(message)) | Err(StageFailure::Fatal(KgError::Other(message))) => {
                        return self.fail_infrastructure(state, message)
                    }
                    Err(StageFailure::Fatal(e)) => {
                        return self.fail_infrastructure(state, e.to_string())
                    }
                },

                RunState::Labeling => {
                    let Some(labeling) = &self.stages.labeling else {
                        return self.succeed(state);
                    };
                    match self.invoke(state, labeling).await {
                        Ok(update) => {
                            state.apply(update);
                        }
                        Err(failure) => {
                            // Labeling never fails the run.
                            let message = match failure {
                                StageFailure::Recoverable(m) => m,
                                StageFailure::Fatal(e) => e.to_string(),
                            };
                            tracing::warn!(%message, "Topic labeling skipped");
                        }
                    }
                    return self.succeed(state);
                }
            };
        }
    }

    /// Run one stage invocation, with events and a history entry.
    async fn invoke(
        &self,
        state: &mut PipelineState,
        stage: &Arc<dyn Stage>,
    ) -> Result<StageUpdate, StageFailure> {
        let name = stage.name();
        self.events.emit(PipelineEvent::StageStarted {
            run_id: state.run_id,
            stage: name,
        });

        let started_at = chrono::Utc::now();
        let started = Instant::now();
        let result = stage.execute(state).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let (outcome, detail) = match &result {
            Ok(update) => (StageOutcome::Completed, verdict_detail(name, update)),
            Err(StageFailure::Recoverable(message)) => {
                // Labeling failures skip the stage; the entry is written once
                // and never revisited.
                let outcome = if name == StageName::TopicLabeling {
                    StageOutcome::Skipped
                } else if name == StageName::GraphGeneration
                    && state.retry_count < state.max_retries
                {
                    StageOutcome::Retrying
                } else {
                    StageOutcome::Failed
                };
                (outcome, Some(message.clone()))
            }
            Err(StageFailure::Fatal(e)) => {
                let outcome = if name == StageName::TopicLabeling {
                    StageOutcome::Skipped
                } else {
                    StageOutcome::Failed
                };
                (outcome, Some(e.to_string()))
            }
        };

        match &outcome {
            StageOutcome::Completed => self.events.emit(PipelineEvent::StageCompleted {
                run_id: state.run_id,
                stage: name,
                duration_ms,
            }),
            _ => self.events.emit(PipelineEvent::StageFailed {
                run_id: state.run_id,
                stage: name,
                message: detail.clone().unwrap_or_default(),
            }),
        }

        state.record(HistoryEntry {
            stage: name,
            started_at,
            duration_ms,
            outcome,
            detail,
        });

        result
    }

    /// Terminal success. Labels, when present, are stamped into the document.
    fn succeed(&self, state: &mut PipelineState) -> RunOutcome {
        let mut document = match state.graph_document.take() {
            Some(d) => d,
            None => {
                return self.fail_infrastructure(
                    state,
                    "run reached success without a graph document".to_string(),
                )
            }
        };
        if let Some(labels) = &state.labels {
            for label in labels {
                document.append_about_label(&label.label, &label.dimension);
            }
        }
        RunOutcome::Succeeded {
            graph_document: document,
            labels: state.labels.take(),
            history: std::mem::take(&mut state.history),
        }
    }

    fn fail_infrastructure(&self, state: &mut PipelineState, reason: String) -> RunOutcome {
        RunOutcome::FailedInfrastructure {
            reason,
            history: std::mem::take(&mut state.history),
        }
    }
}

fn verdict_detail(stage: StageName, update: &StageUpdate) -> Option<String> {
    if stage != StageName::Validation {
        return None;
    }
    update.validation_verdict.as_ref().map(|verdict| match verdict {
        Verdict::Valid => "valid".to_string(),
        Verdict::RecoverableErrors { violations } => {
            format!("{} violation(s)", violations.len())
        }
        Verdict::InfrastructureFailure { reason } => format!("infrastructure: {reason}"),
        Verdict::Unvalidated => "unvalidated".to_string(),
    })
}

// ---------------------------------------------------------------------------
// Pipeline — assembly with fail-fast configuration checks
// ---------------------------------------------------------------------------

/// Fully wired pipeline. Construction validates the configuration so a bad
/// setup fails before any input is processed.
pub struct Pipeline {
    executor: Executor,
}

impl Pipeline {
    pub fn new(
        client: Arc<LlmClient>,
        embedder: Arc<dyn EmbedderClient>,
        catalog: Arc<VocabularyCatalog>,
        validator: Arc<dyn Validator>,
        taxonomy: Option<Arc<TopicTaxonomy>>,
        sink: Arc<dyn CallSink>,
        config: PipelineConfig,
    ) -> Result<Self, KgError> {
        client.slots().validate(config.enable_labeling)?;

        if catalog.is_empty() {
            return Err(KgError::ConfigError(
                "vocabulary catalogue is empty".to_string(),
            ));
        }

        let labeling: Option<Arc<dyn Stage>> = if config.enable_labeling {
            let taxonomy = taxonomy.ok_or_else(|| {
                KgError::ConfigError("labeling enabled but no taxonomy provided".to_string())
            })?;
            if taxonomy.is_empty() {
                return Err(KgError::ConfigError("topic taxonomy is empty".to_string()));
            }
            Some(Arc::new(TopicLabelingStage::new(
                client.clone(),
                taxonomy,
                sink.clone(),
            )))
        } else {
            None
        };

        let stages = StageSet {
            extraction: Arc::new(EntityExtractionStage::new(client.clone(), sink.clone())),
            mapping: Arc::new(SchemaMappingStage::new(
                client.clone(),
                embedder,
                catalog.clone(),
                sink.clone(),
            )),
            generation: Arc::new(GraphGenerationStage::new(
                client.clone(),
                catalog,
                sink,
            )),
            validation: Arc::new(ValidationStage::new(validator)),
            labeling,
        };

        Ok(Self {
            executor: Executor::new(stages, config),
        })
    }

    pub fn events(&self) -> &EventEmitter {
        self.executor.events()
    }

    pub async fn run(&self, input_text: &str) -> RunOutcome {
        self.executor.run(input_text).await
    }
}
