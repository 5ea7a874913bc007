//! Shared types, errors, state, and outcomes for the textkg pipeline.
//!
//! This crate provides the foundational types used across all other textkg crates:
//! - `KgError` — unified error taxonomy
//! - `PipelineState` — the record threaded through every stage of a run
//! - `StageUpdate` — copy-on-write partial update returned by a stage
//! - `Verdict` — tagged outcome of validating a generated graph document
//! - `RunOutcome` — terminal result of a pipeline run

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Unified error type for all textkg subsystems.
#[derive(Debug, thiserror::Error)]
pub enum KgError {
    // === Model provider errors ===
    #[error("Provider {provider} returned HTTP {status}: {message}")]
    ProviderError {
        provider: String,
        status: u16,
        message: String,
        retryable: bool,
    },

    #[error("Rate limited by {provider}, retry after {retry_after_ms}ms")]
    RateLimited {
        provider: String,
        retry_after_ms: u64,
    },

    #[error("Authentication failed for provider {provider}")]
    AuthError { provider: String },

    #[error("Request to {provider} timed out after {timeout_ms}ms")]
    RequestTimeout { provider: String, timeout_ms: u64 },

    #[error("Stage '{stage}' received a malformed model response: {message}")]
    MalformedResponse { stage: String, message: String },

    // === Validator errors ===
    #[error("Validator unavailable: {reason}")]
    ValidatorUnavailable { reason: String },

    #[error("Validator timed out after {timeout_ms}ms")]
    ValidatorTimeout { timeout_ms: u64 },

    #[error("Validator output unparsable: {detail}")]
    ValidatorOutputUnparsable { detail: String },

    // === Configuration errors ===
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // === Pipeline errors ===
    #[error("Retries exhausted after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    // === Generic ===
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl KgError {
    /// Returns `true` if the error is transient and the call may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            KgError::RateLimited { .. }
                | KgError::RequestTimeout { .. }
                | KgError::ProviderError {
                    retryable: true,
                    ..
                }
        )
    }

    /// Returns `true` if the error originates from an unavailable or misbehaving
    /// external dependency rather than from generated content.
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            KgError::ValidatorUnavailable { .. }
                | KgError::ValidatorTimeout { .. }
                | KgError::ValidatorOutputUnparsable { .. }
                | KgError::AuthError { .. }
                | KgError::ProviderError { .. }
                | KgError::RateLimited { .. }
                | KgError::RequestTimeout { .. }
        )
    }
}

/// A convenience alias for `Result<T, KgError>`.
pub type Result<T> = std::result::Result<T, KgError>;

// ---------------------------------------------------------------------------
// Entity / Relation — output of the extraction stage
// ---------------------------------------------------------------------------

/// One extracted entity: surface form, type label, and a description of the type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub surface_form: String,
    pub type_label: String,
    pub description: String,
}

impl Entity {
    pub fn new(
        surface_form: impl Into<String>,
        type_label: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            surface_form: surface_form.into(),
            type_label: type_label.into(),
            description: description.into(),
        }
    }
}

/// A subject → predicate → object triple extracted alongside entities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    pub subject: String,
    pub predicate: String,
    pub object: String,
}

impl Relation {
    pub fn new(
        subject: impl Into<String>,
        predicate: impl Into<String>,
        object: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            predicate: predicate.into(),
            object: object.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// SchemaCandidate — ranked vocabulary match for an entity type
// ---------------------------------------------------------------------------

/// One vocabulary type ranked against an entity type label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaCandidate {
    pub vocabulary_type: String,
    pub comment: String,
    pub score: f32,
}

// ---------------------------------------------------------------------------
// GraphDocument — the generated JSON-LD object
// ---------------------------------------------------------------------------

/// A JSON-LD object: a mapping of keys to typed property values.
///
/// The document is only considered final once the validation verdict is
/// [`Verdict::Valid`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GraphDocument(pub serde_json::Map<String, serde_json::Value>);

impl GraphDocument {
    /// The minimal valid document produced when no entities were extracted.
    pub fn minimal() -> Self {
        let mut map = serde_json::Map::new();
        map.insert(
            "@context".into(),
            serde_json::Value::String("https://schema.org".into()),
        );
        map.insert("@type".into(), serde_json::Value::String("Thing".into()));
        Self(map)
    }

    /// Wrap a JSON value if it is an object.
    pub fn from_value(value: serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    /// Serialize to a compact JSON string.
    pub fn to_json(&self) -> String {
        serde_json::Value::Object(self.0.clone()).to_string()
    }

    /// Serialize to a pretty-printed JSON string.
    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.0)?)
    }

    /// Append a `DefinedTerm` node for a taxonomy label to the `about` array.
    ///
    /// A non-array `about` value is promoted to a single-element array first.
    pub fn append_about_label(&mut self, label: &str, term_set: &str) {
        let about = self
            .0
            .entry("about")
            .or_insert_with(|| serde_json::Value::Array(Vec::new()));
        if !about.is_array() {
            *about = serde_json::Value::Array(vec![about.take()]);
        }
        if let serde_json::Value::Array(items) = about {
            items.push(serde_json::json!({
                "@type": "DefinedTerm",
                "name": label,
                "inDefinedTermSet": {
                    "@type": "DefinedTermSet",
                    "name": term_set,
                },
            }));
        }
    }
}

// ---------------------------------------------------------------------------
// Verdict — outcome of validating a graph document
// ---------------------------------------------------------------------------

/// A single validation violation: machine-readable code, offending node/property
/// path, and a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub code: String,
    pub path: String,
    pub message: String,
}

/// The tagged outcome of validating a generated graph document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    /// No validation has run yet.
    Unvalidated,
    /// The document conforms to the vocabulary.
    Valid,
    /// Content errors that regeneration with corrective context may fix.
    RecoverableErrors { violations: Vec<Violation> },
    /// The validator itself was unreachable, crashed, timed out, or produced
    /// unparsable output. Never retried.
    InfrastructureFailure { reason: String },
}

impl Verdict {
    pub fn is_valid(&self) -> bool {
        matches!(self, Verdict::Valid)
    }
}

// ---------------------------------------------------------------------------
// TopicLabel — taxonomy category assigned by the labeling stage
// ---------------------------------------------------------------------------

/// A taxonomy category assignment: dimension → label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicLabel {
    pub dimension: String,
    pub label: String,
}

// ---------------------------------------------------------------------------
// StageName / StageOutcome / HistoryEntry
// ---------------------------------------------------------------------------

/// The five pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    EntityExtraction,
    SchemaMapping,
    GraphGeneration,
    Validation,
    TopicLabeling,
}

impl StageName {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageName::EntityExtraction => "entity_extraction",
            StageName::SchemaMapping => "schema_mapping",
            StageName::GraphGeneration => "graph_generation",
            StageName::Validation => "validation",
            StageName::TopicLabeling => "topic_labeling",
        }
    }
}

impl std::fmt::Display for StageName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one stage invocation, recorded in the history trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageOutcome {
    Completed,
    Retrying,
    Failed,
    Skipped,
}

/// One append-only history entry per stage invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub stage: StageName,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub duration_ms: u64,
    pub outcome: StageOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

// ---------------------------------------------------------------------------
// StageFailure — classified failure reported by a stage
// ---------------------------------------------------------------------------

/// A stage classifies every failure before reporting it. `Recoverable` failures
/// are resolved inside the run (degraded path or retry edge); `Fatal` failures
/// terminate the run immediately.
#[derive(Debug)]
pub enum StageFailure {
    /// Malformed model output or similar content issue that a retry with
    /// adjusted instructions might fix.
    Recoverable(String),
    /// Persistent backend or dependency failure. Terminates the run.
    Fatal(KgError),
}

// ---------------------------------------------------------------------------
// StageUpdate — copy-on-write partial update merged by the executor
// ---------------------------------------------------------------------------

/// A partial state update returned by a stage.
///
/// Stages never mutate [`PipelineState`] directly; the executor merges each
/// update centrally, so a stage cannot corrupt fields it does not own.
#[derive(Debug, Clone, Default)]
pub struct StageUpdate {
    pub summary: Option<String>,
    pub entities: Option<Vec<Entity>>,
    pub relations: Option<Vec<Relation>>,
    pub extraction_failed: Option<bool>,
    pub schema_candidates: Option<BTreeMap<String, Vec<SchemaCandidate>>>,
    pub graph_document: Option<GraphDocument>,
    pub validation_verdict: Option<Verdict>,
    pub labels: Option<Vec<TopicLabel>>,
}

// ---------------------------------------------------------------------------
// PipelineState — the record threaded through all stages of one run
// ---------------------------------------------------------------------------

/// The shared record for one pipeline run.
///
/// Created once per run from the input text and discarded after the terminal
/// outcome is returned. Each stage owns a subset of fields; the executor is
/// the only writer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineState {
    /// Identifier for this run, carried into call-log records.
    pub run_id: uuid::Uuid,
    /// Immutable after creation.
    pub input_text: String,
    pub summary: Option<String>,
    pub entities: Vec<Entity>,
    pub relations: Vec<Relation>,
    /// Set when extraction degraded to the empty-entity path.
    pub extraction_failed: bool,
    /// Entity type label → ranked vocabulary candidates, best first.
    pub schema_candidates: BTreeMap<String, Vec<SchemaCandidate>>,
    pub graph_document: Option<GraphDocument>,
    pub validation_verdict: Verdict,
    /// Incremented only on recoverable-error retries.
    pub retry_count: u32,
    pub max_retries: u32,
    pub labels: Option<Vec<TopicLabel>>,
    /// Append-only: one entry per stage invocation, retries included.
    pub history: Vec<HistoryEntry>,
}

impl PipelineState {
    pub fn new(input_text: impl Into<String>, max_retries: u32) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4(),
            input_text: input_text.into(),
            summary: None,
            entities: Vec::new(),
            relations: Vec::new(),
            extraction_failed: false,
            schema_candidates: BTreeMap::new(),
            graph_document: None,
            validation_verdict: Verdict::Unvalidated,
            retry_count: 0,
            max_retries,
            labels: None,
            history: Vec::new(),
        }
    }

    /// Merge a stage's partial update. Fields absent from the update are
    /// preserved untouched.
    pub fn apply(&mut self, update: StageUpdate) {
        if let Some(summary) = update.summary {
            self.summary = Some(summary);
        }
        if let Some(entities) = update.entities {
            self.entities = entities;
        }
        if let Some(relations) = update.relations {
            self.relations = relations;
        }
        if let Some(failed) = update.extraction_failed {
            self.extraction_failed = failed;
        }
        if let Some(candidates) = update.schema_candidates {
            self.schema_candidates = candidates;
        }
        if let Some(document) = update.graph_document {
            self.graph_document = Some(document);
        }
        if let Some(verdict) = update.validation_verdict {
            self.validation_verdict = verdict;
        }
        if let Some(labels) = update.labels {
            self.labels = Some(labels);
        }
    }

    /// Append one history entry. Entries are never removed or reordered.
    pub fn record(&mut self, entry: HistoryEntry) {
        self.history.push(entry);
    }

    /// Count of history entries for a given stage.
    pub fn invocations_of(&self, stage: StageName) -> usize {
        self.history.iter().filter(|e| e.stage == stage).count()
    }
}

// ---------------------------------------------------------------------------
// RunOutcome — terminal result of a pipeline run
// ---------------------------------------------------------------------------

/// The terminal outcome returned to the caller.
///
/// Every variant carries the full history trail for diagnosability.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    Succeeded {
        graph_document: GraphDocument,
        labels: Option<Vec<TopicLabel>>,
        history: Vec<HistoryEntry>,
    },
    /// Recoverable errors persisted past the retry ceiling. Distinct from an
    /// infrastructure failure so callers can remediate differently.
    ExhaustedRetries {
        violations: Vec<Violation>,
        history: Vec<HistoryEntry>,
    },
    FailedInfrastructure {
        reason: String,
        history: Vec<HistoryEntry>,
    },
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Succeeded { .. })
    }

    pub fn history(&self) -> &[HistoryEntry] {
        match self {
            RunOutcome::Succeeded { history, .. }
            | RunOutcome::ExhaustedRetries { history, .. }
            | RunOutcome::FailedInfrastructure { history, .. } => history,
        }
    }
}
