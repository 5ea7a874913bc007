//! Pipeline execution core for text-to-knowledge-graph conversion.
//!
//! This crate implements the textkg runner: the stage contract and the five
//! stages, the external validator adapter, the routing decision table, and the
//! graph executor that drives a run to a terminal outcome.

pub mod call_log;
pub mod events;
pub mod executor;
pub mod retry;
pub mod router;
pub mod stage;
pub mod stages;
pub mod taxonomy;
pub mod validator;
pub mod vocabulary;

pub use call_log::{CallRecord, CallSink, JsonlCallSink, NullCallSink};
pub use events::{EventEmitter, PipelineEvent};
pub use executor::{Executor, Pipeline, PipelineConfig, StageSet};
pub use retry::{retry_with_backoff, BackoffPolicy};
pub use router::{route, Decision};
pub use stage::Stage;
pub use stages::{
    EntityExtractionStage, GraphGenerationStage, SchemaMappingStage, TopicLabelingStage,
    ValidationStage,
};
pub use taxonomy::TopicTaxonomy;
pub use validator::{ProcessValidator, Validator};
pub use vocabulary::{cosine_similarity, VocabularyCatalog, VocabularyEntry};
