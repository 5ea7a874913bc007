//! The uniform stage contract.

use async_trait::async_trait;

use textkg_types::{PipelineState, StageFailure, StageName, StageUpdate};

/// One transformation step in the pipeline.
///
/// A stage consumes the current state read-only and returns a partial update
/// for the fields it owns; the executor merges updates centrally. Failures are
/// classified by the stage itself — [`StageFailure::Recoverable`] for content
/// issues a retry might fix, [`StageFailure::Fatal`] for persistent backend
/// failures — and never propagate as uncontrolled errors across the boundary.
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> StageName;

    async fn execute(&self, state: &PipelineState) -> Result<StageUpdate, StageFailure>;
}
