//! Pure routing decision after validation.

use textkg_types::Verdict;

/// Where the executor goes after a validation verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Valid document, labeling enabled: run the labeling stage.
    Label,
    /// Valid document, labeling disabled: finish the run.
    Finish,
    /// Recoverable violations with retry budget left: regenerate the document.
    RetryGeneration,
    /// Recoverable violations with the budget spent: terminal failure.
    ExhaustedRetries,
    /// The validator itself failed: terminal failure, never retried.
    Infrastructure(String),
}

/// Decide the next step from the verdict and the retry budget.
///
/// This function performs no IO and mutates nothing, so the full decision
/// table is testable in isolation.
pub fn route(
    verdict: &Verdict,
    retry_count: u32,
    max_retries: u32,
    labeling_enabled: bool,
) -> Decision {
    match verdict {
        Verdict::Valid => {
            if labeling_enabled {
                Decision::Label
            } else {
                Decision::Finish
            }
        }
        Verdict::RecoverableErrors { .. } => {
            if retry_count < max_retries {
                Decision::RetryGeneration
            } else {
                Decision::ExhaustedRetries
            }
        }
        Verdict::InfrastructureFailure { reason } => Decision::Infrastructure(reason.clone()),
        Verdict::Unvalidated => {
            Decision::Infrastructure("routing requested without a validation verdict".to_string())
        }
    }
}
