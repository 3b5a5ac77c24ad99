use std::path::Path;

use crate::error::GenerationError;
use crate::testgen::orchestrator::{GenerationOrchestrator, RunOutcome};
use crate::testgen::request::{GenerationRequest, RequestKind};

#[derive(Debug)]
pub struct ScenarioResult {
    pub selector: String,
    pub outcome: Result<RunOutcome, GenerationError>,
}

impl ScenarioResult {
    pub fn passed(&self) -> bool {
        matches!(&self.outcome, Ok(o) if o.passed)
    }
}

/// Generate one test per selector, strictly one after another.
///
/// `related` members of the target are passed to every scenario's prompts.
/// A fatal outcome for one scenario is reported and the batch moves on. The
/// orchestrator is reset between scenarios; a cancelled token stops the
/// remaining ones.
pub fn generate_all(
    orch: &mut GenerationOrchestrator,
    target_path: &Path,
    target_source: &str,
    kind: RequestKind,
    selectors: &[String],
    related: &[String],
) -> Vec<ScenarioResult> {
    let cancel = orch.cancel_token();
    let mut results = Vec::with_capacity(selectors.len());

    for (i, selector) in selectors.iter().enumerate() {
        if cancel.is_cancelled() {
            tracing::warn!(remaining = selectors.len() - i, "batch cancelled");
            break;
        }

        orch.reset();
        tracing::info!(scenario = i + 1, total = selectors.len(), selector = %selector, "batch scenario");

        let request = GenerationRequest::new(target_path, target_source, selector.clone(), kind)
            .with_related_members(related.to_vec());
        let outcome = orch.generate(&request);

        if let Err(e) = &outcome {
            tracing::warn!(selector = %selector, "scenario failed: {e}");
        }

        results.push(ScenarioResult {
            selector: selector.clone(),
            outcome,
        });
    }

    orch.reset();
    results
}
