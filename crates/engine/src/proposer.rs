//! Replan-proposal collaborators.
//!
//! The replanner delegates "what to try differently" to a
//! [`ReplanProposer`]; it only enforces bounding and dependency wiring.
//! An LLM-backed proposer plugs in behind the same trait; the two
//! implementations here keep the engine runnable and testable without
//! one.

use async_trait::async_trait;
use serde_json::Value;

use planweave_core_types::{ReplanRequest, StepTemplate, SuggestedAction, WeaveError};

use crate::validator::item_count;

#[async_trait]
pub trait ReplanProposer: Send + Sync {
    /// Zero templates means "no better idea" and triggers failure
    /// propagation in the caller.
    async fn propose(&self, request: &ReplanRequest) -> Result<Vec<StepTemplate>, WeaveError>;
}

/// Proposer that never has a better idea.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopProposer;

#[async_trait]
impl ReplanProposer for NoopProposer {
    async fn propose(&self, _request: &ReplanRequest) -> Result<Vec<StepTemplate>, WeaveError> {
        Ok(Vec::new())
    }
}

/// Deterministic proposer covering the two mechanical recovery cases:
/// retry the same target after a transient failure, and fetch the
/// remaining shortfall after an undersized result. Everything else is
/// left to smarter collaborators.
#[derive(Clone, Copy, Debug, Default)]
pub struct HeuristicProposer;

#[async_trait]
impl ReplanProposer for HeuristicProposer {
    async fn propose(&self, request: &ReplanRequest) -> Result<Vec<StepTemplate>, WeaveError> {
        match request.validation.suggested_action {
            SuggestedAction::RetrySame => Ok(vec![StepTemplate::new(
                request.failed_step.target.clone(),
                request.failed_step.params.clone(),
            )]),
            SuggestedAction::FetchMore => {
                let required = match request.goal.requested_count {
                    Some(required) => required,
                    None => return Ok(Vec::new()),
                };
                let have = (request.validation.coverage * required as f32).round() as usize;
                let have = have.max(
                    request
                        .failed_output
                        .as_ref()
                        .map(item_count)
                        .unwrap_or(0),
                );
                let remaining = required.saturating_sub(have).max(1);

                let mut params = request.failed_step.params.clone();
                params.insert("count".to_string(), Value::from(remaining));
                Ok(vec![StepTemplate::new(
                    request.failed_step.target.clone(),
                    params,
                )])
            }
            SuggestedAction::DifferentTarget | SuggestedAction::None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use planweave_core_types::{ParamMap, Step, TaskGoal, ValidationResult};
    use serde_json::json;

    fn request(action: SuggestedAction, coverage: f32, goal: TaskGoal) -> ReplanRequest {
        ReplanRequest {
            failed_step: Step::named("s1", "search", ParamMap::new()),
            validation: ValidationResult::invalid(true, action, coverage, "test"),
            goal,
            failed_output: Some(json!([1, 2, 3, 4, 5, 6, 7])),
        }
    }

    #[tokio::test]
    async fn noop_never_proposes() {
        let proposer = NoopProposer;
        let templates = proposer
            .propose(&request(SuggestedAction::FetchMore, 0.7, TaskGoal::with_count(10)))
            .await
            .unwrap();
        assert!(templates.is_empty());
    }

    #[tokio::test]
    async fn fetch_more_requests_the_shortfall() {
        let proposer = HeuristicProposer;
        let templates = proposer
            .propose(&request(SuggestedAction::FetchMore, 0.7, TaskGoal::with_count(10)))
            .await
            .unwrap();
        assert_eq!(templates.len(), 1);
        assert_eq!(templates[0].target, "search");
        assert_eq!(templates[0].params["count"], json!(3));
    }

    #[tokio::test]
    async fn retry_same_clones_the_template() {
        let proposer = HeuristicProposer;
        let mut goal_request = request(SuggestedAction::RetrySame, 0.0, TaskGoal::default());
        goal_request
            .failed_step
            .params
            .insert("query".into(), json!("rust"));
        let templates = proposer.propose(&goal_request).await.unwrap();
        assert_eq!(templates.len(), 1);
        assert_eq!(templates[0].params["query"], json!("rust"));
    }

    #[tokio::test]
    async fn different_target_defers_to_smarter_proposers() {
        let proposer = HeuristicProposer;
        let templates = proposer
            .propose(&request(SuggestedAction::DifferentTarget, 0.5, TaskGoal::default()))
            .await
            .unwrap();
        assert!(templates.is_empty());
    }
}
