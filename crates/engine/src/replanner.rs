//! Bounded plan mutation on validation failure.
//!
//! The replanner asks the proposal collaborator for replacement step
//! templates, then enforces everything the proposal is not trusted
//! with: the per-plan replan ceiling, fresh step ids, dependency
//! wiring, and splice position.

use std::sync::Arc;

use tracing::info;

use planweave_core_types::{Plan, ReplanRequest, Step, StepId, WeaveError};

use crate::metrics;
use crate::proposer::ReplanProposer;

pub struct Replanner {
    proposer: Arc<dyn ReplanProposer>,
    max_replans: u32,
}

impl Replanner {
    pub fn new(proposer: Arc<dyn ReplanProposer>, max_replans: u32) -> Self {
        Self {
            proposer,
            max_replans,
        }
    }

    pub fn max_replans(&self) -> u32 {
        self.max_replans
    }

    /// Splice replacement steps after the failed step, or `None` when
    /// the replan budget is exhausted or the proposer has no idea.
    ///
    /// New steps inherit the failed step's predecessors unless their
    /// template names explicit dependencies, which must already exist
    /// in the plan. Direct dependents of the failed step are re-pointed
    /// at the tail of the replacement chain.
    pub async fn replan(
        &self,
        request: &ReplanRequest,
        plan: &mut Plan,
    ) -> Result<Option<Vec<StepId>>, WeaveError> {
        if plan.replan_count >= self.max_replans {
            info!(
                target: "replanner",
                step = %request.failed_step.id,
                replans = plan.replan_count,
                max = self.max_replans,
                "replan budget exhausted"
            );
            return Ok(None);
        }

        let templates = self.proposer.propose(request).await?;
        if templates.is_empty() {
            info!(
                target: "replanner",
                step = %request.failed_step.id,
                "proposer returned no alternatives"
            );
            return Ok(None);
        }

        let mut steps = Vec::with_capacity(templates.len());
        for template in templates {
            let depends_on = match template.depends_on {
                Some(deps) => {
                    for dep in &deps {
                        if !plan.contains(dep) {
                            return Err(WeaveError::invalid_plan(format!(
                                "replan proposal references unknown step {dep}"
                            )));
                        }
                    }
                    deps
                }
                None => request.failed_step.depends_on.clone(),
            };
            steps.push(
                Step::new(template.target, template.params).with_dependencies(depends_on),
            );
        }

        let ids: Vec<StepId> = steps.iter().map(|step| step.id.clone()).collect();
        let tail = ids.last().cloned().expect("at least one replacement step");

        plan.replan_count += 1;
        plan.splice_after(&request.failed_step.id, steps);
        plan.rewire_dependents(&request.failed_step.id, &tail);
        metrics::record_replan();

        info!(
            target: "replanner",
            step = %request.failed_step.id,
            new_steps = ids.len(),
            replans = plan.replan_count,
            "plan mutated"
        );
        Ok(Some(ids))
    }
}

impl std::fmt::Debug for Replanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Replanner")
            .field("max_replans", &self.max_replans)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proposer::{HeuristicProposer, NoopProposer};
    use async_trait::async_trait;
    use planweave_core_types::{
        ParamMap, StepTemplate, SuggestedAction, TaskGoal, TaskId, ValidationResult,
    };
    use serde_json::json;

    fn plan_with_failed_step() -> (Plan, ReplanRequest) {
        let root = Step::named("root", "search", ParamMap::new());
        let failed = Step::named("collect", "collect", ParamMap::new())
            .with_dependencies(vec![root.id.clone()]);
        let dependent = Step::named("report", "report", ParamMap::new())
            .with_dependencies(vec![failed.id.clone()]);
        let request = ReplanRequest {
            failed_step: failed.clone(),
            validation: ValidationResult::invalid(true, SuggestedAction::FetchMore, 0.7, "short"),
            goal: TaskGoal::with_count(10),
            failed_output: Some(json!([1, 2, 3, 4, 5, 6, 7])),
        };
        (Plan::new(TaskId::new(), vec![root, failed, dependent]), request)
    }

    #[tokio::test]
    async fn splices_and_rewires() {
        let (mut plan, request) = plan_with_failed_step();
        let replanner = Replanner::new(Arc::new(HeuristicProposer), 3);

        let ids = replanner.replan(&request, &mut plan).await.unwrap().unwrap();
        assert_eq!(ids.len(), 1);
        assert_eq!(plan.replan_count, 1);
        assert!(plan.validate().is_ok());

        // Spliced directly after the failed step.
        let positions: Vec<&str> = plan.steps.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(positions[1], "collect");
        assert_eq!(positions[2], ids[0].as_str());

        // New step inherits the failed step's predecessors.
        let new_step = plan.get(&ids[0]).unwrap();
        assert_eq!(new_step.depends_on, vec![StepId::from_name("root")]);

        // The dependent now waits on the replacement.
        let dependent = plan.get(&StepId::from_name("report")).unwrap();
        assert_eq!(dependent.depends_on, vec![ids[0].clone()]);
    }

    #[tokio::test]
    async fn respects_the_replan_ceiling() {
        let (mut plan, request) = plan_with_failed_step();
        let replanner = Replanner::new(Arc::new(HeuristicProposer), 2);

        assert!(replanner.replan(&request, &mut plan).await.unwrap().is_some());
        assert!(replanner.replan(&request, &mut plan).await.unwrap().is_some());
        // The (n+1)-th attempt after the limit returns None.
        assert!(replanner.replan(&request, &mut plan).await.unwrap().is_none());
        assert_eq!(plan.replan_count, 2);
    }

    #[tokio::test]
    async fn empty_proposal_propagates_failure() {
        let (mut plan, request) = plan_with_failed_step();
        let replanner = Replanner::new(Arc::new(NoopProposer), 3);
        assert!(replanner.replan(&request, &mut plan).await.unwrap().is_none());
        assert_eq!(plan.replan_count, 0);
    }

    struct BadDepsProposer;

    #[async_trait]
    impl ReplanProposer for BadDepsProposer {
        async fn propose(
            &self,
            _request: &ReplanRequest,
        ) -> Result<Vec<StepTemplate>, WeaveError> {
            let mut template = StepTemplate::new("collect", ParamMap::new());
            template.depends_on = Some(vec![StepId::from_name("ghost")]);
            Ok(vec![template])
        }
    }

    #[tokio::test]
    async fn unknown_proposal_dependencies_are_rejected() {
        let (mut plan, request) = plan_with_failed_step();
        let replanner = Replanner::new(Arc::new(BadDepsProposer), 3);
        let err = replanner.replan(&request, &mut plan).await.unwrap_err();
        assert!(err.to_string().contains("unknown step"));
        // The plan is untouched on rejection.
        assert_eq!(plan.replan_count, 0);
        assert_eq!(plan.steps.len(), 3);
    }
}
