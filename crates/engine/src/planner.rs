//! Task decomposition seam.
//!
//! Production deployments plug an LLM- or rules-backed planner in
//! behind [`Planner`]; the engine only requires that the produced plan
//! validates. [`StaticPlanner`] serves fixed plans for tests and demos.

use async_trait::async_trait;

use planweave_core_types::{Plan, Step, Task, WeaveError};

#[async_trait]
pub trait Planner: Send + Sync {
    /// Decompose a task into an executable plan. Implementations must
    /// return a plan that passes [`Plan::validate`].
    async fn decompose(&self, task: &Task) -> Result<Plan, WeaveError>;
}

/// Planner that serves a pre-built step list for every task.
pub struct StaticPlanner {
    steps: Vec<Step>,
}

impl StaticPlanner {
    pub fn new(steps: Vec<Step>) -> Self {
        Self { steps }
    }
}

#[async_trait]
impl Planner for StaticPlanner {
    async fn decompose(&self, task: &Task) -> Result<Plan, WeaveError> {
        let plan = Plan::new(task.id.clone(), self.steps.clone());
        plan.validate()?;
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use planweave_core_types::{ParamMap, StepId};

    #[tokio::test]
    async fn static_planner_serves_its_steps() {
        let steps = vec![
            Step::named("a", "search", ParamMap::new()),
            Step::named("b", "report", ParamMap::new())
                .with_dependencies(vec![StepId::from_name("a")]),
        ];
        let planner = StaticPlanner::new(steps);
        let task = Task::new("two step task");

        let plan = planner.decompose(&task).await.unwrap();
        assert_eq!(plan.task_id, task.id);
        assert_eq!(plan.steps.len(), 2);
    }

    #[tokio::test]
    async fn invalid_static_plans_are_rejected() {
        let steps = vec![Step::named("a", "search", ParamMap::new())
            .with_dependencies(vec![StepId::from_name("ghost")])];
        let planner = StaticPlanner::new(steps);
        assert!(planner.decompose(&Task::new("broken")).await.is_err());
    }
}
