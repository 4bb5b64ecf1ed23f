//! Run submission surface.
//!
//! [`submit`](ExecutionEngine::submit) detaches a run onto the runtime
//! and hands back a [`RunHandle`] for status polling, cancellation and
//! result collection.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use planweave_core_types::{Plan, RunId, Task, WeaveError};

use crate::engine::{ExecutionEngine, RunResult, RunStatus};
use crate::planner::Planner;

/// Handle to a detached run.
///
/// Cloneable observers are not needed here: one owner polls, cancels
/// and finally awaits the result. The result can be taken exactly once.
pub struct RunHandle {
    run_id: RunId,
    cancel: CancellationToken,
    status: watch::Receiver<RunStatus>,
    join: Mutex<Option<JoinHandle<Result<RunResult, WeaveError>>>>,
}

impl RunHandle {
    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// Last observed run status. [`RunStatus::Running`] until the run
    /// settles.
    pub fn status(&self) -> RunStatus {
        *self.status.borrow()
    }

    pub fn is_finished(&self) -> bool {
        self.status() != RunStatus::Running
    }

    /// Request cooperative cancellation. In-flight steps get the
    /// configured grace period to wind down.
    pub fn cancel(&self) {
        info!(target: "engine", run = %self.run_id, "cancellation requested");
        self.cancel.cancel();
    }

    /// Await the run result. Consumes the underlying join handle, so a
    /// second call returns an error instead of hanging.
    pub async fn result(&self) -> Result<RunResult, WeaveError> {
        let join = self
            .join
            .lock()
            .take()
            .ok_or_else(|| WeaveError::new("run result already taken"))?;
        join.await
            .map_err(|error| WeaveError::new(format!("run task failed: {error}")))?
    }
}

impl ExecutionEngine {
    /// Detach a run onto the runtime and return a handle to it.
    pub fn submit(self: &Arc<Self>, task: Task, plan: Plan) -> RunHandle {
        let run_id = RunId::new();
        let cancel = CancellationToken::new();
        let (status_tx, status_rx) = watch::channel(RunStatus::Running);

        let engine = Arc::clone(self);
        let worker_run_id = run_id.clone();
        let worker_cancel = cancel.clone();
        let join = tokio::spawn(async move {
            let result = engine
                .run_inner(worker_run_id, &task, plan, worker_cancel)
                .await;
            let status = match &result {
                Ok(run) => run.status,
                Err(_) => RunStatus::Failed,
            };
            let _ = status_tx.send(status);
            result
        });

        RunHandle {
            run_id,
            cancel,
            status: status_rx,
            join: Mutex::new(Some(join)),
        }
    }

    /// Decompose a task with the given planner, then submit the run.
    pub async fn submit_planned(
        self: &Arc<Self>,
        planner: &dyn Planner,
        task: Task,
    ) -> Result<RunHandle, WeaveError> {
        let plan = planner.decompose(&task).await?;
        Ok(self.submit(task, plan))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::json;

    use planweave_core_types::{ErrorKind, ParamMap, Step, ToolOutcome};
    use planweave_reliability::{InMemoryPerformanceStore, ReliabilityConfig, ReliabilityLearner};
    use planweave_tool_registry::{Tool, ToolRegistry};

    use crate::config::EngineConfig;
    use crate::planner::StaticPlanner;
    use crate::proposer::NoopProposer;

    struct InstantTool;

    #[async_trait]
    impl Tool for InstantTool {
        fn name(&self) -> &str {
            "instant"
        }

        async fn execute(&self, _params: &ParamMap, _cancel: &CancellationToken) -> ToolOutcome {
            ToolOutcome::ok(json!({"ok": true}), Duration::ZERO)
        }
    }

    struct StuckTool;

    #[async_trait]
    impl Tool for StuckTool {
        fn name(&self) -> &str {
            "stuck"
        }

        async fn execute(&self, _params: &ParamMap, cancel: &CancellationToken) -> ToolOutcome {
            cancel.cancelled().await;
            ToolOutcome::err(
                WeaveError::tool(ErrorKind::Cancelled, "cancelled"),
                Duration::ZERO,
            )
        }
    }

    fn engine(registry: ToolRegistry, config: EngineConfig) -> Arc<ExecutionEngine> {
        let learner = Arc::new(ReliabilityLearner::new(
            Arc::new(InMemoryPerformanceStore::new()),
            ReliabilityConfig::default(),
        ));
        Arc::new(ExecutionEngine::new(
            Arc::new(registry),
            learner,
            Arc::new(NoopProposer),
            config,
        ))
    }

    #[tokio::test]
    async fn submitted_run_completes_and_reports_status() {
        let registry = ToolRegistry::new();
        registry.register("work", Arc::new(InstantTool) as Arc<dyn Tool>);
        let engine = engine(registry, EngineConfig::default());

        let task = Task::new("one instant step");
        let plan = Plan::new(
            task.id.clone(),
            vec![Step::named("w", "work", ParamMap::new())],
        );

        let handle = engine.submit(task, plan);
        let result = handle.result().await.unwrap();
        assert_eq!(result.status, RunStatus::Completed);
        assert_eq!(handle.status(), RunStatus::Completed);
        assert!(handle.is_finished());

        // The result can only be taken once.
        assert!(handle.result().await.is_err());
    }

    #[tokio::test]
    async fn cancel_through_the_handle_settles_the_run() {
        let registry = ToolRegistry::new();
        registry.register("hang", Arc::new(StuckTool) as Arc<dyn Tool>);
        let config = EngineConfig {
            cancel_grace_ms: 500,
            ..EngineConfig::default()
        };
        let engine = engine(registry, config);

        let task = Task::new("hangs until cancelled");
        let plan = Plan::new(
            task.id.clone(),
            vec![Step::named("h", "hang", ParamMap::new())],
        );

        let handle = engine.submit(task, plan);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(handle.status(), RunStatus::Running);

        handle.cancel();
        let result = handle.result().await.unwrap();
        assert_eq!(result.status, RunStatus::Cancelled);
        assert_eq!(result.succeeded_steps(), 0);
    }

    #[tokio::test]
    async fn submit_planned_decomposes_first() {
        let registry = ToolRegistry::new();
        registry.register("work", Arc::new(InstantTool) as Arc<dyn Tool>);
        let engine = engine(registry, EngineConfig::default());

        let planner = StaticPlanner::new(vec![Step::named("w", "work", ParamMap::new())]);
        let handle = engine
            .submit_planned(&planner, Task::new("planned"))
            .await
            .unwrap();
        let result = handle.result().await.unwrap();
        assert_eq!(result.status, RunStatus::Completed);
    }
}
